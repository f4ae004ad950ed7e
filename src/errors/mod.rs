//! # Módulo de Erros do Agente
//!
//! Define a taxonomia de falhas do agente assistido e os códigos
//! estruturados usados nos eventos enviados ao coordenador.
//!
//! ## Para todos entenderem:
//!
//! Quando algo dá errado no navegador (um seletor que não existe, uma
//! linha da tabela que não aparece, um clique que não pega), o operador
//! precisa de UMA linha dizendo o que aconteceu. Este módulo garante isso:
//! cada falha vira um `AgentError` com código e mensagem curta.
//!
//! ## Categorias de Erro
//!
//! | Faixa  | Categoria       | Exemplos                                  |
//! |--------|-----------------|-------------------------------------------|
//! | E1xxx  | Configuração    | arquivo de fluxo ausente, campos faltando |
//! | E2xxx  | Coordenador     | HTTP 401, 403, 500                        |
//! | E3xxx  | Página          | assertion, linha/célula não encontrada    |
//! | E4xxx  | Execução        | step sem campo, clique esgotado           |
//! | E5xxx  | Interno         | I/O, navegador caiu                       |
//!
//! ## Exemplo:
//!
//! ```text
//! [E3002] clickTableCellLink cellText não encontrado: "1792049504001"
//! ```

use std::fmt;

use thiserror::Error;

use crate::protocol::Evidence;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O primeiro dígito é a categoria, os três últimos o erro específico.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Configuração
    // ========================================================================

    /// Arquivo de fluxo ausente ou JSON inválido.
    pub const CONFIG_MISSING: Self = Self(1001);

    /// Campos obrigatórios do fluxo ausentes ou inválidos.
    pub const CONFIG_INVALID: Self = Self(1002);

    /// plan.json do coordenador fora do formato esperado.
    pub const PLAN_INVALID: Self = Self(1003);

    // ========================================================================
    // E2xxx: Coordenador HTTP
    // ========================================================================

    /// Coordenador respondeu fora da faixa 2xx.
    pub const HTTP_ERROR_STATUS: Self = Self(2001);

    /// Falha de transporte (DNS, conexão, TLS).
    pub const HTTP_TRANSPORT: Self = Self(2002);

    // ========================================================================
    // E3xxx: Estado da página
    // ========================================================================

    /// Uma ou mais condições de assertOnPage não foram atendidas.
    pub const ASSERTION_FAILED: Self = Self(3001);

    /// Linha, célula ou seletor não localizado.
    pub const NOT_FOUND: Self = Self(3002);

    // ========================================================================
    // E4xxx: Execução de steps
    // ========================================================================

    /// Campo obrigatório do step vazio após interpolação.
    pub const MISSING_FIELD: Self = Self(4001);

    /// Tipo de step desconhecido.
    pub const UNSUPPORTED_STEP: Self = Self(4002);

    /// Todas as estratégias de clique falharam em todos os candidatos.
    pub const NO_TARGET_CLICKABLE: Self = Self(4003);

    /// Sessão, login ou plano não prontos para a ação.
    pub const PRECONDITION: Self = Self(4004);

    /// Falha enriquecida de uma ação (step + causa + evidência).
    pub const STEP_FAILED: Self = Self(4005);

    /// `trySteps` falhou nos steps e no fallback.
    pub const FALLBACK_EXHAUSTED: Self = Self(4006);

    // ========================================================================
    // E5xxx: Interno
    // ========================================================================

    /// Operação do navegador falhou ou estourou o timeout.
    pub const BROWSER: Self = Self(5001);

    /// Erro de I/O local (screenshots, diretórios).
    pub const IO: Self = Self(5002);

    /// Retorna o código numérico.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Retorna o código formatado com prefixo "E" (ex: "E4003").
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    /// Retorna a categoria baseada no primeiro dígito.
    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Configuration,
            2 => ErrorCategory::Coordinator,
            3 => ErrorCategory::Page,
            4 => ErrorCategory::Execution,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

/// Categoria de erro (primeiro dígito do código).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Coordinator,
    Page,
    Execution,
    Internal,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuração"),
            Self::Coordinator => write!(f, "Coordenador"),
            Self::Page => write!(f, "Página"),
            Self::Execution => write!(f, "Execução"),
            Self::Internal => write!(f, "Interno"),
            Self::Unknown => write!(f, "Desconhecido"),
        }
    }
}

// ============================================================================
// ERRO DO AGENTE
// ============================================================================

/// Todas as falhas que o agente pode produzir.
///
/// Qualquer falha de step aborta a sequência; só `trySteps` recupera.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Arquivo de configuração não pôde ser lido ou parseado.
    #[error("Config requerida ({path}): {reason}")]
    ConfigMissing { path: String, reason: String },

    /// Lista agregada de problemas de configuração.
    #[error("Config requerida: {}", .issues.join(", "))]
    ConfigInvalid { issues: Vec<String> },

    /// plan.json recebido, mas com formato inesperado.
    #[error("plan.json inválido: {0}")]
    InvalidPlan(String),

    /// Campo obrigatório ausente (ou vazio após interpolação).
    #[error("Campo obrigatório ausente: {field}")]
    MissingField { field: String },

    /// Linha, célula ou elemento não localizado.
    #[error("{0}")]
    NotFound(String),

    /// Nenhum candidato aceitou nenhuma das estratégias de clique.
    #[error("Nenhum alvo clicável: {context}")]
    NoTargetClickable { context: String },

    /// Condições não atendidas de assertOnPage (todas listadas).
    #[error("Assertion falhou: {}", .unmet.join("; "))]
    AssertionFailed { unmet: Vec<String> },

    /// Tipo de step desconhecido.
    #[error("Tipo de step não suportado: {0}")]
    UnsupportedStep(String),

    /// Coordenador respondeu com status fora de 2xx.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Falha de transporte ao falar com o coordenador.
    #[error("Falha de conexão com o coordenador: {0}")]
    Transport(String),

    /// Os dois ramos de um `trySteps` falharam.
    #[error("trySteps falhou: steps: {primary} | fallbackSteps: {fallback}")]
    FallbackExhausted {
        primary: Box<AgentError>,
        fallback: Box<AgentError>,
    },

    /// Operação do navegador falhou (inclui timeouts).
    #[error("{operation} falhou: {message}")]
    Browser { operation: String, message: String },

    /// Pré-condição da ação não satisfeita (sessão, login, plano).
    #[error("{0}")]
    Precondition(String),

    /// Erro de I/O local.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Falha de uma ação do orquestrador, já enriquecida com evidência.
    #[error("{}", render_step_failure(.step, .cause, .evidence.as_ref()))]
    StepFailed {
        step: String,
        cause: Box<AgentError>,
        evidence: Option<Evidence>,
    },
}

fn render_step_failure(step: &str, cause: &AgentError, evidence: Option<&Evidence>) -> String {
    let base = format!("step={} error={}", step, cause);
    match evidence {
        Some(ev) => format!(
            "{} | evidence_path={} | sha256={} | size={}",
            base, ev.file_path, ev.sha256, ev.size
        ),
        None => base,
    }
}

impl AgentError {
    /// Atalho para erros do navegador.
    pub fn browser(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Browser {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Atalho para um único problema de configuração.
    pub fn config_invalid(issue: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            issues: vec![issue.into()],
        }
    }

    /// Código estruturado do erro.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigMissing { .. } => ErrorCode::CONFIG_MISSING,
            Self::ConfigInvalid { .. } => ErrorCode::CONFIG_INVALID,
            Self::InvalidPlan(_) => ErrorCode::PLAN_INVALID,
            Self::MissingField { .. } => ErrorCode::MISSING_FIELD,
            Self::NotFound(_) => ErrorCode::NOT_FOUND,
            Self::NoTargetClickable { .. } => ErrorCode::NO_TARGET_CLICKABLE,
            Self::AssertionFailed { .. } => ErrorCode::ASSERTION_FAILED,
            Self::UnsupportedStep(_) => ErrorCode::UNSUPPORTED_STEP,
            Self::Http { .. } => ErrorCode::HTTP_ERROR_STATUS,
            Self::Transport(_) => ErrorCode::HTTP_TRANSPORT,
            Self::FallbackExhausted { .. } => ErrorCode::FALLBACK_EXHAUSTED,
            Self::Browser { .. } => ErrorCode::BROWSER,
            Self::Precondition(_) => ErrorCode::PRECONDITION,
            Self::Io(_) => ErrorCode::IO,
            Self::StepFailed { .. } => ErrorCode::STEP_FAILED,
        }
    }

    /// Causa raiz, atravessando camadas de `StepFailed`.
    pub fn root_cause(&self) -> &AgentError {
        match self {
            Self::StepFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Mensagem de uma linha para o operador: `[E4003] ...`.
    pub fn user_message(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
