//! # Módulo de Carregamento - Arquivo de Fluxo
//!
//! Lê o arquivo de fluxo (`sri_flow_config.json`) do disco.
//!
//! ## O que este módulo faz?
//!
//! 1. Lê o arquivo a cada chamada (sem cache: o operador pode editar o
//!    arquivo entre uma ação e outra)
//! 2. Parseia o JSON e exige um objeto na raiz
//! 3. Oferece leitura tipada das seções usadas pelo orquestrador
//!
//! ## Formato:
//!
//! ```json
//! {
//!   "target_url_login": "https://srienlinea.sri.gob.ec/...",
//!   "provider_open": { "steps": [ ... ] },
//!   "invoice_open": { "steps": [ ... ] },
//!   "apply": {
//!     "category_selector": "#categoria",
//!     "category_mode": "select",
//!     "category_map": { "VIVIENDA": { "value": "1" } },
//!     "confirm_selector": "#guardar"
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{AgentError, AgentResult};

/// Nomes das ações com seção própria no arquivo.
pub const PROVIDER_OPEN: &str = "provider_open";
pub const INVOICE_OPEN: &str = "invoice_open";
pub const APPLY: &str = "apply";

/// Arquivo de fluxo carregado. Mantém o JSON inteiro para `runAction`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    raw: Value,
}

/// Como a categoria é escolhida na tela.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoryMode {
    #[default]
    Select,
    Fill,
    Click,
}

impl CategoryMode {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            None | Some("") | Some("select") => Some(Self::Select),
            Some("fill") => Some(Self::Fill),
            Some("click") => Some(Self::Click),
            Some(_) => None,
        }
    }
}

/// Seção `apply` do arquivo de fluxo.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ApplyConfig {
    #[serde(default)]
    pub category_selector: Option<String>,
    #[serde(default)]
    pub confirm_selector: Option<String>,
    #[serde(default)]
    pub category_map: Option<Value>,
    #[serde(default)]
    pub category_mode: Option<String>,
    #[serde(default)]
    pub category_option_selector: Option<String>,
    #[serde(default)]
    pub steps_before_confirm: Vec<Value>,
    /// Elemento que aparece quando o portal aceitou a confirmação.
    #[serde(default)]
    pub confirm_success_selector: Option<String>,
}

impl ApplyConfig {
    pub fn mode(&self) -> CategoryMode {
        CategoryMode::parse(self.category_mode.as_deref()).unwrap_or_default()
    }
}

impl FlowConfig {
    pub fn from_value(raw: Value) -> AgentResult<Self> {
        if !raw.is_object() {
            return Err(AgentError::config_invalid("config missing"));
        }
        Ok(Self { raw })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Steps de uma ação (`{acao}.steps`), se houver.
    pub fn steps(&self, action: &str) -> Option<&[Value]> {
        self.raw
            .get(action)
            .and_then(|a| a.get("steps"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    /// Seção `apply` tipada; ausente vira config vazia.
    pub fn apply(&self) -> AgentResult<ApplyConfig> {
        match self.raw.get(APPLY) {
            None | Some(Value::Null) => Ok(ApplyConfig::default()),
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| AgentError::config_invalid(format!("apply: {}", e))),
        }
    }

    pub fn target_url_login(&self) -> String {
        self.raw
            .get("target_url_login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Lê e parseia o arquivo de fluxo.
///
/// Qualquer falha (arquivo ausente, JSON inválido, raiz que não é objeto)
/// vira `ConfigMissing` com o caminho.
pub fn load_flow_config<P: AsRef<Path>>(path: P) -> AgentResult<FlowConfig> {
    let path_ref = path.as_ref();
    let missing = |reason: String| AgentError::ConfigMissing {
        path: path_ref.display().to_string(),
        reason,
    };

    let content = fs::read_to_string(path_ref).map_err(|e| missing(e.to_string()))?;
    let raw: Value = serde_json::from_str(&content).map_err(|e| missing(e.to_string()))?;
    let config = FlowConfig::from_value(raw).map_err(|_| missing("raiz não é objeto".into()))?;

    debug!(path = %path_ref.display(), sections = config.raw.as_object().map_or(0, Map::len), "Fluxo carregado");
    Ok(config)
}
