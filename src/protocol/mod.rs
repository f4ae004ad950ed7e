//! # Protocolo - Tipos de Dados do Agente
//!
//! Estruturas serializáveis trocadas entre o arquivo de fluxo, o
//! coordenador e o executor de steps:
//!
//! - `Step`: uma instrução declarativa (goto, click, trySteps, ...)
//! - `Plan` / `PlanAction`: o plano baixado do coordenador
//! - `StepEvent`: evento de progresso enviado ao coordenador
//! - `StepLogEntry` / `SequenceReport`: log de execução de uma sequência
//! - `Evidence`: screenshot + hash + tamanho capturados numa falha

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::{ElementState, WaitUntil};
use crate::errors::{AgentError, AgentResult};

// ============================================================================
// STEP
// ============================================================================

/// Tipos de step aceitos pelo executor, na grafia do arquivo de fluxo.
pub const KNOWN_STEP_TYPES: &[&str] = &[
    "goto",
    "click",
    "clickAny",
    "fill",
    "select",
    "waitForSelector",
    "waitForURL",
    "expectText",
    "press",
    "assertOnPage",
    "clickRowAction",
    "clickTableCellLink",
    "trySteps",
    "ensureSidebarOpen",
    "runAction",
];

/// Um step já renderizado (interpolado) e tipado.
///
/// O arquivo de fluxo guarda os steps como templates JSON; a cada execução
/// o template é interpolado e só então convertido para esta enum.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "goto")]
    Goto(GotoStep),
    #[serde(rename = "click")]
    Click(SelectorStep),
    #[serde(rename = "clickAny")]
    ClickAny(ClickAnyStep),
    #[serde(rename = "fill")]
    Fill(FillStep),
    #[serde(rename = "select")]
    Select(SelectStep),
    #[serde(rename = "waitForSelector")]
    WaitForSelector(WaitForSelectorStep),
    #[serde(rename = "waitForURL")]
    WaitForUrl(WaitForUrlStep),
    #[serde(rename = "expectText")]
    ExpectText(ExpectTextStep),
    #[serde(rename = "press")]
    Press(PressStep),
    #[serde(rename = "assertOnPage")]
    AssertOnPage(AssertOnPageStep),
    #[serde(rename = "clickRowAction")]
    ClickRowAction(ClickRowActionStep),
    #[serde(rename = "clickTableCellLink")]
    ClickTableCellLink(ClickTableCellLinkStep),
    #[serde(rename = "trySteps")]
    TrySteps(TryStepsStep),
    #[serde(rename = "ensureSidebarOpen")]
    EnsureSidebarOpen(EnsureSidebarOpenStep),
    #[serde(rename = "runAction")]
    RunAction(RunActionStep),
}

impl Step {
    /// Converte um template já interpolado em `Step`.
    ///
    /// `type` ausente vira `MissingField`, tipo desconhecido vira
    /// `UnsupportedStep`, campos com formato errado viram `ConfigInvalid`.
    pub fn from_value(value: Value) -> AgentResult<Self> {
        let kind = step_type_of(&value)?;
        if !KNOWN_STEP_TYPES.contains(&kind.as_str()) {
            return Err(AgentError::UnsupportedStep(kind));
        }
        serde_json::from_value(value)
            .map_err(|e| AgentError::config_invalid(format!("step {}: {}", kind, e)))
    }

    /// Timeout próprio do step, se declarado.
    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            Step::Goto(s) => s.timeout,
            Step::Click(s) => s.timeout,
            Step::ClickAny(s) => s.timeout,
            Step::Fill(s) => s.timeout,
            Step::Select(s) => s.timeout,
            Step::WaitForSelector(s) => s.timeout,
            Step::WaitForUrl(s) => s.timeout,
            Step::ExpectText(s) => s.timeout,
            Step::Press(s) => s.timeout,
            Step::AssertOnPage(s) => s.timeout,
            Step::ClickRowAction(s) => s.timeout,
            Step::ClickTableCellLink(s) => s.timeout,
            Step::TrySteps(s) => s.timeout,
            Step::EnsureSidebarOpen(s) => s.timeout,
            Step::RunAction(_) => None,
        }
    }
}

/// Lê o campo `type` de um template de step.
pub fn step_type_of(value: &Value) -> AgentResult<String> {
    match value.get("type").and_then(Value::as_str) {
        Some(t) if !t.trim().is_empty() => Ok(t.to_string()),
        _ => Err(AgentError::MissingField {
            field: "step.type".to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GotoStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub url: Option<String>,
    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

/// Steps com um único seletor (click).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickAnyStep {
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub selectors: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub log_url: bool,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FillStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitForSelectorStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub state: Option<ElementState>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitForUrlStep {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub url: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectTextStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PressStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssertOnPageStep {
    #[serde(default)]
    pub url_pattern: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub any_text: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickRowActionStep {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub row_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub action_selectors: Vec<String>,
    /// Clica a própria linha quando nenhum seletor de ação responde.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub fallback_click: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub log_url: bool,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickTableCellLinkStep {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub row_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub cell_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub cell_index: Option<String>,
    #[serde(default, rename = "match")]
    pub match_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub target_selectors: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub link_selectors: Vec<String>,
    /// Força fallback para a linha mesmo quando a busca foi por `rowText`.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub fallback_click: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub log_url: bool,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TryStepsStep {
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub fallback_steps: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnsureSidebarOpenStep {
    /// Elemento cuja largura/display define aberto ou fechado.
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub toggle_selector: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub toggle_selectors: Vec<String>,
    /// Largura mínima (px) para considerar a barra aberta.
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub min_width: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunActionStep {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vars: Map<String, Value>,
}

impl RunActionStep {
    /// Nome do fluxo alvo (`actionName`, `action` ou `name`).
    pub fn target(&self) -> Option<&str> {
        [&self.action_name, &self.action, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.trim().is_empty())
    }
}

/// Desserializadores tolerantes para campos de template.
///
/// Depois da interpolação tudo é string, mas o JSON original pode trazer
/// números (`"cellIndex": 1`, `"text": 123`) ou uma string solta onde se
/// espera lista (`"anyText": "Guardado"`). Flags e números também chegam
/// como string depois de `{{var}}`.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(other) => Some(other.to_string()),
        })
    }

    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(other) => vec![other.to_string()],
        })
    }

    /// `"false"`, `"0"`, `"no"` e `""` contam como falso.
    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
            Some(Value::String(s)) => !matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "false" | "0" | "no" | "off"
            ),
            Some(_) => true,
        })
    }

    /// Número ou string numérica; o que não parseia vira `None` (padrão).
    pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite()))
    }

    pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(opt_f64(deserializer)?
            .filter(|f| *f >= 0.0)
            .map(|f| f as u64))
    }
}

// ============================================================================
// LOG DE EXECUÇÃO
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepLogStatus {
    Start,
    Ok,
}

/// Uma linha do log de sequência: um par start/ok por step executado.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepLogEntry {
    pub index: usize,
    #[serde(rename = "type")]
    pub step_type: String,
    pub ts: String,
    pub status: StepLogStatus,
}

/// Resultado de uma sequência executada até o fim.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SequenceReport {
    pub logs: Vec<StepLogEntry>,
}

// ============================================================================
// EVIDÊNCIA
// ============================================================================

/// Screenshot gravado em disco no momento de uma falha.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Evidence {
    pub file_path: String,
    pub sha256: String,
    pub size: u64,
}

// ============================================================================
// PLANO
// ============================================================================

/// Plano de classificação baixado do coordenador.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Plan {
    #[serde(default)]
    pub importacion_id: Option<Value>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub factura_limit: Option<u64>,
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default)]
    pub acciones: Option<Vec<PlanAction>>,
    #[serde(default)]
    pub actions: Option<Vec<PlanAction>>,
}

impl Plan {
    /// Itens do plano: `acciones` tem prioridade sobre `actions`.
    pub fn items(&self) -> &[PlanAction] {
        self.acciones
            .as_deref()
            .or(self.actions.as_deref())
            .unwrap_or(&[])
    }

    /// Item no índice pedido, limitado ao último (nunca além do fim).
    pub fn item_at(&self, index: usize) -> Option<&PlanAction> {
        let items = self.items();
        if items.is_empty() {
            return None;
        }
        items.get(index.min(items.len() - 1))
    }
}

/// Um item do plano. Mantém o objeto JSON inteiro: o coordenador pode
/// mandar campos extras e os ids chegam como números.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct PlanAction(pub Map<String, Value>);

impl PlanAction {
    /// Valor do campo como string; ausente, nulo, `false` ou vazio viram "".
    pub fn text(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Primeiro campo não vazio da lista.
    pub fn first_text(&self, keys: &[&str]) -> String {
        keys.iter()
            .map(|k| self.text(k))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }
}

impl From<Value> for PlanAction {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

// ============================================================================
// EVENTOS
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Ok,
    Error,
    Pending,
}

/// Evento de progresso enviado para `POST /api/agent/events`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepEvent {
    pub importacion_id: String,
    pub step: String,
    pub status: EventStatus,
    pub message: String,
    pub ts: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepEvent {
    pub fn new(
        importacion_id: impl Into<String>,
        step: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
        extra: Map<String, Value>,
    ) -> Self {
        Self {
            importacion_id: importacion_id.into(),
            step: step.into(),
            status,
            message: message.into(),
            ts: chrono::Utc::now().to_rfc3339(),
            extra,
        }
    }
}

/// Fotografia do estado da sessão para o operador.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub browser_open: bool,
    pub context_ready: bool,
    pub page_ready: bool,
    pub logged_in: bool,
    pub current_url: Option<String>,
}
