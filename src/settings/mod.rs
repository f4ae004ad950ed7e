//! # Configuração do Agente
//!
//! Lida das variáveis de ambiente; as flags da CLI sobrescrevem.
//!
//! | Variável              | Padrão                            |
//! |-----------------------|-----------------------------------|
//! | `ANEXO_BASE_URL`      | `http://localhost:8000`           |
//! | `AGENT_TOKEN`         | -                                 |
//! | `IMPORTACION_ID`      | -                                 |
//! | `AGENT_FLOW_CONFIG`   | `sri_flow_config.json`            |
//! | `AGENT_EVIDENCE_DIR`  | `tmp/agent_desktop_screenshots`   |
//! | `AGENT_HEADLESS`      | `false`                           |
//! | `AGENT_CHROME_PATH`   | -                                 |
//!
//! Limites de execução: ver [`RunnerLimits::from_lookup`].

use std::path::PathBuf;

use crate::errors::{AgentError, AgentResult};
use crate::limits::RunnerLimits;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_FLOW_CONFIG: &str = "sri_flow_config.json";
pub const DEFAULT_EVIDENCE_DIR: &str = "tmp/agent_desktop_screenshots";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub importacion_id: Option<String>,
    pub flow_config: PathBuf,
    pub evidence_dir: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub limits: RunnerLimits,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            importacion_id: None,
            flow_config: PathBuf::from(DEFAULT_FLOW_CONFIG),
            evidence_dir: PathBuf::from(DEFAULT_EVIDENCE_DIR),
            headless: false,
            chrome_path: None,
            limits: RunnerLimits::default(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl AgentSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Mesmo que `from_env`, com uma fonte de variáveis qualquer.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            base_url: non_empty(get("ANEXO_BASE_URL")).unwrap_or(defaults.base_url),
            token: non_empty(get("AGENT_TOKEN")),
            importacion_id: non_empty(get("IMPORTACION_ID")),
            flow_config: non_empty(get("AGENT_FLOW_CONFIG"))
                .map(PathBuf::from)
                .unwrap_or(defaults.flow_config),
            evidence_dir: non_empty(get("AGENT_EVIDENCE_DIR"))
                .map(PathBuf::from)
                .unwrap_or(defaults.evidence_dir),
            headless: get("AGENT_HEADLESS").map_or(false, |v| parse_flag(&v)),
            chrome_path: non_empty(get("AGENT_CHROME_PATH")).map(PathBuf::from),
            limits: RunnerLimits::from_lookup(&get),
        }
    }

    pub fn require_token(&self) -> AgentResult<&str> {
        self.token.as_deref().ok_or_else(|| AgentError::MissingField {
            field: "token".to_string(),
        })
    }

    pub fn require_importacion_id(&self) -> AgentResult<&str> {
        self.importacion_id
            .as_deref()
            .ok_or_else(|| AgentError::MissingField {
                field: "importacion_id".to_string(),
            })
    }
}
