//! # Abstração do Navegador
//!
//! Tudo que o executor de steps precisa de uma página viva, atrás de traits
//! para que o mesmo código rode sobre o Chrome real (feature `chrome`) ou
//! sobre o DOM em memória dos testes.
//!
//! ## Hierarquia:
//!
//! ```text
//! BrowserLauncher ──launch──> BrowserHandle ──new_context──> ContextHandle
//!                                                              │
//!                                                          new_page
//!                                                              ▼
//!                                                         Arc<dyn Page>
//! ```
//!
//! ## Locators
//!
//! Um `Locator` é uma cadeia de partes `(seletor, nth?)` resolvida só no
//! momento da operação, igual ao encadeamento usado para varrer tabelas:
//!
//! ```text
//! table#anchoDoc >> nth=0 >> tbody tr >> nth=3 >> td,th >> nth=1 >> a[href]
//! ```
//!
//! Operações de um único elemento agem sobre o primeiro resolvido.

#[cfg(feature = "chrome")]
pub mod chrome;
#[cfg(test)]
pub mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::errors::{AgentError, AgentResult};

/// Seletor identidade: a parte mantém o conjunto atual em vez de descer.
pub const SCOPE: &str = ":scope";

/// Intervalo de polling das esperas padrão do trait.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// LOCATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocatorPart {
    pub selector: String,
    pub nth: Option<usize>,
}

/// Cadeia imutável de seletores, resolvida preguiçosamente.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    parts: Vec<LocatorPart>,
}

fn strip_engine(selector: &str) -> String {
    let trimmed = selector.trim();
    trimmed.strip_prefix("css=").unwrap_or(trimmed).trim().to_string()
}

impl Locator {
    pub fn new(selector: &str) -> Self {
        Self {
            parts: vec![LocatorPart {
                selector: strip_engine(selector),
                nth: None,
            }],
        }
    }

    /// Descendentes que casam `selector` dentro deste locator.
    pub fn locator(&self, selector: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(LocatorPart {
            selector: strip_engine(selector),
            nth: None,
        });
        Self { parts }
    }

    pub fn first(&self) -> Self {
        self.nth(0)
    }

    pub fn nth(&self, index: usize) -> Self {
        let mut parts = self.parts.clone();
        match parts.last_mut() {
            Some(last) if last.nth.is_none() => last.nth = Some(index),
            _ => parts.push(LocatorPart {
                selector: SCOPE.to_string(),
                nth: Some(index),
            }),
        }
        Self { parts }
    }

    pub fn parts(&self) -> &[LocatorPart] {
        &self.parts
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                write!(f, " >> ")?;
            }
            first = false;
            write!(f, "{}", part.selector)?;
            if let Some(n) = part.nth {
                write!(f, " >> nth={}", n)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// TIPOS DE OPERAÇÃO
// ============================================================================

/// Estado esperado por `waitForSelector`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    Attached,
    #[default]
    Visible,
    Hidden,
    Detached,
}

/// Condição de término de uma navegação.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
    Commit,
}

impl WaitUntil {
    /// `document.readyState` já satisfaz a condição? `Commit` dispensa o
    /// documento; `NetworkIdle` exige `complete` e depois uma janela sem
    /// novos recursos (ver [`NETWORK_QUIET_WINDOW`]).
    pub fn reached_by(self, ready_state: &str) -> bool {
        match self {
            Self::Commit => true,
            Self::DomContentLoaded => matches!(ready_state, "interactive" | "complete"),
            Self::Load | Self::NetworkIdle => ready_state == "complete",
        }
    }
}

/// Tempo sem recursos novos que conta como rede ociosa.
pub const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOption {
    Value(String),
    Label(String),
}

impl fmt::Display for SelectOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "value={}", v),
            Self::Label(l) => write!(f, "label={}", l),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickOptions {
    pub timeout: Duration,
    /// Ignora esperas de actionability além de visível/habilitado.
    pub force: bool,
}

impl ClickOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            force: false,
        }
    }

    pub fn forced(timeout: Duration) -> Self {
        Self {
            timeout,
            force: true,
        }
    }
}

/// Largura renderizada e `display` computado de um elemento.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementMetrics {
    pub width: f64,
    pub display: String,
}

// ============================================================================
// PAGE
// ============================================================================

/// Uma página viva. Todas as operações são assíncronas e limitadas por
/// timeout; estourar o timeout é uma falha comum (`AgentError::Browser`).
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> AgentResult<()>;

    async fn url(&self) -> AgentResult<String>;

    async fn count(&self, locator: &Locator) -> AgentResult<usize>;

    async fn inner_text(&self, locator: &Locator, timeout: Duration) -> AgentResult<String>;

    async fn text_content(&self, locator: &Locator, timeout: Duration)
        -> AgentResult<Option<String>>;

    async fn is_visible(&self, locator: &Locator) -> AgentResult<bool>;

    async fn is_enabled(&self, locator: &Locator) -> AgentResult<bool>;

    async fn scroll_into_view(&self, locator: &Locator, timeout: Duration) -> AgentResult<()>;

    /// Clique simulado (mouse) no primeiro elemento.
    async fn click(&self, locator: &Locator, options: ClickOptions) -> AgentResult<()>;

    /// `element.click()` executado dentro da página.
    async fn js_click(&self, locator: &Locator) -> AgentResult<()>;

    /// `dispatchEvent(new MouseEvent("click"))` sintético.
    async fn dispatch_click(&self, locator: &Locator) -> AgentResult<()>;

    async fn fill(&self, locator: &Locator, text: &str, timeout: Duration) -> AgentResult<()>;

    async fn select_option(
        &self,
        locator: &Locator,
        option: &SelectOption,
        timeout: Duration,
    ) -> AgentResult<()>;

    async fn press(&self, locator: &Locator, key: &str, timeout: Duration) -> AgentResult<()>;

    /// `None` quando o elemento não existe.
    async fn metrics(&self, locator: &Locator) -> AgentResult<Option<ElementMetrics>>;

    async fn body_text(&self) -> AgentResult<String>;

    async fn screenshot_png(&self, full_page: bool) -> AgentResult<Vec<u8>>;

    /// Espera o primeiro elemento atingir `state`.
    async fn wait_for(
        &self,
        locator: &Locator,
        state: ElementState,
        timeout: Duration,
    ) -> AgentResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let reached = match state {
                ElementState::Attached => self.count(locator).await.unwrap_or(0) > 0,
                ElementState::Detached => self.count(locator).await.unwrap_or(0) == 0,
                ElementState::Visible => self.is_visible(locator).await.unwrap_or(false),
                ElementState::Hidden => !self.is_visible(locator).await.unwrap_or(false),
            };
            if reached {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::browser(
                    "waitFor",
                    format!(
                        "timeout {}ms esperando {} ficar {:?}",
                        timeout.as_millis(),
                        locator,
                        state
                    ),
                ));
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

// ============================================================================
// CICLO DE VIDA
// ============================================================================

/// Fábrica de navegadores (um por sessão).
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> AgentResult<Box<dyn BrowserHandle>>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Contexto isolado (cookies próprios).
    async fn new_context(&self) -> AgentResult<Box<dyn ContextHandle>>;

    async fn close(&mut self) -> AgentResult<()>;
}

#[async_trait]
pub trait ContextHandle: Send + Sync {
    async fn new_page(&self) -> AgentResult<Arc<dyn Page>>;
}
