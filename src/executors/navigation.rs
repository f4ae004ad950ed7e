//! # Steps de Navegação
//!
//! - `goto`: navega e espera a condição de carga (`domcontentloaded` por padrão)
//! - `waitForURL`: URL literal (com `*` / `**`) ou regex em `pattern`
//! - `waitForSelector`: espera o estado pedido (`visible` por padrão)
//!
//! ## Globs de `waitForURL`
//!
//! ```text
//! https://portal/*/perfil     * casa qualquer coisa exceto "/"
//! https://portal/**           ** casa qualquer coisa
//! ```
//!
//! Sem curingas, a URL precisa ser idêntica.

use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument};

use super::require;
use crate::browser::{Locator, Page};
use crate::errors::{AgentError, AgentResult};
use crate::protocol::{GotoStep, WaitForSelectorStep, WaitForUrlStep};
use crate::retry::{poll_until, PollError, PollPolicy};

#[instrument(skip_all, fields(url = step.url.as_deref().unwrap_or("")))]
pub async fn goto(page: &dyn Page, step: &GotoStep, timeout: Duration) -> AgentResult<()> {
    let url = require(&step.url, "step.url")?;
    page.goto(url, step.wait_until.unwrap_or_default(), timeout)
        .await
}

// ============================================================================
// WAIT FOR URL
// ============================================================================

/// Critério de `waitForURL`.
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    Exact(String),
    Glob(Regex),
    Pattern(Regex),
}

impl UrlMatcher {
    /// `url` tem prioridade sobre `pattern`; um dos dois é obrigatório.
    pub fn from_step(step: &WaitForUrlStep) -> AgentResult<Self> {
        if let Ok(url) = require(&step.url, "step.url") {
            if url.contains('*') {
                return Ok(Self::Glob(glob_to_regex(url)?));
            }
            return Ok(Self::Exact(url.to_string()));
        }
        match require(&step.pattern, "step.pattern") {
            Ok(pattern) => Regex::new(pattern).map(Self::Pattern).map_err(|e| {
                AgentError::config_invalid(format!("waitForURL pattern inválido: {}", e))
            }),
            Err(_) => Err(AgentError::MissingField {
                field: "step.url|step.pattern".to_string(),
            }),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(expected) => url == expected,
            Self::Glob(re) | Self::Pattern(re) => re.is_match(url),
        }
    }
}

fn glob_to_regex(glob: &str) -> AgentResult<Regex> {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]*");
            }
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| AgentError::config_invalid(format!("waitForURL url inválida: {}", e)))
}

#[instrument(skip_all)]
pub async fn wait_for_url(
    page: &dyn Page,
    step: &WaitForUrlStep,
    timeout: Duration,
    poll_interval: Duration,
) -> AgentResult<()> {
    let matcher = UrlMatcher::from_step(step)?;
    let m = &matcher;

    let result = poll_until(
        "waitForURL",
        timeout,
        PollPolicy::every(poll_interval),
        move || async move {
            let url = page.url().await?;
            Ok::<_, AgentError>(if m.matches(&url) { Some(url) } else { None })
        },
    )
    .await;

    match result {
        Ok(url) => {
            info!(url = %url, "URL atingida");
            Ok(())
        }
        Err(PollError::TimedOut { last, .. }) => {
            let current = page.url().await.unwrap_or_default();
            let detail = last.map(|e| format!(" ({})", e)).unwrap_or_default();
            Err(AgentError::browser(
                "waitForURL",
                format!(
                    "timeout {}ms, url atual {}{}",
                    timeout.as_millis(),
                    current,
                    detail
                ),
            ))
        }
    }
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn wait_for_selector(
    page: &dyn Page,
    step: &WaitForSelectorStep,
    timeout: Duration,
) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    page.wait_for(
        &Locator::new(selector).first(),
        step.state.unwrap_or_default(),
        timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{el, FakePage, ROOT};
    use crate::browser::ElementState;

    fn url_step(url: Option<&str>, pattern: Option<&str>) -> WaitForUrlStep {
        WaitForUrlStep {
            url: url.map(String::from),
            pattern: pattern.map(String::from),
            timeout: None,
        }
    }

    #[test]
    fn test_url_matcher_glob() {
        let m = UrlMatcher::from_step(&url_step(Some("https://portal/*/perfil"), None)).unwrap();
        assert!(m.matches("https://portal/usuario/perfil"));
        assert!(!m.matches("https://portal/a/b/perfil"));

        let m = UrlMatcher::from_step(&url_step(Some("https://portal/**"), None)).unwrap();
        assert!(m.matches("https://portal/a/b/perfil?x=1"));
    }

    #[test]
    fn test_url_matcher_exact_and_pattern() {
        let m = UrlMatcher::from_step(&url_step(Some("https://portal/a?x=1"), Some("zzz"))).unwrap();
        assert!(m.matches("https://portal/a?x=1"));
        assert!(!m.matches("https://portal/a?x=12"));

        let m = UrlMatcher::from_step(&url_step(Some(""), Some("recibidos\\.jsf"))).unwrap();
        assert!(m.matches("https://portal/recibidos.jsf?id=3"));
    }

    #[test]
    fn test_url_matcher_requires_one() {
        let err = UrlMatcher::from_step(&url_step(None, Some(" "))).unwrap_err();
        assert!(matches!(err, AgentError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_url_times_out_with_current_url() {
        let page = FakePage::new("https://portal/inicio");
        let err = wait_for_url(
            &page,
            &url_step(None, Some("perfil")),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("https://portal/inicio"));
    }

    #[tokio::test]
    async fn test_goto_requires_url() {
        let page = FakePage::new("about:blank");
        let err = goto(&page, &GotoStep::default(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingField { ref field } if field == "step.url"));
        assert!(page.events().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_selector_states() {
        let page = FakePage::new("about:blank");
        page.add(ROOT, el("div").id("spinner").hidden());

        let hidden = WaitForSelectorStep {
            selector: Some("#spinner".into()),
            state: Some(ElementState::Hidden),
            timeout: None,
        };
        wait_for_selector(&page, &hidden, Duration::from_millis(50))
            .await
            .unwrap();

        let visible = WaitForSelectorStep {
            state: None,
            ..hidden
        };
        assert!(wait_for_selector(&page, &visible, Duration::from_millis(30))
            .await
            .is_err());
    }
}
