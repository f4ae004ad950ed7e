//! # Asserções de Página
//!
//! Verifica o estado atual da página contra até três condições
//! independentes, todas obrigatórias quando informadas:
//!
//! | Campo        | Condição                                              |
//! |--------------|-------------------------------------------------------|
//! | `urlPattern` | regex casa com a URL atual                            |
//! | `selector`   | primeiro elemento visível                             |
//! | `anyText`    | corpo normalizado contém QUALQUER um dos textos (OU)  |
//!
//! A regex é compilada antes de qualquer leitura da página. As condições são
//! reavaliadas até o prazo; se ainda faltar alguma, o erro lista todas.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument};

use crate::browser::{Locator, Page};
use crate::errors::{AgentError, AgentResult};
use crate::locator::norm_text;
use crate::protocol::AssertOnPageStep;
use crate::retry::{poll_until, PollError, PollPolicy};

/// Condições já validadas de um `assertOnPage`.
#[derive(Debug, Clone)]
pub struct PageExpectation {
    url_pattern: Option<Regex>,
    selector: Option<Locator>,
    /// Textos já normalizados.
    any_text: Vec<String>,
}

/// Condições que ainda não valem, na ordem url, seletor, texto.
#[derive(Debug, Clone, PartialEq)]
struct Unmet(Vec<String>);

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PageExpectation {
    /// Valida o step: pelo menos uma condição e regex compilável.
    pub fn from_step(step: &AssertOnPageStep) -> AgentResult<Self> {
        let url_pattern = match non_empty(&step.url_pattern) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                AgentError::config_invalid(format!("assertOnPage urlPattern inválido: {}", e))
            })?),
            None => None,
        };

        let selector = non_empty(&step.selector).map(|s| Locator::new(s).first());

        let any_text: Vec<String> = step
            .any_text
            .iter()
            .map(|t| norm_text(t))
            .filter(|t| !t.is_empty())
            .collect();

        if url_pattern.is_none() && selector.is_none() && any_text.is_empty() {
            return Err(AgentError::config_invalid(
                "assertOnPage requiere urlPattern, selector o anyText",
            ));
        }

        Ok(Self {
            url_pattern,
            selector,
            any_text,
        })
    }

    async fn unmet(&self, page: &dyn Page) -> Vec<String> {
        let mut unmet = Vec::new();

        if let Some(re) = &self.url_pattern {
            let url = page.url().await.unwrap_or_default();
            if !re.is_match(&url) {
                unmet.push(format!("url \"{}\" no casa /{}/", url, re.as_str()));
            }
        }

        if let Some(selector) = &self.selector {
            if !page.is_visible(selector).await.unwrap_or(false) {
                unmet.push(format!("selector {} no visible", selector));
            }
        }

        if !self.any_text.is_empty() {
            let body = norm_text(&page.body_text().await.unwrap_or_default());
            if !self.any_text.iter().any(|t| body.contains(t.as_str())) {
                unmet.push(format!("ningún texto presente: {:?}", self.any_text));
            }
        }

        unmet
    }
}

/// Espera até todas as condições valerem ou o prazo acabar.
#[instrument(skip(page, step), fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn assert_on_page(
    page: &dyn Page,
    step: &AssertOnPageStep,
    timeout: Duration,
    poll_interval: Duration,
) -> AgentResult<()> {
    let expectation = PageExpectation::from_step(step)?;
    let exp = &expectation;

    let result = poll_until(
        "assertOnPage",
        timeout,
        PollPolicy::every(poll_interval),
        move || async move {
            let unmet = exp.unmet(page).await;
            if unmet.is_empty() {
                Ok(Some(()))
            } else {
                debug!(unmet = unmet.len(), "Condições pendentes");
                Err(Unmet(unmet))
            }
        },
    )
    .await;

    match result {
        Ok(()) => {
            info!("assertOnPage ok");
            Ok(())
        }
        Err(PollError::TimedOut { last, .. }) => Err(AgentError::AssertionFailed {
            unmet: last.map(|u| u.0).unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{el, Effect, FakePage, ROOT};

    fn step(url: Option<&str>, selector: Option<&str>, any_text: &[&str]) -> AssertOnPageStep {
        AssertOnPageStep {
            url_pattern: url.map(String::from),
            selector: selector.map(String::from),
            any_text: any_text.iter().map(|s| s.to_string()).collect(),
            timeout: None,
        }
    }

    fn short() -> Duration {
        Duration::from_millis(60)
    }

    fn poll() -> Duration {
        Duration::from_millis(10)
    }

    #[tokio::test]
    async fn test_all_conditions_hold() {
        let page = FakePage::new("https://srienlinea.sri.gob.ec/comprobantes/recibidos");
        page.add(ROOT, el("div").id("panel").text("Comprobantes   RECIBIDOS"));

        let s = step(Some("comprobantes/recibidos$"), Some("#panel"), &["nada", "comprobantes recibidos"]);
        assert_on_page(&page, &s, short(), poll()).await.unwrap();
    }

    #[tokio::test]
    async fn test_lists_every_unmet_condition() {
        let page = FakePage::new("https://portal/inicio");
        page.add(ROOT, el("div").id("panel").hidden().text("Guardado"));

        let s = step(Some("perfil"), Some("#panel"), &["Guardado"]);
        let err = assert_on_page(&page, &s, short(), poll()).await.unwrap_err();

        match err {
            AgentError::AssertionFailed { unmet } => {
                assert_eq!(unmet.len(), 3);
                assert!(unmet[0].contains("perfil"));
                assert!(unmet[1].contains("#panel"));
                assert!(unmet[2].contains("guardado"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_reading_page() {
        let page = FakePage::new("https://portal/inicio");
        let s = step(Some("perfil("), Some("#nada"), &[]);
        let err = assert_on_page(&page, &s, short(), poll()).await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("urlPattern"));
    }

    #[tokio::test]
    async fn test_requires_some_condition() {
        let page = FakePage::new("about:blank");
        let s = step(Some("  "), None, &[""]);
        let err = assert_on_page(&page, &s, short(), poll()).await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn test_waits_for_condition_to_become_true() {
        let page = FakePage::new("https://portal/inicio");
        page.add(
            ROOT,
            el("button")
                .id("go")
                .on_click(Effect::Navigate("https://portal/perfil".into())),
        );

        let clicker_page = page.clone();
        let click = async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            clicker_page
                .click(
                    &Locator::new("#go"),
                    crate::browser::ClickOptions::new(Duration::from_millis(50)),
                )
                .await
        };

        let s = step(Some("/perfil$"), None, &[]);
        let (assertion, clicked) = tokio::join!(
            assert_on_page(&page, &s, Duration::from_millis(500), poll()),
            click
        );
        clicked.unwrap();
        assertion.unwrap();
    }
}
