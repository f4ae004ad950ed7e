//! Steps de um único alvo: `click`, `fill`, `select`, `press`, `expectText`
//! e o clique multi-estratégia `clickAny`.

use std::time::Duration;

use tracing::{info, instrument};

use super::{require, require_text};
use crate::browser::{ClickOptions, Locator, Page, SelectOption};
use crate::clicker::{ClickOutcome, Clicker};
use crate::errors::{AgentError, AgentResult};
use crate::protocol::{ClickAnyStep, ExpectTextStep, FillStep, PressStep, SelectStep, SelectorStep};

fn target(selector: &str) -> Locator {
    Locator::new(selector).first()
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn click(page: &dyn Page, step: &SelectorStep, timeout: Duration) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    page.click(&target(selector), ClickOptions::new(timeout)).await
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn fill(page: &dyn Page, step: &FillStep, timeout: Duration) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    let text = require_text(&step.text, "step.text")?;
    page.fill(&target(selector), text, timeout).await
}

/// Opção pedida por um `select`: `value`, senão `label`, senão `text` como rótulo.
pub fn select_option_of(step: &SelectStep) -> AgentResult<SelectOption> {
    if let Ok(value) = require_text(&step.value, "step.value") {
        return Ok(SelectOption::Value(value.to_string()));
    }
    if let Ok(label) = require_text(&step.label, "step.label") {
        return Ok(SelectOption::Label(label.to_string()));
    }
    if let Ok(text) = require_text(&step.text, "step.text") {
        return Ok(SelectOption::Label(text.to_string()));
    }
    Err(AgentError::MissingField {
        field: "step.value|step.label|step.text".to_string(),
    })
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn select(page: &dyn Page, step: &SelectStep, timeout: Duration) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    let option = select_option_of(step)?;
    page.select_option(&target(selector), &option, timeout).await
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn press(page: &dyn Page, step: &PressStep, timeout: Duration) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    let key = require_text(&step.key, "step.key")?;
    page.press(&target(selector), key, timeout).await
}

/// Falha se o texto do elemento não contém `text`.
///
/// Comparação sensível a maiúsculas e espaços, ao contrário das buscas em
/// tabela e do `assertOnPage`.
#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn expect_text(page: &dyn Page, step: &ExpectTextStep, timeout: Duration) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    let expected = require_text(&step.text, "step.text")?;
    let content = page.text_content(&target(selector), timeout).await?;
    match content {
        Some(text) if text.contains(expected) => Ok(()),
        _ => Err(AgentError::NotFound(format!(
            "Texto esperado no encontrado: {}",
            expected
        ))),
    }
}

#[instrument(skip_all, fields(selectors = step.selectors.len()))]
pub async fn click_any(
    page: &dyn Page,
    step: &ClickAnyStep,
    timeout: Duration,
) -> AgentResult<ClickOutcome> {
    let candidates: Vec<Locator> = step
        .selectors
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Locator::new)
        .collect();
    if candidates.is_empty() {
        return Err(AgentError::MissingField {
            field: "step.selectors".to_string(),
        });
    }

    if step.log_url {
        let url = page.url().await.unwrap_or_default();
        info!(url = %url, "clickAny url(antes)");
    }

    let outcome = Clicker::new(page, timeout, "clickAny")
        .click_any(&candidates)
        .await?;

    if step.log_url {
        let url = page.url().await.unwrap_or_default();
        info!(url = %url, "clickAny url(depois)");
    }
    Ok(outcome)
}
