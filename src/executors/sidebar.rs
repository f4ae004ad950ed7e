//! `ensureSidebarOpen`: garante que a barra lateral do portal está aberta.
//!
//! Aberta = elemento existe, `display` diferente de `none` e largura de pelo
//! menos `minWidth` px. Já aberta não gera clique nenhum.

use std::time::Duration;

use tracing::{debug, info, instrument};

use super::require;
use crate::browser::{Locator, Page};
use crate::clicker::Clicker;
use crate::errors::{AgentError, AgentResult};
use crate::protocol::EnsureSidebarOpenStep;
use crate::retry::{poll_until, PollPolicy};

/// Largura mínima padrão para considerar a barra aberta.
pub const DEFAULT_MIN_WIDTH: f64 = 100.0;

pub async fn is_open(page: &dyn Page, sidebar: &Locator, min_width: f64) -> AgentResult<bool> {
    Ok(match page.metrics(sidebar).await? {
        Some(m) => m.display != "none" && m.width >= min_width,
        None => false,
    })
}

#[instrument(skip_all, fields(selector = step.selector.as_deref().unwrap_or("")))]
pub async fn ensure_sidebar_open(
    page: &dyn Page,
    step: &EnsureSidebarOpenStep,
    timeout: Duration,
    poll_interval: Duration,
) -> AgentResult<()> {
    let selector = require(&step.selector, "step.selector")?;
    let toggles: Vec<Locator> = step
        .toggle_selector
        .iter()
        .chain(step.toggle_selectors.iter())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Locator::new)
        .collect();
    if toggles.is_empty() {
        return Err(AgentError::MissingField {
            field: "step.toggleSelector".to_string(),
        });
    }

    let sidebar = Locator::new(selector).first();
    let min_width = step.min_width.unwrap_or(DEFAULT_MIN_WIDTH);

    if is_open(page, &sidebar, min_width).await.unwrap_or(false) {
        debug!("Barra lateral já aberta");
        return Ok(());
    }

    Clicker::new(page, timeout, "ensureSidebarOpen")
        .click_any(&toggles)
        .await?;

    let target = &sidebar;
    poll_until(
        "ensureSidebarOpen",
        timeout,
        PollPolicy::every(poll_interval),
        move || async move {
            Ok::<_, AgentError>(is_open(page, target, min_width).await?.then_some(()))
        },
    )
    .await
    .map_err(|_| {
        AgentError::browser(
            "ensureSidebarOpen",
            format!("{} seguía cerrado tras {}ms", selector, timeout.as_millis()),
        )
    })?;

    info!("Barra lateral aberta");
    Ok(())
}
