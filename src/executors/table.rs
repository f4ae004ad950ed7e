//! # Steps de Tabela
//!
//! Compõem o localizador de linhas/células com o clicador:
//!
//! ```text
//! clickRowAction:      tabela → linha(rowText) → actionSelectors → [linha]
//! clickTableCellLink:  tabela → célula(cellText, cellIndex) → links → célula → linha
//!                      tabela → linha(rowText) [→ célula(cellIndex)] → links → [linha]
//! ```
//!
//! O fallback célula/linha só roda quando a busca foi por célula, ou quando
//! o step pede `fallbackClick`.

use std::time::Duration;

use tracing::{info, instrument};

use super::require;
use crate::browser::{ElementState, Locator, Page};
use crate::clicker::{ClickOutcome, Clicker};
use crate::errors::{AgentError, AgentResult};
use crate::locator::{find_cell, find_row, MatchMode};
use crate::protocol::{ClickRowActionStep, ClickTableCellLinkStep};

/// Alvos clicáveis procurados numa célula quando o step não informa os seus.
pub const DEFAULT_LINK_SELECTORS: &[&str] =
    &["a[href]", "a[onclick]", "button[onclick]", "a", "button"];

fn clean_list(items: &[String]) -> Vec<&str> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn attached_table(page: &dyn Page, selector: &str, timeout: Duration) -> AgentResult<Locator> {
    let table = Locator::new(selector).first();
    page.wait_for(&table, ElementState::Attached, timeout).await?;
    Ok(table)
}

async fn log_url(page: &dyn Page, enabled: bool, prefix: &str, moment: &str) {
    if enabled {
        let url = page.url().await.unwrap_or_default();
        info!(prefix = %prefix, moment = %moment, url = %url, "URL");
    }
}

/// Índice de célula do step; ausente ou vazio é `None`.
pub fn parse_cell_index(raw: Option<&str>) -> AgentResult<Option<usize>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse::<usize>().map(Some).map_err(|_| {
            AgentError::config_invalid(format!("clickTableCellLink cellIndex inválido: {}", text))
        }),
    }
}

#[instrument(skip_all, fields(table = step.table.as_deref().unwrap_or("")))]
pub async fn click_row_action(
    page: &dyn Page,
    step: &ClickRowActionStep,
    timeout: Duration,
) -> AgentResult<ClickOutcome> {
    const PREFIX: &str = "clickRowAction";

    let table_selector = require(&step.table, "step.table")?;
    let row_text = require(&step.row_text, "step.rowText")?;
    let selectors = clean_list(&step.action_selectors);
    if selectors.is_empty() && !step.fallback_click {
        return Err(AgentError::MissingField {
            field: "step.actionSelectors".to_string(),
        });
    }

    log_url(page, step.log_url, PREFIX, "antes").await;

    let table = attached_table(page, table_selector, timeout).await?;
    let matched = find_row(page, &table, row_text, timeout, PREFIX).await?;

    let candidates: Vec<Locator> = selectors.iter().map(|s| matched.row.locator(s)).collect();
    let fallbacks = if step.fallback_click {
        vec![("row", matched.row.clone())]
    } else {
        Vec::new()
    };

    let outcome = Clicker::new(page, timeout, PREFIX)
        .click_with_fallback(&candidates, &fallbacks)
        .await?;

    log_url(page, step.log_url, PREFIX, "depois").await;
    Ok(outcome)
}

#[instrument(skip_all, fields(table = step.table.as_deref().unwrap_or("")))]
pub async fn click_table_cell_link(
    page: &dyn Page,
    step: &ClickTableCellLinkStep,
    timeout: Duration,
) -> AgentResult<ClickOutcome> {
    const PREFIX: &str = "clickTableCellLink";

    let table_selector = require(&step.table, "step.table")?;
    let row_text = require(&step.row_text, "step.rowText").ok();
    let cell_text = require(&step.cell_text, "step.cellText").ok();
    if row_text.is_none() && cell_text.is_none() {
        return Err(AgentError::MissingField {
            field: "step.rowText|step.cellText".to_string(),
        });
    }

    let mode = MatchMode::parse(step.match_mode.as_deref())?;
    let cell_index = parse_cell_index(step.cell_index.as_deref())?;
    let cell_lookup = match cell_text {
        Some(text) => {
            let index = cell_index.ok_or_else(|| AgentError::MissingField {
                field: "step.cellIndex".to_string(),
            })?;
            Some((text, index))
        }
        None => None,
    };

    let mut link_selectors = clean_list(&step.target_selectors);
    if link_selectors.is_empty() {
        link_selectors = clean_list(&step.link_selectors);
    }
    if link_selectors.is_empty() {
        link_selectors = DEFAULT_LINK_SELECTORS.to_vec();
    }

    info!(
        prefix = PREFIX,
        row_text = row_text.unwrap_or("n/a"),
        cell_text = cell_text.unwrap_or("n/a"),
        cell_index = ?cell_index,
        mode = mode.as_str(),
        selectors = ?link_selectors,
        "Procurando link"
    );
    log_url(page, step.log_url, PREFIX, "antes").await;

    let table = attached_table(page, table_selector, timeout).await?;

    let (scope, fallbacks) = match cell_lookup {
        Some((text, index)) => {
            let matched = find_cell(page, &table, text, index, mode, timeout, PREFIX).await?;
            let fallbacks = vec![("cell", matched.cell.clone()), ("row", matched.row)];
            (matched.cell, fallbacks)
        }
        None => {
            let text = row_text.unwrap_or_default();
            let matched = find_row(page, &table, text, timeout, PREFIX).await?;
            let fallbacks = if step.fallback_click {
                vec![("row", matched.row.clone())]
            } else {
                Vec::new()
            };
            let scope = match cell_index {
                Some(index) => {
                    let cells = matched.row.locator("td,th");
                    let count = page.count(&cells).await?;
                    if index >= count {
                        return Err(AgentError::NotFound(format!(
                            "{}: cellIndex {} fuera de rango (0-{})",
                            PREFIX,
                            index,
                            count.saturating_sub(1)
                        )));
                    }
                    cells.nth(index)
                }
                None => matched.row,
            };
            (scope, fallbacks)
        }
    };

    let candidates: Vec<Locator> = link_selectors.iter().map(|s| scope.locator(s)).collect();
    let outcome = Clicker::new(page, timeout, PREFIX)
        .click_with_fallback(&candidates, &fallbacks)
        .await?;

    log_url(page, step.log_url, PREFIX, "depois").await;
    Ok(outcome)
}
