//! # Localizador de Linhas e Células
//!
//! Encontra, numa tabela viva, a linha (ou célula) cujo texto normalizado
//! casa com um alvo.
//!
//! ## Normalização
//!
//! Espaços em sequência viram um só, bordas são aparadas e tudo vai para
//! minúsculas, tanto no alvo quanto no candidato:
//!
//! ```text
//! "  0\t1792049504001   RAZON Social " → "0 1792049504001 razon social"
//! ```
//!
//! ## Regras
//!
//! - Linhas: `tbody tr`; se não houver nenhuma, `tr` (tabelas sem cabeçalho)
//! - Primeiro índice que casa vence
//! - Leitura de texto que falha (elemento desanexado) conta como ""
//! - Cada varredura gera um trace com o texto (até 200 chars) de cada linha

use std::time::Duration;

use tracing::{debug, info};

use crate::browser::{Locator, Page};
use crate::errors::{AgentError, AgentResult};

/// Tamanho máximo de cada texto no trace.
pub const CLIP_LEN: usize = 200;

pub fn norm_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Corta em `max` caracteres e acrescenta "..." quando cortou.
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    Includes,
    Exact,
}

impl MatchMode {
    /// `None` ou vazio = `includes`.
    pub fn parse(raw: Option<&str>) -> AgentResult<Self> {
        match raw.map(|r| r.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("includes") => Ok(Self::Includes),
            Some("exact") => Ok(Self::Exact),
            Some(other) => Err(AgentError::config_invalid(format!(
                "match inválido: {}",
                other
            ))),
        }
    }

    pub fn matches(self, candidate: &str, target: &str) -> bool {
        match self {
            Self::Includes => candidate.contains(target),
            Self::Exact => candidate == target,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Includes => "includes",
            Self::Exact => "exact",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowMatch {
    pub row: Locator,
    pub row_index: usize,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellMatch {
    pub row: Locator,
    pub cell: Locator,
    pub row_index: usize,
}

/// Locator das linhas da tabela e quantas existem.
pub async fn table_rows(page: &dyn Page, table: &Locator) -> AgentResult<(Locator, usize)> {
    let rows = table.locator("tbody tr");
    let count = page.count(&rows).await?;
    if count > 0 {
        return Ok((rows, count));
    }
    let rows = table.locator("tr");
    let count = page.count(&rows).await?;
    Ok((rows, count))
}

/// Primeira linha cujo texto normalizado contém `target`.
pub async fn find_row(
    page: &dyn Page,
    table: &Locator,
    target: &str,
    timeout: Duration,
    log_prefix: &str,
) -> AgentResult<RowMatch> {
    let wanted = norm_text(target);
    if wanted.is_empty() {
        return Err(AgentError::MissingField {
            field: "step.rowText".to_string(),
        });
    }

    let (rows, row_count) = table_rows(page, table).await?;
    info!(prefix = %log_prefix, rows = row_count, "Linhas encontradas");

    let mut summaries = Vec::with_capacity(row_count);
    let mut matched = None;

    for i in 0..row_count {
        let raw = page
            .inner_text(&rows.nth(i), timeout)
            .await
            .unwrap_or_default();
        let normalized = norm_text(&raw);
        summaries.push(format!("#{}:{}", i, clip(&normalized, CLIP_LEN)));
        if matched.is_none() && normalized.contains(&wanted) {
            matched = Some(i);
        }
    }

    info!(prefix = %log_prefix, texts = %summaries.join(" | "), "Textos das linhas");

    match matched {
        Some(row_index) => {
            info!(prefix = %log_prefix, row_index = row_index, "Linha casada");
            Ok(RowMatch {
                row: rows.nth(row_index),
                row_index,
                row_count,
            })
        }
        None => Err(AgentError::NotFound(format!(
            "{} rowText not found: \"{}\"",
            log_prefix, target
        ))),
    }
}

/// Primeira linha cuja célula `cell_index` casa `target` segundo `mode`.
///
/// Linhas com menos células que `cell_index + 1` são puladas.
pub async fn find_cell(
    page: &dyn Page,
    table: &Locator,
    target: &str,
    cell_index: usize,
    mode: MatchMode,
    timeout: Duration,
    log_prefix: &str,
) -> AgentResult<CellMatch> {
    let wanted = norm_text(target);
    if wanted.is_empty() {
        return Err(AgentError::MissingField {
            field: "step.cellText".to_string(),
        });
    }

    let (rows, row_count) = table_rows(page, table).await?;
    info!(prefix = %log_prefix, rows = row_count, target = %wanted, mode = mode.as_str(), "Varrendo células");

    let mut summaries = Vec::with_capacity(row_count);
    let mut matched = None;

    for i in 0..row_count {
        let row = rows.nth(i);
        let cells = row.locator("td,th");
        let cell_count = page.count(&cells).await.unwrap_or(0);
        if cell_index >= cell_count {
            summaries.push(format!("#{}:<no cell {}>", i, cell_index));
            continue;
        }

        let cell = cells.nth(cell_index);
        let raw = page.inner_text(&cell, timeout).await.unwrap_or_default();
        let normalized = norm_text(&raw);
        summaries.push(format!("#{}:{}", i, clip(&normalized, CLIP_LEN)));

        if matched.is_none() && mode.matches(&normalized, &wanted) {
            matched = Some(CellMatch {
                row,
                cell,
                row_index: i,
            });
        }
    }

    info!(prefix = %log_prefix, texts = %summaries.join(" | "), "Textos das células");

    match matched {
        Some(m) => {
            debug!(prefix = %log_prefix, row_index = m.row_index, "Célula casada");
            Ok(m)
        }
        None => Err(AgentError::NotFound(format!(
            "{} cellText not found: \"{}\"",
            log_prefix, target
        ))),
    }
}
