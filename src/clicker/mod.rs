//! # Clicador Multi-Estratégia
//!
//! Tenta clicar o primeiro alvo possível numa lista de candidatos.
//!
//! ## Para todos entenderem:
//!
//! O portal tem links que o clique "de mouse" não pega (overlays, handlers
//! em `onclick`, elementos fora da viewport). Para cada elemento visível e
//! habilitado tentamos, em ordem:
//!
//! 1. Clique direto forçado (com timeout)
//! 2. `element.click()` dentro da página
//! 3. `dispatchEvent(new MouseEvent("click"))`
//!
//! A primeira estratégia que funciona em qualquer elemento encerra tudo.
//! Elementos com contagem zero, invisíveis ou desabilitados são pulados sem
//! gastar tentativa.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{ClickOptions, Locator, Page};
use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    Direct,
    Programmatic,
    Dispatch,
}

impl fmt::Display for ClickStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Programmatic => write!(f, "programmatic"),
            Self::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Qual alvo aceitou o clique e como.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickOutcome {
    pub target: String,
    pub index: usize,
    pub strategy: ClickStrategy,
}

pub struct Clicker<'a> {
    page: &'a dyn Page,
    timeout: Duration,
    log_prefix: &'a str,
}

impl<'a> Clicker<'a> {
    pub fn new(page: &'a dyn Page, timeout: Duration, log_prefix: &'a str) -> Self {
        Self {
            page,
            timeout,
            log_prefix,
        }
    }

    /// Escalona as três estratégias sobre um único alvo.
    pub async fn escalate(&self, target: &Locator) -> AgentResult<ClickStrategy> {
        match self.page.click(target, ClickOptions::forced(self.timeout)).await {
            Ok(()) => return Ok(ClickStrategy::Direct),
            Err(e) => debug!(prefix = %self.log_prefix, target = %target, error = %e, "Clique direto falhou"),
        }

        match self.page.js_click(target).await {
            Ok(()) => return Ok(ClickStrategy::Programmatic),
            Err(e) => debug!(prefix = %self.log_prefix, target = %target, error = %e, "Clique programático falhou"),
        }

        match self.page.dispatch_click(target).await {
            Ok(()) => Ok(ClickStrategy::Dispatch),
            Err(e) => {
                debug!(prefix = %self.log_prefix, target = %target, error = %e, "Dispatch falhou");
                Err(AgentError::NoTargetClickable {
                    context: format!("{} {}", self.log_prefix, target),
                })
            }
        }
    }

    async fn scroll(&self, target: &Locator) {
        if let Err(e) = self.page.scroll_into_view(target, self.timeout).await {
            warn!(prefix = %self.log_prefix, target = %target, error = %e, "Scroll falhou");
        }
    }

    /// Percorre candidatos × elementos. `None` quando nada aceitou.
    pub async fn try_candidates(&self, candidates: &[Locator]) -> Option<ClickOutcome> {
        for candidate in candidates {
            let count = self.page.count(candidate).await.unwrap_or(0);
            debug!(prefix = %self.log_prefix, selector = %candidate, count = count, "Varrendo seletor");

            for i in 0..count {
                let element = candidate.nth(i);
                let visible = self.page.is_visible(&element).await.unwrap_or(false);
                let enabled = self.page.is_enabled(&element).await.unwrap_or(true);
                debug!(
                    prefix = %self.log_prefix,
                    selector = %candidate,
                    index = i,
                    visible = visible,
                    enabled = enabled,
                    "Candidato"
                );
                if !visible || !enabled {
                    continue;
                }

                self.scroll(&element).await;

                if let Ok(strategy) = self.escalate(&element).await {
                    info!(
                        prefix = %self.log_prefix,
                        selector = %candidate,
                        index = i,
                        strategy = %strategy,
                        "Clicado"
                    );
                    return Some(ClickOutcome {
                        target: candidate.to_string(),
                        index: i,
                        strategy,
                    });
                }
            }
        }
        None
    }

    /// Clica o primeiro candidato possível ou falha com `NoTargetClickable`.
    pub async fn click_any(&self, candidates: &[Locator]) -> AgentResult<ClickOutcome> {
        self.click_with_fallback(candidates, &[]).await
    }

    /// Como `click_any`, mas antes de falhar tenta os alvos de fallback
    /// (célula, depois linha) mesmo se invisíveis.
    pub async fn click_with_fallback(
        &self,
        candidates: &[Locator],
        fallbacks: &[(&str, Locator)],
    ) -> AgentResult<ClickOutcome> {
        if let Some(outcome) = self.try_candidates(candidates).await {
            return Ok(outcome);
        }

        if !fallbacks.is_empty() {
            info!(prefix = %self.log_prefix, "Nenhum link/botão clicável, tentando fallback");
        }
        for (label, target) in fallbacks {
            let visible = self.page.is_visible(target).await.unwrap_or(false);
            debug!(prefix = %self.log_prefix, fallback = %label, visible = visible, "Fallback");
            self.scroll(target).await;
            if let Ok(strategy) = self.escalate(target).await {
                info!(prefix = %self.log_prefix, fallback = %label, strategy = %strategy, "Fallback clicado");
                return Ok(ClickOutcome {
                    target: (*label).to_string(),
                    index: 0,
                    strategy,
                });
            }
        }

        let selectors: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        Err(AgentError::NoTargetClickable {
            context: format!("{} selectors={:?}", self.log_prefix, selectors),
        })
    }
}
