//! # Executor de Sequências de Steps
//!
//! A máquina de estados central do agente: recebe uma lista de templates de
//! step, renderiza cada um com o contexto e despacha para o executor do tipo.
//!
//! ## Ciclo de um step:
//!
//! ```text
//! template ──render──> JSON ──Step::from_value──> Step ──execute──> ok
//!                                   │                      │
//!                          log "start" gravado      log "ok" gravado
//! ```
//!
//! - Steps rodam estritamente em ordem; o primeiro erro aborta a sequência
//! - `trySteps` é a única recuperação: falhou `steps`, roda `fallbackSteps`
//! - `runAction` executa os steps de outro fluxo do arquivo de configuração
//! - Aninhamento (`trySteps`, `runAction`) limitado por `RunnerLimits::max_nesting`
//!
//! ## Submódulos:
//!
//! - `navigation`: goto, waitForURL, waitForSelector
//! - `interaction`: click, fill, select, press, expectText, clickAny
//! - `table`: clickRowAction, clickTableCellLink
//! - `sidebar`: ensureSidebarOpen

pub mod interaction;
pub mod navigation;
pub mod sidebar;
pub mod table;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assertion::assert_on_page;
use crate::browser::Page;
use crate::context::{Context, Interpolation};
use crate::errors::{AgentError, AgentResult};
use crate::limits::{validate_limits, RunnerLimits};
use crate::protocol::{
    RunActionStep, SequenceReport, Step, StepLogEntry, StepLogStatus, TryStepsStep,
};

type StepFuture<'a, T> = Pin<Box<dyn Future<Output = AgentResult<T>> + Send + 'a>>;

/// Valor obrigatório do step, aparado. Vazio conta como ausente.
pub(crate) fn require<'v>(value: &'v Option<String>, field: &str) -> AgentResult<&'v str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AgentError::MissingField {
            field: field.to_string(),
        }),
    }
}

/// Texto digitado ou comparado: só a string vazia conta como ausente, e o
/// valor segue sem aparar.
pub(crate) fn require_text<'v>(value: &'v Option<String>, field: &str) -> AgentResult<&'v str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AgentError::MissingField {
            field: field.to_string(),
        }),
    }
}

fn log_entry(index: usize, step_type: &str, status: StepLogStatus) -> StepLogEntry {
    StepLogEntry {
        index,
        step_type: step_type.to_string(),
        ts: chrono::Utc::now().to_rfc3339(),
        status,
    }
}

// ============================================================================
// STEP RUNNER
// ============================================================================

/// Executa sequências contra uma página.
///
/// Não guarda estado entre execuções: cada `run` produz um log novo.
pub struct StepRunner<'a> {
    page: &'a dyn Page,
    limits: RunnerLimits,
    interpolation: Interpolation,
    /// Arquivo de fluxo completo, para resolver `runAction`.
    flows: Option<&'a Value>,
}

impl<'a> StepRunner<'a> {
    pub fn new(page: &'a dyn Page, limits: RunnerLimits) -> Self {
        Self {
            page,
            limits,
            interpolation: Interpolation::default(),
            flows: None,
        }
    }

    pub fn with_interpolation(mut self, mode: Interpolation) -> Self {
        self.interpolation = mode;
        self
    }

    pub fn with_flows(mut self, flows: &'a Value) -> Self {
        self.flows = Some(flows);
        self
    }

    /// Roda a sequência com o timeout padrão dos limites.
    pub async fn run(&self, flow: &str, steps: &[Value], ctx: &Context) -> AgentResult<SequenceReport> {
        self.run_with_timeout(flow, steps, ctx, self.limits.step_timeout)
            .await
    }

    /// Roda a sequência usando `timeout` para steps que não declaram o seu.
    pub async fn run_with_timeout(
        &self,
        flow: &str,
        steps: &[Value],
        ctx: &Context,
        timeout: Duration,
    ) -> AgentResult<SequenceReport> {
        info!(flow = %flow, steps = steps.len(), "Iniciando sequência");
        let report = self.run_at(flow, steps, ctx, timeout, 0).await?;
        info!(flow = %flow, steps = steps.len(), "Sequência concluída");
        Ok(report)
    }

    fn step_timeout(&self, step: &Step, default: Duration) -> Duration {
        match step.timeout_ms() {
            Some(ms) if ms > 0 => self.limits.timeout_for(Some(ms)),
            _ => default,
        }
    }

    fn run_at<'s>(
        &'s self,
        flow: &'s str,
        steps: &'s [Value],
        ctx: &'s Context,
        default_timeout: Duration,
        depth: usize,
    ) -> StepFuture<'s, SequenceReport> {
        Box::pin(async move {
            if steps.is_empty() {
                return Err(AgentError::config_invalid("steps vacios"));
            }

            let check = validate_limits(flow, steps.len(), depth, &self.limits);
            if !check.passed {
                return Err(AgentError::ConfigInvalid {
                    issues: check.violations.into_iter().map(|v| v.message).collect(),
                });
            }

            let mut report = SequenceReport::default();

            for (index, template) in steps.iter().enumerate() {
                let rendered = ctx.render(template, self.interpolation)?;
                let kind = rendered
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                report
                    .logs
                    .push(log_entry(index, &kind, StepLogStatus::Start));
                debug!(flow = %flow, index = index, step = %kind, depth = depth, "Step start");

                let step = Step::from_value(rendered)?;
                let timeout = self.step_timeout(&step, default_timeout);
                self.execute(flow, step, ctx, timeout, depth).await?;

                report.logs.push(log_entry(index, &kind, StepLogStatus::Ok));
                info!(flow = %flow, index = index, step = %kind, "Step ok");
            }

            Ok(report)
        })
    }

    async fn execute(
        &self,
        flow: &str,
        step: Step,
        ctx: &Context,
        timeout: Duration,
        depth: usize,
    ) -> AgentResult<()> {
        let page = self.page;
        let poll = self.limits.poll_interval;

        match step {
            Step::Goto(s) => navigation::goto(page, &s, timeout).await,
            Step::WaitForUrl(s) => navigation::wait_for_url(page, &s, timeout, poll).await,
            Step::WaitForSelector(s) => navigation::wait_for_selector(page, &s, timeout).await,
            Step::Click(s) => interaction::click(page, &s, timeout).await,
            Step::Fill(s) => interaction::fill(page, &s, timeout).await,
            Step::Select(s) => interaction::select(page, &s, timeout).await,
            Step::Press(s) => interaction::press(page, &s, timeout).await,
            Step::ExpectText(s) => interaction::expect_text(page, &s, timeout).await,
            Step::ClickAny(s) => interaction::click_any(page, &s, timeout).await.map(|_| ()),
            Step::AssertOnPage(s) => assert_on_page(page, &s, timeout, poll).await,
            Step::ClickRowAction(s) => table::click_row_action(page, &s, timeout).await.map(|_| ()),
            Step::ClickTableCellLink(s) => table::click_table_cell_link(page, &s, timeout)
                .await
                .map(|_| ()),
            Step::EnsureSidebarOpen(s) => {
                sidebar::ensure_sidebar_open(page, &s, timeout, poll).await
            }
            Step::TrySteps(s) => self.try_steps(flow, &s, ctx, timeout, depth).await,
            Step::RunAction(s) => self.run_action(&s, ctx, timeout, depth).await,
        }
    }

    async fn try_steps(
        &self,
        flow: &str,
        step: &TryStepsStep,
        ctx: &Context,
        timeout: Duration,
        depth: usize,
    ) -> AgentResult<()> {
        let label = format!("{}.trySteps", flow);

        let primary = match self.run_at(&label, &step.steps, ctx, timeout, depth + 1).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        warn!(flow = %flow, error = %primary, "trySteps: steps falhou, rodando fallbackSteps");

        let label = format!("{}.fallbackSteps", flow);
        match self
            .run_at(&label, &step.fallback_steps, ctx, timeout, depth + 1)
            .await
        {
            Ok(_) => {
                info!(flow = %flow, "trySteps: fallbackSteps ok");
                Ok(())
            }
            Err(fallback) => Err(AgentError::FallbackExhausted {
                primary: Box::new(primary),
                fallback: Box::new(fallback),
            }),
        }
    }

    async fn run_action(
        &self,
        step: &RunActionStep,
        ctx: &Context,
        timeout: Duration,
        depth: usize,
    ) -> AgentResult<()> {
        let name = step.target().ok_or_else(|| AgentError::MissingField {
            field: "step.action".to_string(),
        })?;

        let steps = self
            .flows
            .and_then(|flows| flows.get(name))
            .and_then(|action| action.get("steps"))
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::config_invalid(format!("{}.steps", name)))?;

        let nested = ctx.overlay(&step.vars);
        debug!(action = %name, vars = step.vars.len(), "runAction");
        self.run_at(name, steps, &nested, timeout, depth + 1)
            .await
            .map(|_| ())
    }
}
