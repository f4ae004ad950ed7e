//! # Orquestrador de Ações
//!
//! Liga os botões do operador (abrir navegador, abrir proveedor, abrir
//! factura, preparar e confirmar categoria) às sequências do arquivo de
//! fluxo, ao plano baixado e ao coordenador.
//!
//! ## Ciclo de uma ação:
//!
//! ```text
//! pré-condições ─> carrega + valida fluxo ─> contexto do item ─> steps
//!       │                                                          │
//!       └──────────────── erro ──┐                      ok ──> evento "ok"
//!                                ▼
//!              screenshot error_{step} (best-effort)
//!              evento "error" (best-effort, falha só vira warn)
//!              StepFailed { step, causa, evidência }
//! ```
//!
//! O cursor do plano só avança numa confirmação bem-sucedida, e nunca passa
//! do último item.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::browser::{ClickOptions, ElementState, Locator, Page, SelectOption, WaitUntil};
use crate::context::categoria::resolve_category_option;
use crate::context::{build_action_context, Context};
use crate::coordinator::Coordinator;
use crate::errors::{AgentError, AgentResult};
use crate::evidence;
use crate::executors::StepRunner;
use crate::limits::RunnerLimits;
use crate::loader::{load_flow_config, CategoryMode, FlowConfig, APPLY, INVOICE_OPEN, PROVIDER_OPEN};
use crate::protocol::{
    EventStatus, Evidence, Plan, PlanAction, SessionSnapshot, StepEvent, StepLogEntry,
};
use crate::session::SessionManager;
use crate::settings::AgentSettings;
use crate::validation::{require_config_for_action, validate_flow_config};

// ============================================================================
// RESULTADOS
// ============================================================================

/// Resultado de uma ação que roda uma sequência de steps.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRun {
    pub snapshot: SessionSnapshot,
    pub logs: Vec<StepLogEntry>,
}

/// Resultado do download do plano.
#[derive(Debug, Clone, Serialize)]
pub struct PlanLoaded {
    pub actions_count: usize,
    pub current_index: usize,
    pub current_item: Option<PlanAction>,
    /// Problemas do arquivo de fluxo no momento do download.
    pub config_issues: Vec<String>,
    pub config_error: Option<String>,
}

/// Opção de categoria efetivamente escolhida.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prepared {
    pub selected: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanCursor {
    pub current_index: usize,
    pub current_item: Option<PlanAction>,
}

/// Descrição do evento de uma ação.
struct EventSpec {
    step: String,
    message: String,
    extra: Map<String, Value>,
    emit_success: bool,
}

impl EventSpec {
    fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            extra: Map::new(),
            emit_success: true,
        }
    }

    fn with_factura(mut self, item: Option<&PlanAction>) -> Self {
        if let Some(id) = item.and_then(|i| i.0.get("factura_id")) {
            if !matches!(id, Value::Null | Value::Bool(false)) && id.as_str() != Some("") {
                self.extra.insert("factura_id".to_string(), id.clone());
            }
        }
        self
    }

    fn silent(mut self) -> Self {
        self.emit_success = false;
        self
    }
}

fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

// ============================================================================
// ORQUESTRADOR
// ============================================================================

pub struct ActionOrchestrator {
    session: SessionManager,
    coordinator: Arc<dyn Coordinator>,
    importacion_id: String,
    flow_config: PathBuf,
    evidence_dir: PathBuf,
    limits: RunnerLimits,
    plan: Option<Plan>,
    plan_index: usize,
}

impl ActionOrchestrator {
    pub fn new(
        session: SessionManager,
        coordinator: Arc<dyn Coordinator>,
        importacion_id: impl Into<String>,
        settings: &AgentSettings,
    ) -> AgentResult<Self> {
        let importacion_id = importacion_id.into();
        if importacion_id.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "importacion_id".to_string(),
            });
        }
        Ok(Self {
            session,
            coordinator,
            importacion_id,
            flow_config: settings.flow_config.clone(),
            evidence_dir: settings.evidence_dir.clone(),
            limits: settings.limits.clone(),
            plan: None,
            plan_index: 0,
        })
    }

    pub fn plan_index(&self) -> usize {
        self.plan_index
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn current_item(&self) -> Option<&PlanAction> {
        self.plan.as_ref()?.item_at(self.plan_index)
    }

    // ------------------------------------------------------------------------
    // Ações de sessão
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn open_browser(&mut self) -> AgentResult<SessionSnapshot> {
        let spec = EventSpec::new("browser_open", "Browser opened");
        let result = match self.session.ensure().await {
            Ok(_) => Ok(self.session.snapshot().await),
            Err(e) => Err(e),
        };
        self.report(spec, result).await
    }

    #[instrument(skip(self))]
    pub async fn goto(&mut self, url: &str) -> AgentResult<SessionSnapshot> {
        let spec = EventSpec::new("goto", format!("Navigated to {}", url));
        let result = self.navigate(url).await;
        self.report(spec, result).await
    }

    async fn navigate(&self, url: &str) -> AgentResult<SessionSnapshot> {
        if url.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "target URL".to_string(),
            });
        }
        let page = self.session.require_page()?;
        page.goto(url.trim(), WaitUntil::DomContentLoaded, self.limits.step_timeout)
            .await?;
        Ok(self.session.snapshot().await)
    }

    #[instrument(skip(self))]
    pub async fn mark_logged_in(&mut self) -> AgentResult<SessionSnapshot> {
        self.session.mark_logged_in();
        let spec = EventSpec::new("login_marked", "Login marked as complete");
        let snapshot = self.session.snapshot().await;
        self.report(spec, Ok(snapshot)).await
    }

    #[instrument(skip(self))]
    pub async fn status(&self) -> AgentResult<SessionSnapshot> {
        let spec = EventSpec::new("status_check", "Status checked");
        let snapshot = self.session.snapshot().await;
        self.report(spec, Ok(snapshot)).await
    }

    /// Fecha o navegador (fim da sessão do operador).
    pub async fn teardown(&mut self) -> AgentResult<()> {
        self.session.teardown().await
    }

    // ------------------------------------------------------------------------
    // Plano
    // ------------------------------------------------------------------------

    /// Baixa o plano, zera o cursor e reporta `plan_loaded`.
    #[instrument(skip(self), fields(importacion_id = %self.importacion_id))]
    pub async fn load_plan(&mut self) -> AgentResult<PlanLoaded> {
        let plan = self.coordinator.fetch_plan(&self.importacion_id).await?;
        let actions_count = plan.items().len();
        self.plan = Some(plan);
        self.plan_index = 0;

        let (config_issues, config_error) = match load_flow_config(&self.flow_config) {
            Ok(config) => (validate_flow_config(&config, &self.limits), None),
            Err(e) => (vec!["config missing".to_string()], Some(e.to_string())),
        };
        if !config_issues.is_empty() {
            warn!(issues = ?config_issues, "Arquivo de fluxo incompleto");
        }

        let event = StepEvent::new(
            self.importacion_id.as_str(),
            "plan_loaded",
            EventStatus::Ok,
            format!("Plan con {} acciones.", actions_count),
            Map::new(),
        );
        self.coordinator.post_event(&event).await?;

        info!(actions = actions_count, "Plano carregado");
        Ok(PlanLoaded {
            actions_count,
            current_index: self.plan_index,
            current_item: self.current_item().cloned(),
            config_issues,
            config_error,
        })
    }

    // ------------------------------------------------------------------------
    // Ações assistidas
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn provider_open(&mut self) -> AgentResult<FlowRun> {
        let item = self.current_item();
        let label = item
            .map(|i| i.first_text(&["proveedor_ruc", "proveedor_id"]))
            .unwrap_or_default();
        let spec = EventSpec::new(
            PROVIDER_OPEN,
            format!("Proveedor abierto ({}).", or_default(label, "N/A")),
        );
        let result = self.run_configured(PROVIDER_OPEN).await;
        self.report(spec, result).await
    }

    #[instrument(skip(self))]
    pub async fn invoice_open(&mut self) -> AgentResult<FlowRun> {
        let item = self.current_item();
        let label = item
            .map(|i| i.first_text(&["clave_acceso", "factura_id"]))
            .unwrap_or_default();
        let spec = EventSpec::new(
            INVOICE_OPEN,
            format!("Factura abierta ({}).", or_default(label, "N/A")),
        )
        .with_factura(item);
        let result = self.run_configured(INVOICE_OPEN).await;
        self.report(spec, result).await
    }

    /// Roda qualquer fluxo do arquivo pelo nome (`run <fluxo>` na CLI).
    #[instrument(skip(self))]
    pub async fn run_flow(&mut self, name: &str) -> AgentResult<FlowRun> {
        let spec = EventSpec::new(name, format!("Flujo {} ejecutado.", name))
            .with_factura(self.current_item());
        let result = self.run_configured(name).await;
        self.report(spec, result).await
    }

    /// Seleciona a categoria do item atual, sem confirmar.
    #[instrument(skip(self))]
    pub async fn apply_prepare(&mut self) -> AgentResult<Prepared> {
        let spec = EventSpec::new(APPLY, "Categoria preparada")
            .with_factura(self.current_item())
            .silent();
        let result = self.prepare_category().await;
        self.report(spec, result).await
    }

    /// Confirma a categoria e avança o cursor do plano.
    #[instrument(skip(self))]
    pub async fn apply_confirm(&mut self) -> AgentResult<PlanCursor> {
        let item = self.current_item();
        let categoria = item
            .map(|i| i.first_text(&["categoria_nombre", "categoria_id"]))
            .unwrap_or_default();
        let factura = item
            .map(|i| i.first_text(&["clave_acceso", "factura_id"]))
            .unwrap_or_default();
        let spec = EventSpec::new(
            APPLY,
            format!(
                "Categoria {} aplicada a {}.",
                or_default(categoria, "categoria"),
                or_default(factura, "factura")
            ),
        )
        .with_factura(item);
        let result = self.confirm_category().await;
        self.report(spec, result).await
    }

    /// Screenshot manual do operador.
    #[instrument(skip(self))]
    pub async fn screenshot(&self, label: Option<&str>) -> AgentResult<Evidence> {
        let label = label.map(str::trim).filter(|l| !l.is_empty()).unwrap_or("manual");
        let spec = EventSpec::new("screenshot", format!("Screenshot captured: {}", label));
        let result = match self.session.page() {
            Some(page) => evidence::capture(&*page, &self.evidence_dir, label).await,
            None => Err(AgentError::Precondition(
                "No active page to capture screenshot.".to_string(),
            )),
        };
        self.report(spec, result).await
    }

    // ------------------------------------------------------------------------
    // Corpo das ações
    // ------------------------------------------------------------------------

    /// Página pronta, login marcado, plano carregado e item atual.
    fn assisted_preconditions(&self) -> AgentResult<(Arc<dyn Page>, PlanAction)> {
        let page = self.session.require_logged_in()?;
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| AgentError::Precondition("Plan no cargado.".to_string()))?;
        let item = plan
            .item_at(self.plan_index)
            .cloned()
            .ok_or_else(|| AgentError::Precondition("Plan sin acciones disponibles.".to_string()))?;
        Ok((page, item))
    }

    /// Lê o arquivo do disco (sem cache) e exige a configuração da ação.
    fn require_config(&self, action: &str) -> AgentResult<FlowConfig> {
        let config = load_flow_config(&self.flow_config)?;
        require_config_for_action(&config, action, &self.limits)?;
        Ok(config)
    }

    fn step_context(item: &PlanAction, config: &FlowConfig) -> Context {
        let mut extras = Map::new();
        extras.insert(
            "target_url_login".to_string(),
            Value::String(config.target_url_login()),
        );
        build_action_context(item, &extras)
    }

    async fn run_configured(&self, action: &str) -> AgentResult<FlowRun> {
        let (page, item) = self.assisted_preconditions()?;
        let config = self.require_config(action)?;
        let ctx = Self::step_context(&item, &config);
        let steps = config.steps(action).unwrap_or(&[]);

        let report = StepRunner::new(&*page, self.limits.clone())
            .with_flows(config.raw())
            .run(action, steps, &ctx)
            .await?;

        Ok(FlowRun {
            snapshot: self.session.snapshot().await,
            logs: report.logs,
        })
    }

    async fn prepare_category(&self) -> AgentResult<Prepared> {
        let (page, item) = self.assisted_preconditions()?;
        let config = self.require_config(APPLY)?;
        let apply = config.apply()?;
        let ctx = Self::step_context(&item, &config);
        let timeout = self.limits.step_timeout;

        if !apply.steps_before_confirm.is_empty() {
            StepRunner::new(&*page, self.limits.clone())
                .with_flows(config.raw())
                .run("apply.steps_before_confirm", &apply.steps_before_confirm, &ctx)
                .await?;
        }

        let category_key = ["categoria_objetivo", "categoria_nombre", "categoria_id"]
            .iter()
            .map(|k| ctx.text(k))
            .find(|v| !v.is_empty())
            .ok_or_else(|| {
                AgentError::Precondition("Categoria objetivo no disponible en el plan.".to_string())
            })?
            .to_string();

        let map = apply.category_map.clone().unwrap_or(Value::Null);
        let option = resolve_category_option(&category_key, &map).ok_or_else(|| {
            AgentError::NotFound(format!("Sin mapeo para categoria: {}", category_key))
        })?;

        let selector = ctx.interpolate_str(apply.category_selector.as_deref().unwrap_or(""));
        if selector.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "apply.category_selector".to_string(),
            });
        }
        let target = Locator::new(&selector).first();

        let selected = match apply.mode() {
            CategoryMode::Fill => {
                let text = option
                    .text
                    .clone()
                    .or_else(|| option.label.clone())
                    .or_else(|| option.value.clone())
                    .unwrap_or_else(|| category_key.clone());
                page.fill(&target, &text, timeout).await?;
                text
            }
            CategoryMode::Click => {
                page.click(&target, ClickOptions::new(timeout)).await?;

                let mut option_ctx = ctx.clone();
                option_ctx.set("value", option.value.clone().unwrap_or_default());
                option_ctx.set(
                    "label",
                    option
                        .label
                        .clone()
                        .or_else(|| option.text.clone())
                        .unwrap_or_default(),
                );
                let option_selector = option_ctx
                    .interpolate_str(apply.category_option_selector.as_deref().unwrap_or(""));
                if option_selector.trim().is_empty() {
                    return Err(AgentError::MissingField {
                        field: "apply.category_option_selector".to_string(),
                    });
                }
                page.click(&Locator::new(&option_selector).first(), ClickOptions::new(timeout))
                    .await?;

                option
                    .value
                    .clone()
                    .or_else(|| option.label.clone())
                    .or_else(|| option.text.clone())
                    .unwrap_or_else(|| category_key.clone())
            }
            CategoryMode::Select => {
                let choice = match option.value.clone() {
                    Some(value) => SelectOption::Value(value),
                    None => SelectOption::Label(
                        option
                            .label
                            .clone()
                            .or_else(|| option.text.clone())
                            .unwrap_or_else(|| category_key.clone()),
                    ),
                };
                page.select_option(&target, &choice, timeout).await?;
                match choice {
                    SelectOption::Value(v) | SelectOption::Label(v) => v,
                }
            }
        };

        info!(categoria = %category_key, selected = %selected, mode = ?apply.mode(), "Categoria preparada");
        Ok(Prepared { selected })
    }

    async fn confirm_category(&mut self) -> AgentResult<PlanCursor> {
        let (page, item) = self.assisted_preconditions()?;
        let config = self.require_config(APPLY)?;
        let apply = config.apply()?;
        let ctx = Self::step_context(&item, &config);
        let timeout = self.limits.step_timeout;

        let selector = ctx.interpolate_str(apply.confirm_selector.as_deref().unwrap_or(""));
        if selector.trim().is_empty() {
            return Err(AgentError::MissingField {
                field: "apply.confirm_selector".to_string(),
            });
        }
        page.click(&Locator::new(&selector).first(), ClickOptions::new(timeout))
            .await?;

        let success = apply
            .confirm_success_selector
            .as_deref()
            .map(|s| ctx.interpolate_str(s))
            .filter(|s| !s.trim().is_empty());
        if let Some(success) = success {
            page.wait_for(&Locator::new(&success).first(), ElementState::Visible, timeout)
                .await?;
        }

        self.advance_cursor();
        Ok(PlanCursor {
            current_index: self.plan_index,
            current_item: self.current_item().cloned(),
        })
    }

    /// Avança um item, parando no último.
    fn advance_cursor(&mut self) {
        let len = self.plan.as_ref().map_or(0, |p| p.items().len());
        if self.plan_index + 1 < len {
            self.plan_index += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Eventos e evidência
    // ------------------------------------------------------------------------

    /// Fecha uma ação: evento `ok` no sucesso; no erro, evidência, evento
    /// `error` e `StepFailed`. Falhar ao postar o `ok` conta como erro da ação.
    async fn report<T>(&self, spec: EventSpec, result: AgentResult<T>) -> AgentResult<T> {
        let outcome = match result {
            Ok(value) if spec.emit_success => {
                let event = StepEvent::new(
                    self.importacion_id.as_str(),
                    spec.step.as_str(),
                    EventStatus::Ok,
                    spec.message.as_str(),
                    spec.extra.clone(),
                );
                self.coordinator.post_event(&event).await.map(|_| value)
            }
            other => other,
        };

        match outcome {
            Ok(value) => {
                info!(step = %spec.step, message = %spec.message, "Ação concluída");
                Ok(value)
            }
            Err(cause) => Err(self.fail(&spec, cause).await),
        }
    }

    async fn fail(&self, spec: &EventSpec, cause: AgentError) -> AgentError {
        let evidence = match self.session.page() {
            Some(page) => {
                let label = format!("error_{}", spec.step);
                match evidence::capture(&*page, &self.evidence_dir, &label).await {
                    Ok(ev) => Some(ev),
                    Err(e) => {
                        warn!(error = %e, "Screenshot de erro indisponível");
                        None
                    }
                }
            }
            None => None,
        };

        let failure = AgentError::StepFailed {
            step: spec.step.clone(),
            cause: Box::new(cause),
            evidence,
        };
        error!(code = %failure.code(), "{}", failure);

        let event = StepEvent::new(
            self.importacion_id.as_str(),
            spec.step.as_str(),
            EventStatus::Error,
            failure.to_string(),
            spec.extra.clone(),
        );
        if let Err(e) = self.coordinator.post_event(&event).await {
            warn!(error = %e, "Evento de erro não enviado; mantendo erro original");
        }

        failure
    }
}
