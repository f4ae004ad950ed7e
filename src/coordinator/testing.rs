//! Coordenador em memória para testes: entrega um plano fixo e grava os
//! eventos recebidos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Coordinator;
use crate::errors::{AgentError, AgentResult};
use crate::protocol::{Plan, StepEvent};

#[derive(Debug, Default)]
pub struct RecordingCoordinator {
    plan: Mutex<Option<Plan>>,
    events: Mutex<Vec<StepEvent>>,
    fail_events: AtomicBool,
}

impl RecordingCoordinator {
    pub fn with_plan(plan: Value) -> Self {
        let coordinator = Self::default();
        if let Ok(mut slot) = coordinator.plan.lock() {
            *slot = serde_json::from_value(plan).ok();
        }
        coordinator
    }

    /// Faz todo `post_event` falhar com HTTP 503 (o evento ainda é gravado).
    pub fn fail_events(&self) {
        self.fail_events.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.step).collect()
    }
}

#[async_trait]
impl Coordinator for RecordingCoordinator {
    async fn fetch_plan(&self, _importacion_id: &str) -> AgentResult<Plan> {
        self.plan
            .lock()
            .ok()
            .and_then(|p| p.clone())
            .ok_or(AgentError::Http {
                status: 404,
                body: "plan not found".to_string(),
            })
    }

    async fn post_event(&self, event: &StepEvent) -> AgentResult<Value> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(AgentError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(json!({ "ok": true }))
    }
}
