//! # Módulo de Validação do Arquivo de Fluxo
//!
//! Valida o arquivo de fluxo antes de cada ação para que um campo faltando
//! apareça como UMA mensagem com todos os problemas, e não como um erro no
//! meio de uma sequência já com cliques feitos no portal.
//!
//! ## Validações realizadas:
//!
//! 1. **Por ação**: `provider_open.steps`, `invoice_open.steps` e os campos
//!    da seção `apply` (seletores, mapa de categorias, modo)
//! 2. **Por step**: `type` conhecido e campos obrigatórios presentes no
//!    template (`{{var}}` conta como presente)
//! 3. **Aninhamento**: `trySteps` dentro de `trySteps` respeita os limites
//! 4. **runAction**: o fluxo alvo existe no arquivo
//!
//! ## Exemplo:
//!
//! ```text
//! Config requerida: apply.category_selector, apply.category_map (empty),
//! provider_open[1]: step clickTableCellLink sem rowText|cellText
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::errors::{AgentError, AgentResult};
use crate::limits::{validate_limits, RunnerLimits};
use crate::loader::{CategoryMode, FlowConfig, APPLY, INVOICE_OPEN, PROVIDER_OPEN};
use crate::protocol::{step_type_of, KNOWN_STEP_TYPES};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Problemas encontrados nos steps de um fluxo.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Step sem `type`.
    #[error("{flow}[{index}]: step sem type")]
    MissingStepType { flow: String, index: usize },

    /// `type` fora da lista de steps suportados.
    #[error("{flow}[{index}]: type '{step_type}' não suportado")]
    UnknownStepType {
        flow: String,
        index: usize,
        step_type: String,
    },

    /// Campo obrigatório ausente (alternativas separadas por `|`).
    #[error("{flow}[{index}]: step {step_type} sem {field}")]
    MissingField {
        flow: String,
        index: usize,
        step_type: String,
        field: String,
    },

    /// `runAction` aponta para um fluxo sem steps.
    #[error("{flow}[{index}]: runAction para fluxo inexistente '{action}'")]
    UnknownAction {
        flow: String,
        index: usize,
        action: String,
    },

    /// Limite de execução violado.
    #[error("{0}")]
    LimitExceeded(String),
}

// ============================================================================
// CONSTANTES
// ============================================================================

/// Campos exigidos por tipo. Cada entrada interna é uma lista de
/// alternativas: basta uma delas presente.
const REQUIRED_FIELDS: &[(&str, &[&[&str]])] = &[
    ("goto", &[&["url"]]),
    ("click", &[&["selector"]]),
    ("clickAny", &[&["selectors"]]),
    ("fill", &[&["selector"], &["text"]]),
    ("select", &[&["selector"], &["value", "label", "text"]]),
    ("waitForSelector", &[&["selector"]]),
    ("waitForURL", &[&["url", "pattern"]]),
    ("expectText", &[&["selector"], &["text"]]),
    ("press", &[&["selector"], &["key"]]),
    ("assertOnPage", &[&["urlPattern", "selector", "anyText"]]),
    ("clickRowAction", &[&["table"], &["rowText"], &["actionSelectors", "fallbackClick"]]),
    ("clickTableCellLink", &[&["table"], &["rowText", "cellText"]]),
    ("trySteps", &[&["steps"], &["fallbackSteps"]]),
    ("ensureSidebarOpen", &[&["selector"], &["toggleSelector", "toggleSelectors"]]),
    ("runAction", &[&["actionName", "action", "name"]]),
];

fn required_for(step_type: &str) -> &'static [&'static [&'static str]] {
    REQUIRED_FIELDS
        .iter()
        .find(|(t, _)| *t == step_type)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

/// Campo presente: não nulo, string não vazia, lista não vazia, `true`.
fn present(step: &Value, key: &str) -> bool {
    match step.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

// ============================================================================
// VALIDAÇÃO POR AÇÃO
// ============================================================================

/// Problemas de configuração de uma ação, na grafia dos campos do arquivo.
pub fn validate_config_for_action(config: &FlowConfig, action: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let raw = config.raw();

    match action {
        APPLY => {
            let apply = raw.get(APPLY).cloned().unwrap_or(Value::Null);
            if !present(&apply, "category_selector") {
                issues.push("apply.category_selector".to_string());
            }
            if !present(&apply, "confirm_selector") {
                issues.push("apply.confirm_selector".to_string());
            }
            match apply.get("category_map") {
                Some(Value::Object(map)) if map.is_empty() => {
                    issues.push("apply.category_map (empty)".to_string())
                }
                Some(Value::Object(_)) => {}
                _ => issues.push("apply.category_map".to_string()),
            }
            let mode = apply.get("category_mode").and_then(Value::as_str);
            match CategoryMode::parse(mode) {
                None => issues.push("apply.category_mode".to_string()),
                Some(CategoryMode::Click) if !present(&apply, "category_option_selector") => {
                    issues.push("apply.category_option_selector".to_string())
                }
                Some(_) => {}
            }
        }
        // provider_open, invoice_open e qualquer fluxo chamado por runAction
        _ => {
            if config.steps(action).map_or(true, <[Value]>::is_empty) {
                issues.push(format!("{}.steps", action));
            }
        }
    }

    issues
}

/// Exige a configuração de uma ação, falhando com todos os problemas.
pub fn require_config_for_action(
    config: &FlowConfig,
    action: &str,
    limits: &RunnerLimits,
) -> AgentResult<()> {
    let mut issues = validate_config_for_action(config, action);

    let steps = match action {
        APPLY => config
            .raw()
            .get(APPLY)
            .and_then(|a| a.get("steps_before_confirm"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => config.steps(action).unwrap_or(&[]),
    };
    issues.extend(
        validate_steps(config, action, steps, limits)
            .into_iter()
            .map(|e| e.to_string()),
    );

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AgentError::ConfigInvalid { issues })
    }
}

/// Relatório do arquivo inteiro: provider_open, invoice_open e apply, mais
/// os steps de todas as seções que tenham `steps`.
pub fn validate_flow_config(config: &FlowConfig, limits: &RunnerLimits) -> Vec<String> {
    let mut issues = Vec::new();
    for action in [PROVIDER_OPEN, INVOICE_OPEN, APPLY] {
        issues.extend(validate_config_for_action(config, action));
    }

    if let Some(sections) = config.raw().as_object() {
        for (name, section) in sections {
            if let Some(steps) = section.get("steps").and_then(Value::as_array) {
                issues.extend(
                    validate_steps(config, name, steps, limits)
                        .into_iter()
                        .map(|e| e.to_string()),
                );
            }
        }
    }

    if let Ok(apply) = config.apply() {
        let label = format!("{}.steps_before_confirm", APPLY);
        issues.extend(
            validate_steps(config, &label, &apply.steps_before_confirm, limits)
                .into_iter()
                .map(|e| e.to_string()),
        );
    }

    issues
}

// ============================================================================
// VALIDAÇÃO POR STEP
// ============================================================================

/// Valida templates de steps (sem interpolar).
pub fn validate_steps(
    config: &FlowConfig,
    flow: &str,
    steps: &[Value],
    limits: &RunnerLimits,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_level(config, flow, steps, 0, limits, &mut errors);
    errors
}

fn validate_level(
    config: &FlowConfig,
    flow: &str,
    steps: &[Value],
    depth: usize,
    limits: &RunnerLimits,
    errors: &mut Vec<ValidationError>,
) {
    let check = validate_limits(flow, steps.len(), depth, limits);
    errors.extend(
        check
            .violations
            .into_iter()
            .map(|v| ValidationError::LimitExceeded(v.message)),
    );
    if depth > limits.max_nesting {
        return;
    }

    for (index, step) in steps.iter().enumerate() {
        let step_type = match step_type_of(step) {
            Ok(t) => t,
            Err(_) => {
                errors.push(ValidationError::MissingStepType {
                    flow: flow.to_string(),
                    index,
                });
                continue;
            }
        };

        if !KNOWN_STEP_TYPES.contains(&step_type.as_str()) {
            errors.push(ValidationError::UnknownStepType {
                flow: flow.to_string(),
                index,
                step_type,
            });
            continue;
        }

        for alternatives in required_for(&step_type) {
            if !alternatives.iter().any(|k| present(step, k)) {
                errors.push(ValidationError::MissingField {
                    flow: flow.to_string(),
                    index,
                    step_type: step_type.clone(),
                    field: alternatives.join("|"),
                });
            }
        }

        match step_type.as_str() {
            "clickTableCellLink" if present(step, "cellText") && !present(step, "cellIndex") => {
                errors.push(ValidationError::MissingField {
                    flow: flow.to_string(),
                    index,
                    step_type: step_type.clone(),
                    field: "cellIndex".to_string(),
                });
            }
            "trySteps" => {
                for key in ["steps", "fallbackSteps"] {
                    if let Some(nested) = step.get(key).and_then(Value::as_array) {
                        let label = format!("{}[{}].{}", flow, index, key);
                        validate_level(config, &label, nested, depth + 1, limits, errors);
                    }
                }
            }
            "runAction" => {
                let target = ["actionName", "action", "name"]
                    .iter()
                    .filter_map(|k| step.get(*k).and_then(Value::as_str))
                    .find(|s| !s.trim().is_empty());
                if let Some(action) = target {
                    if config.steps(action).map_or(true, <[Value]>::is_empty) {
                        errors.push(ValidationError::UnknownAction {
                            flow: flow.to_string(),
                            index,
                            action: action.to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> FlowConfig {
        FlowConfig::from_value(value).unwrap()
    }

    fn limits() -> RunnerLimits {
        RunnerLimits::default()
    }

    #[test]
    fn test_provider_open_requires_steps() {
        let c = config(json!({ "provider_open": { "steps": [] } }));
        assert_eq!(validate_config_for_action(&c, PROVIDER_OPEN), vec!["provider_open.steps"]);
    }

    #[test]
    fn test_apply_lists_every_issue() {
        let c = config(json!({
            "apply": { "category_map": {}, "category_mode": "click" }
        }));
        assert_eq!(
            validate_config_for_action(&c, APPLY),
            vec![
                "apply.category_selector",
                "apply.confirm_selector",
                "apply.category_map (empty)",
                "apply.category_option_selector",
            ]
        );
    }

    #[test]
    fn test_apply_invalid_mode() {
        let c = config(json!({
            "apply": {
                "category_selector": "#c",
                "confirm_selector": "#ok",
                "category_map": { "SALUD": "Salud" },
                "category_mode": "hover"
            }
        }));
        assert_eq!(validate_config_for_action(&c, APPLY), vec!["apply.category_mode"]);
    }

    #[test]
    fn test_require_config_aggregates_into_config_invalid() {
        let c = config(json!({
            "provider_open": { "steps": [
                { "type": "click" },
                { "type": "hover", "selector": "#a" }
            ] }
        }));
        let err = require_config_for_action(&c, PROVIDER_OPEN, &limits()).unwrap_err();
        match err {
            AgentError::ConfigInvalid { issues } => {
                assert_eq!(issues.len(), 2);
                assert_eq!(issues[0], "provider_open[0]: step click sem selector");
                assert!(issues[1].contains("'hover'"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_placeholders_count_as_present() {
        let c = config(json!({
            "invoice_open": { "steps": [
                { "type": "fill", "selector": "#clave", "text": "{{clave_acceso}}" },
                { "type": "select", "selector": "#p", "label": "{{periodoTarget}}" }
            ] }
        }));
        assert!(require_config_for_action(&c, INVOICE_OPEN, &limits()).is_ok());
    }

    #[test]
    fn test_cell_text_requires_cell_index() {
        let c = config(json!({}));
        let errors = validate_steps(
            &c,
            "provider_open",
            &[json!({ "type": "clickTableCellLink", "table": "#t", "cellText": "x" })],
            &limits(),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().ends_with("sem cellIndex"));
    }

    #[test]
    fn test_nested_try_steps_and_run_action() {
        let c = config(json!({
            "provider_open_by_ruc": { "steps": [{ "type": "goto", "url": "x" }] }
        }));
        let steps = [json!({
            "type": "trySteps",
            "steps": [{ "type": "runAction", "action": "provider_open_by_ruc" }],
            "fallbackSteps": [{ "type": "runAction", "action": "nao_existe" }]
        })];
        let errors = validate_steps(&c, "e2e", &steps, &limits());
        assert_eq!(
            errors,
            vec![ValidationError::UnknownAction {
                flow: "e2e[0].fallbackSteps".to_string(),
                index: 0,
                action: "nao_existe".to_string(),
            }]
        );
    }

    #[test]
    fn test_nesting_limit() {
        let c = config(json!({}));
        let leaf = json!({ "type": "goto", "url": "x" });
        let level3 = json!({ "type": "trySteps", "steps": [leaf.clone()], "fallbackSteps": [leaf.clone()] });
        let level2 = json!({ "type": "trySteps", "steps": [level3.clone()], "fallbackSteps": [leaf.clone()] });
        let level1 = json!({ "type": "trySteps", "steps": [level2], "fallbackSteps": [leaf] });

        let errors = validate_steps(&c, "x", &[level1], &RunnerLimits::strict());
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::LimitExceeded(_))));
    }

    #[test]
    fn test_whole_config_report() {
        let c = config(json!({
            "provider_open": { "steps": [{ "type": "goto", "url": "x" }] },
            "apply": {
                "category_selector": "#c",
                "confirm_selector": "#ok",
                "category_map": { "SALUD": "Salud" },
                "steps_before_confirm": [{ "type": "press", "selector": "#c" }]
            }
        }));
        let issues = validate_flow_config(&c, &limits());
        assert_eq!(
            issues,
            vec![
                "invoice_open.steps".to_string(),
                "apply.steps_before_confirm[0]: step press sem key".to_string(),
            ]
        );
    }

    #[test]
    fn test_shipped_flow_config_is_valid() {
        let raw = include_str!("../../flows/sri_flow_config.json");
        let c = FlowConfig::from_value(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(validate_flow_config(&c, &limits()), Vec::<String>::new());
    }
}
