//! # Módulo de Limites de Execução
//!
//! Define os limites que protegem o executor de steps contra arquivos de
//! fluxo malformados: sequências gigantes, `trySteps`/`runAction` aninhados
//! sem fim e timeouts absurdos.
//!
//! ## Para todos entenderem:
//!
//! O portal é lento e às vezes trava. Um timeout por step evita que o
//! operador fique olhando uma tela parada; o limite de aninhamento evita que
//! um `runAction` chame a si mesmo para sempre.
//!
//! ## Limites configuráveis:
//!
//! | Limite           | Padrão   | Variável                  |
//! |------------------|----------|---------------------------|
//! | step_timeout     | 15000 ms | `AGENT_STEP_TIMEOUT_MS`   |
//! | poll_interval    | 250 ms   | `AGENT_POLL_INTERVAL_MS`  |
//! | max_nesting      | 5        | `AGENT_MAX_NESTING`       |
//! | max_steps        | 100      | `AGENT_MAX_STEPS`         |
//! | max_step_timeout | 120 s    | (fixo)                    |

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// LIMITES PADRÃO (CONSTANTES)
// ============================================================================

/// Timeout padrão de cada operação de página.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 15_000;

/// Intervalo entre verificações de condições (assertOnPage, sidebar, waitForURL).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Profundidade máxima de `trySteps` / `runAction` aninhados.
pub const DEFAULT_MAX_NESTING: usize = 5;

/// Número máximo de steps numa sequência.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Teto aplicado ao `timeout` declarado por um step.
pub const DEFAULT_MAX_STEP_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// ESTRUTURA DE LIMITES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerLimits {
    /// Timeout usado quando o step não declara o seu.
    pub step_timeout: Duration,

    pub poll_interval: Duration,

    pub max_nesting: usize,

    pub max_steps: usize,

    /// Timeouts declarados acima disso são reduzidos.
    pub max_step_timeout: Duration,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_nesting: DEFAULT_MAX_NESTING,
            max_steps: DEFAULT_MAX_STEPS,
            max_step_timeout: Duration::from_secs(DEFAULT_MAX_STEP_TIMEOUT_SECS),
        }
    }
}

impl RunnerLimits {
    /// Cria limites a partir de variáveis de ambiente.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Valores que não parseiam são ignorados (fica o padrão).
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut limits = Self::default();

        if let Some(ms) = number("AGENT_STEP_TIMEOUT_MS") {
            limits.step_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = number("AGENT_POLL_INTERVAL_MS") {
            limits.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = number("AGENT_MAX_NESTING") {
            limits.max_nesting = n as usize;
        }
        if let Some(n) = number("AGENT_MAX_STEPS") {
            limits.max_steps = n as usize;
        }

        limits
    }

    /// Limites curtos para testes.
    pub fn strict() -> Self {
        Self {
            step_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            max_nesting: 2,
            max_steps: 20,
            max_step_timeout: Duration::from_secs(2),
        }
    }

    /// Timeout efetivo: o do step (limitado pelo teto) ou o padrão.
    pub fn timeout_for(&self, declared_ms: Option<u64>) -> Duration {
        match declared_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms).min(self.max_step_timeout),
            _ => self.step_timeout,
        }
    }
}

// ============================================================================
// VALIDAÇÃO DE LIMITES
// ============================================================================

#[derive(Debug)]
pub struct LimitValidationResult {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    pub actual_value: String,
    pub message: String,
}

/// Valida uma sequência (contagem de steps e profundidade de aninhamento).
pub fn validate_limits(
    flow: &str,
    step_count: usize,
    nesting_depth: usize,
    limits: &RunnerLimits,
) -> LimitValidationResult {
    let mut violations = Vec::new();

    if step_count > limits.max_steps {
        violations.push(LimitViolation {
            limit_name: "max_steps".to_string(),
            limit_value: limits.max_steps.to_string(),
            actual_value: step_count.to_string(),
            message: format!(
                "{} tem {} steps, máximo permitido é {}",
                flow, step_count, limits.max_steps
            ),
        });
    }

    if nesting_depth > limits.max_nesting {
        violations.push(LimitViolation {
            limit_name: "max_nesting".to_string(),
            limit_value: limits.max_nesting.to_string(),
            actual_value: nesting_depth.to_string(),
            message: format!(
                "{} aninha {} níveis de trySteps/runAction, máximo permitido é {}",
                flow, nesting_depth, limits.max_nesting
            ),
        });
    }

    LimitValidationResult {
        passed: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RunnerLimits::default();
        assert_eq!(limits.step_timeout, Duration::from_millis(15_000));
        assert_eq!(limits.max_nesting, 5);
        assert_eq!(limits.max_steps, 100);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let limits = RunnerLimits::from_lookup(|key| match key {
            "AGENT_STEP_TIMEOUT_MS" => Some(" 4000 ".to_string()),
            "AGENT_MAX_NESTING" => Some("muitos".to_string()),
            _ => None,
        });
        assert_eq!(limits.step_timeout, Duration::from_millis(4_000));
        assert_eq!(limits.max_nesting, DEFAULT_MAX_NESTING);
    }

    #[test]
    fn test_timeout_for() {
        let limits = RunnerLimits::default();
        assert_eq!(limits.timeout_for(None), Duration::from_millis(15_000));
        assert_eq!(limits.timeout_for(Some(0)), Duration::from_millis(15_000));
        assert_eq!(limits.timeout_for(Some(2_000)), Duration::from_millis(2_000));
        assert_eq!(limits.timeout_for(Some(999_999)), Duration::from_secs(120));
    }

    #[test]
    fn test_validate_limits_ok() {
        let result = validate_limits("provider_open", 10, 1, &RunnerLimits::default());
        assert!(result.passed);
    }

    #[test]
    fn test_validate_limits_reports_both() {
        let result = validate_limits("apply", 30, 3, &RunnerLimits::strict());
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 2);
        assert_eq!(result.violations[0].limit_name, "max_steps");
        assert_eq!(result.violations[1].limit_name, "max_nesting");
    }
}
