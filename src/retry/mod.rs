//! Módulo de Polling com prazo.
//!
//! Verifica uma condição repetidamente até ela ser satisfeita ou o prazo
//! acabar. Usado por `assertOnPage`, `waitForURL` e `ensureSidebarOpen`.
//!
//! - Intervalo constante entre verificações
//! - A última verificação acontece no prazo, nunca depois
//! - Erros da verificação não interrompem o polling; o último é devolvido

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

/// Política de polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Resultado de um polling que não atingiu a condição.
#[derive(Debug)]
pub enum PollError<E> {
    /// Prazo acabou; carrega o último estado observado.
    TimedOut { attempts: u32, last: Option<E> },
}

/// Chama `check` até ele devolver `Ok(Some(_))` ou o prazo acabar.
///
/// `Ok(None)` significa "ainda não"; `Err(e)` também continua tentando e é
/// guardado como último erro.
pub async fn poll_until<T, E, F, Fut>(
    label: &str,
    timeout: Duration,
    policy: PollPolicy,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;
    let mut last = None;

    loop {
        attempts += 1;
        match check().await {
            Ok(Some(value)) => {
                if attempts > 1 {
                    debug!(label = %label, attempts = attempts, "Condição atingida");
                }
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(label = %label, attempt = attempts, error = %e, "Verificação falhou");
                last = Some(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut { attempts, last });
        }

        sleep(policy.interval.min(deadline - now)).await;
    }
}
