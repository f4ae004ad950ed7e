//! # Sessão do Navegador
//!
//! Dona única do conjunto navegador → contexto → página. Cria cada nível
//! só quando falta, na ordem de dependência. Um contexto novo não tem
//! cookies, então sempre zera o flag de login.
//!
//! ```text
//! ensure():   [browser?] ──> [context?] ──> [page?]
//!                               └── novo contexto ⇒ logged_in = false
//! teardown(): close(browser); browser = context = page = None; logged_in = false
//! ```

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::browser::{BrowserHandle, BrowserLauncher, ContextHandle, Page};
use crate::errors::{AgentError, AgentResult};
use crate::protocol::SessionSnapshot;

pub const PAGE_NOT_READY: &str = "Browser page is not ready. Open the browser first.";
pub const LOGIN_PENDING: &str = "Login pendiente. Marca 'Ya inicie sesion (continuar)'.";

pub struct SessionManager {
    launcher: Box<dyn BrowserLauncher>,
    browser: Option<Box<dyn BrowserHandle>>,
    context: Option<Box<dyn ContextHandle>>,
    page: Option<Arc<dyn Page>>,
    logged_in: bool,
}

impl SessionManager {
    pub fn new(launcher: Box<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            browser: None,
            context: None,
            page: None,
            logged_in: false,
        }
    }

    /// Garante navegador, contexto e página, criando só o que falta.
    #[instrument(skip(self))]
    pub async fn ensure(&mut self) -> AgentResult<Arc<dyn Page>> {
        if self.browser.is_none() {
            info!("Abrindo navegador");
            self.browser = Some(self.launcher.launch().await?);
        }

        let mut created_context = false;
        if self.context.is_none() {
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| AgentError::Precondition(PAGE_NOT_READY.to_string()))?;
            self.context = Some(browser.new_context().await?);
            created_context = true;
        }

        if self.page.is_none() {
            let context = self
                .context
                .as_ref()
                .ok_or_else(|| AgentError::Precondition(PAGE_NOT_READY.to_string()))?;
            self.page = Some(context.new_page().await?);
        }

        if created_context {
            self.logged_in = false;
        }

        self.require_page()
    }

    pub fn page(&self) -> Option<Arc<dyn Page>> {
        self.page.clone()
    }

    pub fn require_page(&self) -> AgentResult<Arc<dyn Page>> {
        self.page
            .clone()
            .ok_or_else(|| AgentError::Precondition(PAGE_NOT_READY.to_string()))
    }

    /// Página pronta e login marcado pelo operador.
    pub fn require_logged_in(&self) -> AgentResult<Arc<dyn Page>> {
        let page = self.require_page()?;
        if !self.logged_in {
            return Err(AgentError::Precondition(LOGIN_PENDING.to_string()));
        }
        Ok(page)
    }

    /// O operador fez o login manualmente na janela aberta.
    pub fn mark_logged_in(&mut self) {
        self.logged_in = true;
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let current_url = match &self.page {
            Some(page) => page.url().await.ok(),
            None => None,
        };
        SessionSnapshot {
            browser_open: self.browser.is_some(),
            context_ready: self.context.is_some(),
            page_ready: self.page.is_some(),
            logged_in: self.logged_in,
            current_url,
        }
    }

    /// Fecha o navegador e esquece todos os handles.
    #[instrument(skip(self))]
    pub async fn teardown(&mut self) -> AgentResult<()> {
        self.page = None;
        self.context = None;
        self.logged_in = false;

        if let Some(mut browser) = self.browser.take() {
            info!("Fechando navegador");
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Falha ao fechar navegador");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeLauncher, FakePage, LaunchStats};

    fn manager() -> (SessionManager, FakeLauncher) {
        let launcher = FakeLauncher::new(FakePage::new("https://srienlinea.sri.gob.ec/"));
        (SessionManager::new(Box::new(launcher.clone())), launcher)
    }

    #[tokio::test]
    async fn test_ensure_is_lazy_and_idempotent() {
        let (mut session, launcher) = manager();
        session.ensure().await.unwrap();
        session.ensure().await.unwrap();

        assert_eq!(LaunchStats::get(&launcher.stats.launches), 1);
        assert_eq!(LaunchStats::get(&launcher.stats.contexts), 1);
        assert_eq!(LaunchStats::get(&launcher.stats.pages), 1);
    }

    #[tokio::test]
    async fn test_login_survives_ensure_with_same_context() {
        let (mut session, _) = manager();
        session.ensure().await.unwrap();
        session.mark_logged_in();
        session.ensure().await.unwrap();
        assert!(session.is_logged_in());
        assert!(session.require_logged_in().is_ok());
    }

    #[tokio::test]
    async fn test_new_context_resets_login() {
        let (mut session, launcher) = manager();
        session.ensure().await.unwrap();
        session.mark_logged_in();

        session.teardown().await.unwrap();
        session.mark_logged_in();
        session.ensure().await.unwrap();

        assert!(!session.is_logged_in());
        assert_eq!(LaunchStats::get(&launcher.stats.contexts), 2);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let (mut session, _) = manager();
        let err = session.require_page().err().unwrap();
        assert_eq!(err.to_string(), PAGE_NOT_READY);

        session.ensure().await.unwrap();
        let err = session.require_logged_in().err().unwrap();
        assert_eq!(err.to_string(), LOGIN_PENDING);
    }

    #[tokio::test]
    async fn test_snapshot_and_teardown() {
        let (mut session, launcher) = manager();
        assert_eq!(session.snapshot().await, SessionSnapshot::default());

        session.ensure().await.unwrap();
        session.mark_logged_in();
        let snap = session.snapshot().await;
        assert!(snap.browser_open && snap.context_ready && snap.page_ready && snap.logged_in);
        assert_eq!(snap.current_url.as_deref(), Some("https://srienlinea.sri.gob.ec/"));

        session.teardown().await.unwrap();
        assert_eq!(session.snapshot().await, SessionSnapshot::default());
        assert_eq!(LaunchStats::get(&launcher.stats.closes), 1);

        session.teardown().await.unwrap();
        assert_eq!(LaunchStats::get(&launcher.stats.closes), 1);
    }
}
