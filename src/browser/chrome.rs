//! Backend CDP sobre `chromiumoxide`.
//!
//! Locators são resolvidos com JavaScript injetado (um `querySelectorAll`
//! por parte da cadeia). O clique direto marca o elemento com um atributo
//! temporário e usa o clique de mouse do CDP; as demais estratégias rodam
//! dentro da página.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::ScreenshotParams;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{
    BrowserHandle, BrowserLauncher, ClickOptions, ContextHandle, ElementMetrics, Locator, Page,
    SelectOption, WaitUntil, NETWORK_QUIET_WINDOW, SCOPE, WAIT_POLL_INTERVAL,
};
use crate::errors::{AgentError, AgentResult};

const MARK_ATTR: &str = "data-sri-agent";

const RESOLVE_JS: &str = r#"
const __resolve = (parts) => {
  let set = [document];
  for (const p of parts) {
    let next = [];
    if (p.selector === __SCOPE) {
      next = set;
    } else {
      for (const s of set) {
        for (const el of s.querySelectorAll(p.selector)) {
          if (!next.includes(el)) next.push(el);
        }
      }
    }
    if (p.nth !== null) {
      next = next[p.nth] ? [next[p.nth]] : [];
    }
    set = next;
  }
  return set.filter((e) => e !== document);
};
"#;

fn script(locator: &Locator, body: &str) -> String {
    let parts: Vec<_> = locator
        .parts()
        .iter()
        .map(|p| json!({ "selector": p.selector, "nth": p.nth }))
        .collect();
    format!(
        "(() => {{ const __SCOPE = {scope}; {resolve} const els = __resolve({parts}); {body} }})()",
        scope = json!(SCOPE),
        resolve = RESOLVE_JS,
        parts = serde_json::Value::Array(parts),
        body = body
    )
}

async fn bounded<T, F>(op: &str, timeout: Duration, fut: F) -> AgentResult<T>
where
    F: Future<Output = AgentResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::browser(
            op,
            format!("timeout {}ms", timeout.as_millis()),
        )),
    }
}

/// Consome o stream do handler CDP até ele acabar. Um erro isolado não
/// para o pump: sem ele nenhum comando da página recebe resposta.
async fn pump_events<S, T, E>(events: &mut S) -> usize
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut seen = 0;
    while let Some(event) = events.next().await {
        seen += 1;
        if let Err(e) = event {
            debug!(error = %e, "Erro no handler CDP");
        }
    }
    debug!(events = seen, "Handler CDP encerrado");
    seen
}

// ============================================================================
// LAUNCHER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> AgentResult<Box<dyn BrowserHandle>> {
        let mut config = if self.headless {
            BrowserConfig::builder()
        } else {
            BrowserConfig::builder().with_head()
        };
        if let Some(path) = &self.chrome_path {
            config = config.chrome_executable(path);
        }
        let config = config
            .build()
            .map_err(|e| AgentError::browser("launch", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AgentError::browser("launch", e))?;

        let events = tokio::spawn(async move {
            pump_events(&mut handler).await;
        });

        info!(headless = self.headless, "Chrome iniciado");
        Ok(Box::new(ChromeBrowser {
            browser: Arc::new(Mutex::new(browser)),
            events,
        }))
    }
}

struct ChromeBrowser {
    browser: Arc<Mutex<Browser>>,
    events: JoinHandle<()>,
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn new_context(&self) -> AgentResult<Box<dyn ContextHandle>> {
        let id = self
            .browser
            .lock()
            .await
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AgentError::browser("newContext", e))?;
        Ok(Box::new(ChromeContext {
            browser: self.browser.clone(),
            id,
        }))
    }

    async fn close(&mut self) -> AgentResult<()> {
        let result = self.browser.lock().await.close().await;
        self.events.abort();
        result
            .map(|_| ())
            .map_err(|e| AgentError::browser("close", e))
    }
}

struct ChromeContext {
    browser: Arc<Mutex<Browser>>,
    id: BrowserContextId,
}

#[async_trait]
impl ContextHandle for ChromeContext {
    async fn new_page(&self) -> AgentResult<Arc<dyn Page>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(|e| AgentError::browser("newPage", e))?;
        let page = self
            .browser
            .lock()
            .await
            .new_page(params)
            .await
            .map_err(|e| AgentError::browser("newPage", e))?;
        Ok(Arc::new(ChromePage { page }))
    }
}

// ============================================================================
// PAGE
// ============================================================================

pub struct ChromePage {
    page: chromiumoxide::Page,
}

#[derive(Deserialize)]
struct RawMetrics {
    width: f64,
    display: String,
}

impl ChromePage {
    async fn eval<T: DeserializeOwned>(&self, op: &str, locator: &Locator, body: &str) -> AgentResult<T> {
        self.page
            .evaluate(script(locator, body))
            .await
            .map_err(|e| AgentError::browser(op, e))?
            .into_value::<T>()
            .map_err(|e| AgentError::browser(op, e))
    }

    /// Espera ao menos um elemento anexado.
    async fn attached(&self, op: &str, locator: &Locator, timeout: Duration) -> AgentResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count(locator).await.unwrap_or(0) > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::browser(
                    op,
                    format!("timeout {}ms esperando {}", timeout.as_millis(), locator),
                ));
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Marca o primeiro elemento e devolve o seletor da marca.
    async fn mark(&self, op: &str, locator: &Locator) -> AgentResult<String> {
        let token = uuid::Uuid::new_v4().to_string();
        let body = format!(
            "if (!els.length) return false; els[0].setAttribute({attr}, {token}); return true;",
            attr = json!(MARK_ATTR),
            token = json!(token)
        );
        if !self.eval::<bool>(op, locator, &body).await? {
            return Err(AgentError::browser(op, format!("nenhum elemento para {}", locator)));
        }
        Ok(format!("[{}=\"{}\"]", MARK_ATTR, token))
    }

    async fn ready_state(&self) -> AgentResult<String> {
        self.page
            .evaluate("document.readyState")
            .await
            .map_err(|e| AgentError::browser("readyState", e))?
            .into_value::<String>()
            .map_err(|e| AgentError::browser("readyState", e))
    }

    /// Aproximação de rede ociosa: a contagem de `performance` resource
    /// entries fica parada por [`NETWORK_QUIET_WINDOW`]. O chamador limita
    /// o tempo total.
    async fn network_quiet(&self) {
        let mut last = usize::MAX;
        let mut quiet_since = Instant::now();
        loop {
            let count = match self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
            {
                Ok(value) => value.into_value::<usize>().unwrap_or(0),
                Err(_) => return,
            };
            if count != last {
                last = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= NETWORK_QUIET_WINDOW {
                return;
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn unmark(&self, marker: &str) {
        let expr = format!(
            "(() => {{ const e = document.querySelector({sel}); if (e) e.removeAttribute({attr}); return true; }})()",
            sel = json!(marker),
            attr = json!(MARK_ATTR)
        );
        if let Err(e) = self.page.evaluate(expr).await {
            debug!(error = %e, "Falha ao remover marca do elemento");
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> AgentResult<()> {
        bounded("goto", timeout, async {
            let response = self
                .page
                .execute(NavigateParams::new(url))
                .await
                .map_err(|e| AgentError::browser("goto", e))?;
            if let Some(error) = response.result.error_text.clone() {
                return Err(AgentError::browser("goto", error));
            }
            if wait_until == WaitUntil::Commit {
                return Ok(());
            }

            loop {
                let state = self.ready_state().await.unwrap_or_default();
                if wait_until.reached_by(&state) {
                    break;
                }
                sleep(WAIT_POLL_INTERVAL).await;
            }
            if wait_until == WaitUntil::NetworkIdle {
                self.network_quiet().await;
            }
            Ok(())
        })
        .await
    }

    async fn url(&self) -> AgentResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| AgentError::browser("url", e))?
            .unwrap_or_default())
    }

    async fn count(&self, locator: &Locator) -> AgentResult<usize> {
        self.eval("count", locator, "return els.length;").await
    }

    async fn inner_text(&self, locator: &Locator, timeout: Duration) -> AgentResult<String> {
        bounded("innerText", timeout, async {
            self.attached("innerText", locator, timeout).await?;
            self.eval::<Option<String>>(
                "innerText",
                locator,
                "return els.length ? els[0].innerText : null;",
            )
            .await?
            .ok_or_else(|| AgentError::browser("innerText", "elemento desanexado"))
        })
        .await
    }

    async fn text_content(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> AgentResult<Option<String>> {
        bounded("textContent", timeout, async {
            self.attached("textContent", locator, timeout).await?;
            self.eval(
                "textContent",
                locator,
                "return els.length ? els[0].textContent : null;",
            )
            .await
        })
        .await
    }

    async fn is_visible(&self, locator: &Locator) -> AgentResult<bool> {
        self.eval(
            "isVisible",
            locator,
            "const e = els[0]; if (!e) return false; \
             const r = e.getBoundingClientRect(); const st = getComputedStyle(e); \
             return r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none';",
        )
        .await
    }

    async fn is_enabled(&self, locator: &Locator) -> AgentResult<bool> {
        self.eval::<Option<bool>>(
            "isEnabled",
            locator,
            "return els.length ? !els[0].disabled : null;",
        )
        .await?
        .ok_or_else(|| AgentError::browser("isEnabled", format!("nenhum elemento para {}", locator)))
    }

    async fn scroll_into_view(&self, locator: &Locator, timeout: Duration) -> AgentResult<()> {
        bounded("scrollIntoView", timeout, async {
            let done: bool = self
                .eval(
                    "scrollIntoView",
                    locator,
                    "if (!els.length) return false; \
                     els[0].scrollIntoView({ block: 'center', inline: 'center' }); return true;",
                )
                .await?;
            if done {
                Ok(())
            } else {
                Err(AgentError::browser("scrollIntoView", format!("nenhum elemento para {}", locator)))
            }
        })
        .await
    }

    async fn click(&self, locator: &Locator, options: ClickOptions) -> AgentResult<()> {
        bounded("click", options.timeout, async {
            self.attached("click", locator, options.timeout).await?;
            if !options.force {
                self.wait_for(locator, super::ElementState::Visible, options.timeout)
                    .await?;
            }
            let marker = self.mark("click", locator).await?;
            let result = async {
                let element = self
                    .page
                    .find_element(marker.clone())
                    .await
                    .map_err(|e| AgentError::browser("click", e))?;
                element
                    .click()
                    .await
                    .map_err(|e| AgentError::browser("click", e))?;
                Ok(())
            }
            .await;
            self.unmark(&marker).await;
            result
        })
        .await
    }

    async fn js_click(&self, locator: &Locator) -> AgentResult<()> {
        let done: bool = self
            .eval(
                "jsClick",
                locator,
                "if (!els.length) return false; els[0].click(); return true;",
            )
            .await?;
        if done {
            Ok(())
        } else {
            Err(AgentError::browser("jsClick", format!("nenhum elemento para {}", locator)))
        }
    }

    async fn dispatch_click(&self, locator: &Locator) -> AgentResult<()> {
        let done: bool = self
            .eval(
                "dispatchClick",
                locator,
                "if (!els.length) return false; \
                 els[0].dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true, view: window })); \
                 return true;",
            )
            .await?;
        if done {
            Ok(())
        } else {
            Err(AgentError::browser("dispatchClick", format!("nenhum elemento para {}", locator)))
        }
    }

    async fn fill(&self, locator: &Locator, text: &str, timeout: Duration) -> AgentResult<()> {
        bounded("fill", timeout, async {
            self.attached("fill", locator, timeout).await?;
            let body = format!(
                "const e = els[0]; if (!e) return false; e.focus(); \
                 const proto = Object.getPrototypeOf(e); \
                 const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
                 if (desc && desc.set) {{ desc.set.call(e, {text}); }} else {{ e.value = {text}; }} \
                 e.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 e.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
                text = json!(text)
            );
            if self.eval::<bool>("fill", locator, &body).await? {
                Ok(())
            } else {
                Err(AgentError::browser("fill", format!("nenhum elemento para {}", locator)))
            }
        })
        .await
    }

    async fn select_option(
        &self,
        locator: &Locator,
        option: &SelectOption,
        timeout: Duration,
    ) -> AgentResult<()> {
        bounded("selectOption", timeout, async {
            self.attached("selectOption", locator, timeout).await?;
            let (by, needle) = match option {
                SelectOption::Value(v) => ("value", v),
                SelectOption::Label(l) => ("label", l),
            };
            let body = format!(
                "const e = els[0]; if (!e || !e.options) return false; \
                 const by = {by}; const needle = {needle}; \
                 const opt = Array.from(e.options).find((o) => \
                   by === 'value' ? o.value === needle : (o.label || o.textContent || '').trim() === needle); \
                 if (!opt) return false; e.value = opt.value; \
                 e.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 e.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
                by = json!(by),
                needle = json!(needle)
            );
            if self.eval::<bool>("selectOption", locator, &body).await? {
                Ok(())
            } else {
                Err(AgentError::browser(
                    "selectOption",
                    format!("opção não encontrada: {}", option),
                ))
            }
        })
        .await
    }

    async fn press(&self, locator: &Locator, key: &str, timeout: Duration) -> AgentResult<()> {
        bounded("press", timeout, async {
            self.attached("press", locator, timeout).await?;
            let marker = self.mark("press", locator).await?;
            let result = async {
                let element = self
                    .page
                    .find_element(marker.clone())
                    .await
                    .map_err(|e| AgentError::browser("press", e))?;
                element
                    .focus()
                    .await
                    .map_err(|e| AgentError::browser("press", e))?;
                element
                    .press_key(key)
                    .await
                    .map_err(|e| AgentError::browser("press", e))?;
                Ok(())
            }
            .await;
            self.unmark(&marker).await;
            result
        })
        .await
    }

    async fn metrics(&self, locator: &Locator) -> AgentResult<Option<ElementMetrics>> {
        let raw: Option<RawMetrics> = self
            .eval(
                "metrics",
                locator,
                "const e = els[0]; if (!e) return null; \
                 return { width: e.getBoundingClientRect().width, display: getComputedStyle(e).display };",
            )
            .await?;
        Ok(raw.map(|m| ElementMetrics {
            width: m.width,
            display: m.display,
        }))
    }

    async fn body_text(&self) -> AgentResult<String> {
        self.page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(|e| AgentError::browser("bodyText", e))?
            .into_value::<String>()
            .map_err(|e| AgentError::browser("bodyText", e))
    }

    async fn screenshot_png(&self, full_page: bool) -> AgentResult<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(full_page).build();
        self.page.screenshot(params).await.map_err(|e| {
            warn!(error = %e, "Screenshot falhou");
            AgentError::browser("screenshot", e)
        })
    }
}
