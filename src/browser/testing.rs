//! DOM em memória para testes.
//!
//! Implementa `Page` e os traits de ciclo de vida sem navegador real.
//! Cada interação fica registrada em `events()` para que os testes contem
//! tentativas de clique, navegações e preenchimentos.
//!
//! Seletores suportados: `tag`, `#id`, `.classe`, `[attr]`, `[attr=valor]`,
//! compostos (`a.btn[href]`), descendentes (`tbody tr`) e listas (`td,th`).
//! Qualquer outra string casa apenas por rótulo exato (`El::label`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BrowserHandle, BrowserLauncher, ClickOptions, ContextHandle, ElementMetrics, Locator, Page,
    SelectOption, WaitUntil, SCOPE,
};
use crate::errors::{AgentError, AgentResult};

pub type NodeId = usize;
pub const ROOT: NodeId = 0;

/// Efeito aplicado quando um clique é aceito.
#[derive(Debug, Clone)]
pub enum Effect {
    Navigate(String),
    Show(NodeId),
    Hide(NodeId),
    SetWidth(NodeId, f64),
    SetText(NodeId, String),
}

/// Descrição de um elemento (builder).
#[derive(Debug, Clone, Default)]
pub struct El {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    hidden: bool,
    disabled: bool,
    width: f64,
    display: String,
    labels: Vec<String>,
    options: Vec<(String, String)>,
    value: String,
    fail_click: bool,
    fail_js_click: bool,
    fail_dispatch: bool,
    fail_scroll: bool,
    fail_text: bool,
    on_click: Vec<Effect>,
}

pub fn el(tag: &str) -> El {
    El {
        tag: tag.to_string(),
        width: 100.0,
        display: "block".to_string(),
        ..Default::default()
    }
}

impl El {
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn display(mut self, display: &str) -> Self {
        self.display = display.to_string();
        self
    }

    /// Casa este elemento quando o seletor for exatamente `label`.
    pub fn label(mut self, label: &str) -> Self {
        self.labels.push(label.to_string());
        self
    }

    pub fn option(mut self, value: &str, label: &str) -> Self {
        self.options.push((value.to_string(), label.to_string()));
        self
    }

    pub fn fail_click(mut self) -> Self {
        self.fail_click = true;
        self
    }

    pub fn fail_js_click(mut self) -> Self {
        self.fail_js_click = true;
        self
    }

    pub fn fail_dispatch(mut self) -> Self {
        self.fail_dispatch = true;
        self
    }

    /// Todas as três estratégias de clique falham.
    pub fn unclickable(self) -> Self {
        self.fail_click().fail_js_click().fail_dispatch()
    }

    pub fn fail_scroll(mut self) -> Self {
        self.fail_scroll = true;
        self
    }

    pub fn fail_text(mut self) -> Self {
        self.fail_text = true;
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }
}

#[derive(Debug)]
struct Node {
    el: El,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
pub struct FakeDom {
    nodes: Vec<Node>,
    url: String,
    events: Vec<String>,
    fail_screenshot: bool,
}

impl FakeDom {
    fn new(url: &str) -> Self {
        Self {
            nodes: vec![Node {
                el: el("html"),
                parent: None,
                children: Vec::new(),
            }],
            url: url.to_string(),
            events: Vec::new(),
            fail_screenshot: false,
        }
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    fn descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self.nodes[id].children {
            out.push(child);
            self.descendants(child, out);
        }
    }

    fn matches_compound(&self, id: NodeId, compound: &str) -> bool {
        let el = &self.nodes[id].el;
        let tag_end = compound
            .find(|c| matches!(c, '#' | '.' | '['))
            .unwrap_or(compound.len());
        let tag = &compound[..tag_end];
        if !tag.is_empty() && tag != "*" && tag != el.tag {
            return false;
        }
        let mut rest = &compound[tag_end..];
        while let Some(first) = rest.chars().next() {
            match first {
                '#' | '.' => {
                    let body = &rest[1..];
                    let end = body
                        .find(|c| matches!(c, '#' | '.' | '['))
                        .unwrap_or(body.len());
                    let name = &body[..end];
                    let ok = if first == '#' {
                        el.id.as_deref() == Some(name)
                    } else {
                        el.classes.iter().any(|c| c == name)
                    };
                    if !ok {
                        return false;
                    }
                    rest = &body[end..];
                }
                '[' => {
                    let Some(close) = rest.find(']') else {
                        return false;
                    };
                    let inner = &rest[1..close];
                    let ok = match inner.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim_matches(|c| c == '"' || c == '\'');
                            el.attrs.get(name.trim()).map(String::as_str) == Some(value)
                        }
                        None => el.attrs.contains_key(inner.trim()),
                    };
                    if !ok {
                        return false;
                    }
                    rest = &rest[close + 1..];
                }
                _ => return false,
            }
        }
        true
    }

    fn matches_complex(&self, id: NodeId, selector: &str) -> bool {
        let compounds: Vec<&str> = selector.split_whitespace().filter(|c| *c != ">").collect();
        let Some((last, ancestors)) = compounds.split_last() else {
            return false;
        };
        if !self.matches_compound(id, last) {
            return false;
        }
        let mut current = self.parent(id);
        for compound in ancestors.iter().rev() {
            let mut found = false;
            while let Some(a) = current {
                current = self.parent(a);
                if a != ROOT && self.matches_compound(a, compound) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }

    fn matches(&self, id: NodeId, selector: &str) -> bool {
        let el = &self.nodes[id].el;
        if el.labels.iter().any(|l| l == selector) {
            return true;
        }
        selector
            .split(',')
            .map(str::trim)
            .any(|alt| el.labels.iter().any(|l| l == alt) || self.matches_complex(id, alt))
    }

    fn resolve(&self, locator: &Locator) -> Vec<NodeId> {
        let mut set = vec![ROOT];
        for part in locator.parts() {
            let mut next = Vec::new();
            if part.selector == SCOPE {
                next = set.clone();
            } else {
                for &scope in &set {
                    let mut all = Vec::new();
                    self.descendants(scope, &mut all);
                    for d in all {
                        if self.matches(d, &part.selector) && !next.contains(&d) {
                            next.push(d);
                        }
                    }
                }
            }
            if let Some(n) = part.nth {
                next = next.get(n).copied().into_iter().collect();
            }
            set = next;
        }
        set
    }

    fn first(&self, locator: &Locator, op: &str) -> AgentResult<NodeId> {
        self.resolve(locator)
            .first()
            .copied()
            .ok_or_else(|| AgentError::browser(op, format!("nenhum elemento para {}", locator)))
    }

    fn visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(n) = current {
            let el = &self.nodes[n].el;
            if el.hidden || el.display == "none" {
                return false;
            }
            current = self.parent(n);
        }
        true
    }

    fn text_of(&self, id: NodeId, only_visible: bool) -> String {
        if only_visible && !self.visible(id) {
            return String::new();
        }
        let node = &self.nodes[id];
        let mut parts = Vec::new();
        if !node.el.text.is_empty() {
            parts.push(node.el.text.clone());
        }
        for &child in &node.children {
            let t = self.text_of(child, only_visible);
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.join(" ")
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Navigate(url) => self.url = url,
                Effect::Show(id) => self.nodes[id].el.hidden = false,
                Effect::Hide(id) => self.nodes[id].el.hidden = true,
                Effect::SetWidth(id, w) => self.nodes[id].el.width = w,
                Effect::SetText(id, t) => self.nodes[id].el.text = t,
            }
        }
    }

    fn accept_click(&mut self, id: NodeId, kind: &str, locator: &Locator) {
        self.events.push(format!("{} {}", kind, locator));
        let effects = self.nodes[id].el.on_click.clone();
        self.apply(effects);
    }
}

// ============================================================================
// PAGE
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakePage {
    dom: Arc<Mutex<FakeDom>>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            dom: Arc::new(Mutex::new(FakeDom::new(url))),
        }
    }

    fn dom(&self) -> MutexGuard<'_, FakeDom> {
        match self.dom.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add(&self, parent: NodeId, el: El) -> NodeId {
        let mut dom = self.dom();
        let id = dom.nodes.len();
        dom.nodes.push(Node {
            el,
            parent: Some(parent),
            children: Vec::new(),
        });
        dom.nodes[parent].children.push(id);
        id
    }

    pub fn events(&self) -> Vec<String> {
        self.dom().events.clone()
    }

    /// Quantos eventos começam com `prefix`.
    pub fn count_events(&self, prefix: &str) -> usize {
        self.dom()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn current_url(&self) -> String {
        self.dom().url.clone()
    }

    pub fn value_of(&self, id: NodeId) -> String {
        self.dom().nodes[id].el.value.clone()
    }

    pub fn fail_screenshots(&self) {
        self.dom().fail_screenshot = true;
    }

    /// Adiciona uma tabela `table#{id}` com `tbody` e uma linha por entrada
    /// (células separadas por `|`). Retorna os ids das linhas.
    pub fn table(&self, id: &str, rows: &[&str]) -> Vec<NodeId> {
        let table = self.add(ROOT, el("table").id(id));
        let tbody = self.add(table, el("tbody"));
        rows.iter()
            .map(|row| {
                let tr = self.add(tbody, el("tr"));
                for cell in row.split('|') {
                    self.add(tr, el("td").text(cell.trim()));
                }
                tr
            })
            .collect()
    }

    /// Primeira célula `td` da linha na posição `index`.
    pub fn cell(&self, row: NodeId, index: usize) -> NodeId {
        self.dom().nodes[row].children[index]
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _wait_until: WaitUntil, _timeout: Duration) -> AgentResult<()> {
        let mut dom = self.dom();
        dom.events.push(format!("goto {}", url));
        dom.url = url.to_string();
        Ok(())
    }

    async fn url(&self) -> AgentResult<String> {
        Ok(self.dom().url.clone())
    }

    async fn count(&self, locator: &Locator) -> AgentResult<usize> {
        Ok(self.dom().resolve(locator).len())
    }

    async fn inner_text(&self, locator: &Locator, _timeout: Duration) -> AgentResult<String> {
        let dom = self.dom();
        let id = dom.first(locator, "innerText")?;
        if dom.nodes[id].el.fail_text {
            return Err(AgentError::browser("innerText", "elemento desanexado"));
        }
        Ok(dom.text_of(id, true))
    }

    async fn text_content(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> AgentResult<Option<String>> {
        let dom = self.dom();
        let id = dom.first(locator, "textContent")?;
        Ok(Some(dom.text_of(id, false)))
    }

    async fn is_visible(&self, locator: &Locator) -> AgentResult<bool> {
        let dom = self.dom();
        Ok(dom
            .resolve(locator)
            .first()
            .map(|id| dom.visible(*id))
            .unwrap_or(false))
    }

    async fn is_enabled(&self, locator: &Locator) -> AgentResult<bool> {
        let dom = self.dom();
        let id = dom.first(locator, "isEnabled")?;
        Ok(!dom.nodes[id].el.disabled)
    }

    async fn scroll_into_view(&self, locator: &Locator, _timeout: Duration) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "scrollIntoView")?;
        if dom.nodes[id].el.fail_scroll {
            return Err(AgentError::browser("scrollIntoView", "elemento fora do layout"));
        }
        dom.events.push(format!("scroll {}", locator));
        Ok(())
    }

    async fn click(&self, locator: &Locator, options: ClickOptions) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "click")?;
        if dom.nodes[id].el.fail_click || (!options.force && !dom.visible(id)) {
            dom.events.push(format!("click-failed {}", locator));
            return Err(AgentError::browser("click", "elemento interceptado"));
        }
        dom.accept_click(id, "click", locator);
        Ok(())
    }

    async fn js_click(&self, locator: &Locator) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "jsClick")?;
        if dom.nodes[id].el.fail_js_click {
            dom.events.push(format!("js_click-failed {}", locator));
            return Err(AgentError::browser("jsClick", "el.click não disponível"));
        }
        dom.accept_click(id, "js_click", locator);
        Ok(())
    }

    async fn dispatch_click(&self, locator: &Locator) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "dispatchClick")?;
        if dom.nodes[id].el.fail_dispatch {
            dom.events.push(format!("dispatch_click-failed {}", locator));
            return Err(AgentError::browser("dispatchClick", "evento cancelado"));
        }
        dom.accept_click(id, "dispatch_click", locator);
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str, _timeout: Duration) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "fill")?;
        dom.nodes[id].el.value = text.to_string();
        dom.events.push(format!("fill {} = {}", locator, text));
        Ok(())
    }

    async fn select_option(
        &self,
        locator: &Locator,
        option: &SelectOption,
        _timeout: Duration,
    ) -> AgentResult<()> {
        let mut dom = self.dom();
        let id = dom.first(locator, "selectOption")?;
        let chosen = dom.nodes[id]
            .el
            .options
            .iter()
            .find(|(value, label)| match option {
                SelectOption::Value(v) => value == v,
                SelectOption::Label(l) => label == l,
            })
            .map(|(value, _)| value.clone());
        match chosen {
            Some(value) => {
                dom.nodes[id].el.value = value;
                dom.events.push(format!("select {} {}", locator, option));
                Ok(())
            }
            None => Err(AgentError::browser(
                "selectOption",
                format!("opção não encontrada: {}", option),
            )),
        }
    }

    async fn press(&self, locator: &Locator, key: &str, _timeout: Duration) -> AgentResult<()> {
        let mut dom = self.dom();
        dom.first(locator, "press")?;
        dom.events.push(format!("press {} {}", locator, key));
        Ok(())
    }

    async fn metrics(&self, locator: &Locator) -> AgentResult<Option<ElementMetrics>> {
        let dom = self.dom();
        Ok(dom.resolve(locator).first().map(|id| {
            let el = &dom.nodes[*id].el;
            ElementMetrics {
                width: if el.hidden { 0.0 } else { el.width },
                display: el.display.clone(),
            }
        }))
    }

    async fn body_text(&self) -> AgentResult<String> {
        Ok(self.dom().text_of(ROOT, true))
    }

    async fn screenshot_png(&self, _full_page: bool) -> AgentResult<Vec<u8>> {
        let mut dom = self.dom();
        if dom.fail_screenshot {
            return Err(AgentError::browser("screenshot", "página fechada"));
        }
        dom.events.push("screenshot".to_string());
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }
}

// ============================================================================
// CICLO DE VIDA
// ============================================================================

/// Contadores de criação, compartilhados entre launcher, browser e contexto.
#[derive(Debug, Default)]
pub struct LaunchStats {
    pub launches: AtomicUsize,
    pub contexts: AtomicUsize,
    pub pages: AtomicUsize,
    pub closes: AtomicUsize,
}

impl LaunchStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Launcher que sempre entrega a mesma `FakePage`.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    pub page: FakePage,
    pub stats: Arc<LaunchStats>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            stats: Arc::new(LaunchStats::default()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> AgentResult<Box<dyn BrowserHandle>> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            page: self.page.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct FakeBrowser {
    page: FakePage,
    stats: Arc<LaunchStats>,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn new_context(&self) -> AgentResult<Box<dyn ContextHandle>> {
        self.stats.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            page: self.page.clone(),
            stats: self.stats.clone(),
        }))
    }

    async fn close(&mut self) -> AgentResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeContext {
    page: FakePage,
    stats: Arc<LaunchStats>,
}

#[async_trait]
impl ContextHandle for FakeContext {
    async fn new_page(&self) -> AgentResult<Arc<dyn Page>> {
        self.stats.pages.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.page.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_selector_matching() {
        let page = FakePage::new("about:blank");
        let rows = page.table("anchoDoc", &["0 | 1792049504001 | Razon Social"]);
        let cell = page.cell(rows[0], 1);
        page.add(cell, el("a").attr("href", "#x").text("ver"));

        let table = Locator::new("table#anchoDoc").first();
        assert_eq!(page.count(&table.locator("tbody tr")).await.unwrap(), 1);
        assert_eq!(page.count(&table.locator("td,th")).await.unwrap(), 3);
        assert_eq!(page.count(&Locator::new("a[href]")).await.unwrap(), 1);
        assert_eq!(page.count(&Locator::new("a[href='#x']")).await.unwrap(), 1);
        assert_eq!(page.count(&Locator::new("button")).await.unwrap(), 0);

        let text = page
            .inner_text(&table.locator("tbody tr").nth(0), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(text, "0 1792049504001 ver Razon Social");
    }

    #[tokio::test]
    async fn test_click_effects_and_events() {
        let page = FakePage::new("https://portal/inicio");
        page.add(
            ROOT,
            el("button")
                .id("go")
                .on_click(Effect::Navigate("https://portal/perfil".into())),
        );

        page.click(&Locator::new("#go"), ClickOptions::forced(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(page.current_url(), "https://portal/perfil");
        assert_eq!(page.count_events("click #go"), 1);
    }

    #[tokio::test]
    async fn test_launcher_counts() {
        let launcher = FakeLauncher::new(FakePage::new("about:blank"));
        let mut browser = launcher.launch().await.unwrap();
        let ctx = browser.new_context().await.unwrap();
        ctx.new_page().await.unwrap();
        browser.close().await.unwrap();

        assert_eq!(LaunchStats::get(&launcher.stats.launches), 1);
        assert_eq!(LaunchStats::get(&launcher.stats.contexts), 1);
        assert_eq!(LaunchStats::get(&launcher.stats.pages), 1);
        assert_eq!(LaunchStats::get(&launcher.stats.closes), 1);
    }
}
