//! ``src/controller/router.rs``
//! ============================================================================
//! # Router
//!
//! Owns the navigation cycle. On each address change:
//! 1. resolve the route, assigning the default when the address is empty
//! 2. tear down the current module and every form handler
//! 3. fetch the route's markup (failure renders an inline error)
//! 4. swap it into the target region
//! 5. resolve includes inside the region
//! 6. extract the module key and make it current
//! 7. run the module's lifecycle after a short stabilisation delay
//! 8. update the navigation indicators
//!
//! Cycles are serialised. Each one carries a generation number, and every
//! side-effecting step (the deferred lifecycle run included) is skipped once
//! a newer navigation has been requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::form_registry::FormRegistry;
use super::handler_registry::{ExecutionHold, ExecutionOutcome, HandlerRegistry, LOAD_KEY_ATTR};
use super::navigation::{
    ActiveLinks, Breadcrumb, Location, NavigationEvent, NavigationIndicator, ROUTE_LINK_ATTR,
};
use crate::config::RouterConfig;
use crate::dom::{Document, DomEvent, EventTarget, ListenerId, MountEvent, NodeId, Selector};
use crate::error::{AppError, AppResult};
use crate::fetch::{FetchResponse, Fetcher};
use crate::includes::IncludeResolver;
use crate::keys::{ModuleKey, Route};

/// Shown in the target region when a route cannot be loaded.
pub const ERROR_FRAGMENT: &str = "<p>Erreur : vue introuvable.</p>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded {
        route: Route,
        module: Option<ModuleKey>,
    },
    Failed {
        route: Route,
        reason: String,
    },
    /// The address was empty; the default route was assigned and its change
    /// event drives the actual load.
    Redirected(Route),
    /// A newer navigation took over.
    Superseded,
    /// The target region is not in the document.
    NoTarget,
}

/// Everything the router drives, injected at construction.
pub struct RouterParts {
    pub document: Document,
    pub location: Arc<Location>,
    pub fetcher: Arc<dyn Fetcher>,
    pub includes: IncludeResolver,
    pub handlers: Arc<HandlerRegistry>,
    pub forms: Arc<FormRegistry>,
}

pub struct Router {
    document: Document,
    config: RouterConfig,
    location: Arc<Location>,
    fetcher: Arc<dyn Fetcher>,
    includes: IncludeResolver,
    handlers: Arc<HandlerRegistry>,
    forms: Arc<FormRegistry>,
    indicators: Vec<Arc<dyn NavigationIndicator>>,
    state: watch::Sender<RouterState>,
    current_module: ArcSwapOption<ModuleKey>,
    loaded_route: ArcSwapOption<Route>,
    generation: Arc<AtomicU64>,
    cycle: tokio::sync::Mutex<()>,
    deferred: Mutex<Option<JoinHandle<Option<ExecutionOutcome>>>>,
    link_listener: Mutex<Option<ListenerId>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("current_module", &self.current_module())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// A router with the default indicators: breadcrumb and active links.
    pub fn new(parts: RouterParts, config: RouterConfig) -> Self {
        Self::with_indicators(
            parts,
            config,
            vec![Arc::new(Breadcrumb), Arc::new(ActiveLinks)],
        )
    }

    pub fn with_indicators(
        parts: RouterParts,
        config: RouterConfig,
        indicators: Vec<Arc<dyn NavigationIndicator>>,
    ) -> Self {
        let (state, _) = watch::channel(RouterState::Idle);
        Self {
            document: parts.document,
            config,
            location: parts.location,
            fetcher: parts.fetcher,
            includes: parts.includes,
            handlers: parts.handlers,
            forms: parts.forms,
            indicators,
            state,
            current_module: ArcSwapOption::empty(),
            loaded_route: ArcSwapOption::empty(),
            generation: Arc::new(AtomicU64::new(0)),
            cycle: tokio::sync::Mutex::new(()),
            deferred: Mutex::new(None),
            link_listener: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RouterState> {
        self.state.subscribe()
    }

    pub fn current_module(&self) -> Option<ModuleKey> {
        self.current_module.load_full().map(|key| (*key).clone())
    }

    /// Route of the last successful cycle.
    pub fn loaded_route(&self) -> Option<Route> {
        self.loaded_route.load_full().map(|route| (*route).clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn location(&self) -> &Arc<Location> {
        &self.location
    }

    /// Route for the current address. An empty address is set to the
    /// default route, which emits its own change event.
    pub fn route_from_location(&self) -> (Route, bool) {
        match self.location.current() {
            Some(route) => (route, false),
            None => {
                let route: Route = Route::new(&self.config.default_route);
                self.location.assign(route.clone());
                (route, true)
            }
        }
    }

    /// Programmatic navigation: sets the address, which triggers a load
    /// when it changed.
    pub fn navigate(&self, route: impl Into<Route>) -> bool {
        let route: Route = route.into();
        info!(route = %route, "Navigate to {route}");
        self.location.assign(route)
    }

    /// Claims a new generation; any cycle holding an older one stops at its
    /// next step.
    pub fn begin_navigation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    fn is_current(&self, ticket: u64) -> bool {
        self.generation() == ticket
    }

    pub async fn load_route(&self) -> LoadOutcome {
        let ticket: u64 = self.begin_navigation();
        self.load_route_as(ticket).await
    }

    /// Runs one navigation cycle under generation `ticket`.
    pub async fn load_route_as(&self, ticket: u64) -> LoadOutcome {
        let _cycle = self.cycle.lock().await;
        if !self.is_current(ticket) {
            debug!("Navigation {ticket} superseded before it started");
            return LoadOutcome::Superseded;
        }

        let (route, redirected) = self.route_from_location();
        if redirected {
            info!(route = %route, "No address, redirecting to default route {route}");
            return LoadOutcome::Redirected(route);
        }

        let Some(target) = self.document.get_element_by_id(&self.config.target_id) else {
            let e = AppError::TargetNotFound(format!("#{}", self.config.target_id));
            error!("{e}");
            return LoadOutcome::NoTarget;
        };

        // no lifecycle may see the target until its includes are in
        let hold: ExecutionHold<'_> = self.handlers.hold_execution();
        self.state.send_replace(RouterState::Loading);
        self.cleanup().await;
        if !self.is_current(ticket) {
            return LoadOutcome::Superseded;
        }

        let html: String = match self.fetch_markup(&route).await {
            Ok(html) => html,
            Err(e) => {
                if !self.is_current(ticket) {
                    return LoadOutcome::Superseded;
                }
                return self.fail(&route, target, &e);
            }
        };
        if !self.is_current(ticket) {
            debug!(route = %route, "Discarding stale markup for {route}");
            return LoadOutcome::Superseded;
        }

        if let Err(e) = self.document.set_inner_html(target, &html) {
            return self.fail(&route, target, &e);
        }

        self.includes.resolve(&self.document, target).await;
        if !self.is_current(ticket) {
            return LoadOutcome::Superseded;
        }

        let module: Option<ModuleKey> = self.extract_module_key(target);
        self.current_module.store(module.clone().map(Arc::new));
        drop(hold);
        match &module {
            Some(key) => self.schedule_execution(ticket, key.clone()),
            None => debug!(route = %route, "Route {route} declares no module key"),
        }

        for indicator in &self.indicators {
            indicator.update(&self.document, &route);
        }

        self.loaded_route.store(Some(Arc::new(route.clone())));
        self.state.send_replace(RouterState::Loaded);
        info!(route = %route, "Loaded route: {route}");
        LoadOutcome::Loaded { route, module }
    }

    async fn fetch_markup(&self, route: &Route) -> AppResult<String> {
        let response: FetchResponse = self.fetcher.fetch(route.as_str()).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(AppError::fetch_status(route.as_str(), response.status))
        }
    }

    fn fail(&self, route: &Route, target: NodeId, e: &AppError) -> LoadOutcome {
        error!(route = %route, "Error loading route {route}: {e}");
        if let Err(e) = self.document.set_inner_html(target, ERROR_FRAGMENT) {
            warn!("Could not render the error fragment: {e}");
        }
        self.state.send_replace(RouterState::Failed);
        LoadOutcome::Failed {
            route: route.clone(),
            reason: e.to_string(),
        }
    }

    /// Tears down the current module: its cleanup stage (errors logged),
    /// then every form handler, then the current key itself.
    pub async fn cleanup(&self) {
        if let Some(key) = self.current_module.load_full() {
            if self.handlers.cleanup(&key).await {
                info!(module_key = %key, "Cleanup done for {key}");
            }
        }
        self.forms.clear_all_handlers();
        self.current_module.store(None);
    }

    /// `[data-load-key]` first, else the first element with an id.
    pub fn extract_module_key(&self, container: NodeId) -> Option<ModuleKey> {
        if let Some(node) = self
            .document
            .query_first(container, &Selector::attr(LOAD_KEY_ATTR))
        {
            if let Some(key) = self.document.attr(node, LOAD_KEY_ATTR).filter(|k| !k.is_empty()) {
                return Some(ModuleKey::new(key));
            }
        }
        self.document
            .query_first(container, &Selector::attr("id"))
            .and_then(|node| self.document.attr(node, "id"))
            .filter(|id| !id.is_empty())
            .map(ModuleKey::new)
    }

    fn schedule_execution(&self, ticket: u64, key: ModuleKey) {
        let handlers: Arc<HandlerRegistry> = Arc::clone(&self.handlers);
        let generation: Arc<AtomicU64> = Arc::clone(&self.generation);
        let delay: Duration = self.config.stabilize_delay;

        let handle: JoinHandle<Option<ExecutionOutcome>> = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::Acquire) != ticket {
                debug!(module_key = %key, "Skipping lifecycle of superseded module {key}");
                return None;
            }
            Some(handlers.execute(key).await)
        });

        if let Some(previous) = self.deferred.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("Previous deferred lifecycle still pending");
            }
        }
    }

    /// Waits for the lifecycle run scheduled by the last cycle. `None` when
    /// nothing was scheduled or the run was skipped as stale.
    pub async fn settle(&self) -> Option<ExecutionOutcome> {
        let handle: Option<JoinHandle<Option<ExecutionOutcome>>> = self.deferred.lock().take();
        match handle {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }

    /// Intercepts clicks inside `a[data-route]` and navigates to their
    /// `href`. Only the first call attaches a listener.
    pub fn install(self: &Arc<Self>) -> ListenerId {
        let mut slot = self.link_listener.lock();
        if let Some(id) = *slot {
            return id;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id: ListenerId = self.document.add_listener(
            EventTarget::Document,
            "click",
            Arc::new(move |event: &DomEvent| {
                if let Some(router) = weak.upgrade() {
                    router.on_click(event);
                }
            }),
        );
        *slot = Some(id);
        id
    }

    fn on_click(&self, event: &DomEvent) {
        let selector: Selector = Selector::tag("a").with_attr(ROUTE_LINK_ATTR);
        let Some(link) = self.document.closest(event.target(), &selector) else {
            return;
        };
        event.prevent_default();
        let href: String = self.document.attr(link, "href").unwrap_or_default();
        match Route::from_fragment(&href) {
            Some(route) => {
                self.navigate(route);
            }
            None => warn!("Route link without a target: {href:?}"),
        }
    }

    /// Event loop: one navigation cycle per address change, with queued
    /// changes collapsed into the most recent one. Also re-marks the active
    /// link whenever navigation links are mounted.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NavigationEvent>) {
        let mut mounts: broadcast::Receiver<MountEvent> = self.document.subscribe_mounts();
        info!("Router event loop started");

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let mut latest: NavigationEvent = event;
                    let mut skipped: usize = 0;
                    while let Ok(next) = events.try_recv() {
                        latest = next;
                        skipped += 1;
                    }
                    debug!("Navigation event {latest:?} ({skipped} coalesced)");

                    let ticket: u64 = self.begin_navigation();
                    let router: Arc<Self> = Arc::clone(&self);
                    tokio::spawn(async move {
                        router.load_route_as(ticket).await;
                    });
                }

                mount = mounts.recv() => match mount {
                    Ok(mount) => self.refresh_links_on(&mount),
                    Err(RecvError::Lagged(missed)) => debug!("Router missed {missed} mount event(s)"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Router event loop terminated - no more events");
    }

    fn refresh_links_on(&self, mount: &MountEvent) {
        let Some(route) = self.loaded_route() else {
            return;
        };
        let selector: Selector = Selector::tag("a").with_attr(ROUTE_LINK_ATTR);
        let brings_links: bool = mount.inserted.iter().any(|&node| {
            self.document.element(node).is_some_and(|el| selector.matches(&el))
                || self.document.query_first(node, &selector).is_some()
        });
        if brings_links {
            ActiveLinks.update(&self.document, &route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::template_cache::TemplateCache;
    use crate::config::{IncludeConfig, LifecycleConfig, NotificationConfig, TemplateCacheConfig};
    use crate::fetch::MemoryFetcher;
    use crate::notify::NotificationSink;
    use std::time::Duration;

    const SHELL: &str = r##"<body>
        <nav><a id="link-a" data-route href="#views/a.html"><span id="label-a">A</span></a></nav>
        <main id="router"></main>
    </body>"##;

    struct Harness {
        doc: Document,
        events: mpsc::UnboundedReceiver<NavigationEvent>,
        router: Arc<Router>,
    }

    fn harness(fetcher: MemoryFetcher, initial: Option<&str>) -> Harness {
        let doc = Document::parse(SHELL);
        doc.mark_loaded();
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let (location, events) = Location::new(initial.map(Route::new));
        let templates = TemplateCache::new(Arc::clone(&fetcher), TemplateCacheConfig::default());
        let sink = Arc::new(NotificationSink::new(doc.clone(), NotificationConfig::default()));
        let router = Router::new(
            RouterParts {
                document: doc.clone(),
                location: Arc::new(location),
                fetcher,
                includes: IncludeResolver::new(templates, IncludeConfig::default()),
                handlers: Arc::new(HandlerRegistry::new(doc.clone(), LifecycleConfig::default())),
                forms: Arc::new(FormRegistry::new(doc.clone(), sink)),
            },
            RouterConfig::default(),
        );
        Harness {
            doc,
            events,
            router: Arc::new(router),
        }
    }

    fn target_html(h: &Harness) -> String {
        h.doc.inner_html(h.doc.get_element_by_id("router").unwrap())
    }

    #[tokio::test]
    async fn test_empty_address_assigns_default_route() {
        let mut h = harness(MemoryFetcher::new(), None);

        let outcome = h.router.load_route().await;

        let default = Route::new("views/officine/officine.html");
        assert_eq!(outcome, LoadOutcome::Redirected(default.clone()));
        assert_eq!(h.router.location().current(), Some(default.clone()));
        assert_eq!(
            h.events.try_recv().unwrap(),
            NavigationEvent::HashChanged(Some(default))
        );
        assert_eq!(h.router.state(), RouterState::Idle);
    }

    #[tokio::test]
    async fn test_load_swaps_markup_and_tracks_module() {
        let h = harness(
            MemoryFetcher::new()
                .with_page("views/a.html", r#"<div data-load-key="moduleA"><div data-include="p.html"></div></div>"#)
                .with_page("p.html", r#"<p id="partial">p</p>"#),
            Some("views/a.html"),
        );

        let outcome = h.router.load_route().await;

        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                route: Route::new("views/a.html"),
                module: Some(ModuleKey::new("moduleA")),
            }
        );
        assert_eq!(h.router.state(), RouterState::Loaded);
        assert_eq!(h.router.current_module(), Some(ModuleKey::new("moduleA")));
        assert!(h.doc.get_element_by_id("partial").is_some());
        let link = h.doc.get_element_by_id("link-a").unwrap();
        assert_eq!(h.doc.attr(link, "aria-current").as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_failed_fetch_renders_error_fragment() {
        let h = harness(
            MemoryFetcher::new().with_page("views/a.html", r#"<div data-load-key="moduleA"></div>"#),
            Some("views/a.html"),
        );
        h.router.load_route().await;

        h.router.navigate("views/missing.html");
        let outcome = h.router.load_route().await;

        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
        assert_eq!(h.router.state(), RouterState::Failed);
        assert_eq!(h.router.current_module(), None);
        assert_eq!(target_html(&h), ERROR_FRAGMENT);
    }

    #[test]
    fn test_module_key_falls_back_to_first_id() {
        let h = harness(MemoryFetcher::new(), None);
        let target = h.doc.get_element_by_id("router").unwrap();

        h.doc
            .set_inner_html(target, r#"<section><h1 id="vueEtiqueteuse">x</h1></section>"#)
            .unwrap();
        assert_eq!(h.router.extract_module_key(target), Some(ModuleKey::new("vueEtiqueteuse")));

        h.doc
            .set_inner_html(target, r#"<p id="first"></p><div data-load-key="explicit"></div>"#)
            .unwrap();
        assert_eq!(h.router.extract_module_key(target), Some(ModuleKey::new("explicit")));

        h.doc.set_inner_html(target, "<p>plain</p>").unwrap();
        assert_eq!(h.router.extract_module_key(target), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_navigation_never_overwrites_newer_view() {
        let h = harness(
            MemoryFetcher::new()
                .with_page("views/slow.html", r#"<div data-load-key="slow"></div>"#)
                .with_delay("views/slow.html", Duration::from_millis(500))
                .with_page("views/fast.html", r#"<div data-load-key="fast"></div>"#),
            Some("views/slow.html"),
        );

        let slow = tokio::spawn({
            let router = Arc::clone(&h.router);
            async move { router.load_route().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.router.navigate("views/fast.html");
        let fast = h.router.load_route().await;

        assert_eq!(slow.await.unwrap(), LoadOutcome::Superseded);
        assert!(matches!(fast, LoadOutcome::Loaded { .. }));
        assert_eq!(h.router.current_module(), Some(ModuleKey::new("fast")));
        assert!(target_html(&h).contains("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_lifecycle_skipped_when_superseded() {
        let h = harness(
            MemoryFetcher::new().with_page("views/a.html", r#"<div data-load-key="moduleA"></div>"#),
            Some("views/a.html"),
        );
        h.router.load_route().await;
        h.router.begin_navigation();

        assert_eq!(h.router.settle().await, None);
    }

    #[tokio::test]
    async fn test_route_link_click_navigates() {
        let mut h = harness(MemoryFetcher::new(), Some("views/home.html"));
        h.router.install();
        h.router.install();

        let label = h.doc.get_element_by_id("label-a").unwrap();
        let event = h.doc.click(label);

        assert!(event.default_prevented());
        assert_eq!(h.router.location().current(), Some(Route::new("views/a.html")));
        assert_eq!(
            h.events.try_recv().unwrap(),
            NavigationEvent::HashChanged(Some(Route::new("views/a.html")))
        );
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_event_loop_loads_routes() {
        let h = harness(
            MemoryFetcher::new().with_page(
                "views/officine/officine.html",
                r#"<div data-load-key="officine"></div>"#,
            ),
            None,
        );
        let Harness { events, router, .. } = h;
        let mut states = router.subscribe_state();
        let looping = tokio::spawn(Arc::clone(&router).run(events));

        assert!(matches!(router.load_route().await, LoadOutcome::Redirected(_)));
        states
            .wait_for(|state| *state == RouterState::Loaded)
            .await
            .unwrap();
        assert_eq!(router.current_module(), Some(ModuleKey::new("officine")));
        looping.abort();
    }
}
