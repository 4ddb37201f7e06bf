//! HandlerRegistry: module lifecycles keyed by [`ModuleKey`]
//!
//! Binds each key to a [`Lifecycle`] and runs it once the element tagged
//! with that key exists in the document:
//! - keys registered before [`HandlerRegistry::init`] wait in a pending set
//! - init sweeps every registered key plus the pending set, once
//! - readiness is polled a bounded number of times with linear backoff,
//!   and mount events wake the wait early when they bring the element in
//! - lifecycle errors are logged against their key, never propagated

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, join_all};
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::dom::{Document, ElementRef, MountEvent, NodeId, Selector};
use crate::error::AppError;
use crate::keys::ModuleKey;

/// Attribute tagging the element a module key belongs to.
pub const LOAD_KEY_ATTR: &str = "data-load-key";

/// What a business view implements. Every stage is optional.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Runs synchronously right before [`on_load`](Self::on_load).
    fn preset_on_load(&self, _element: &ElementRef, _key: &ModuleKey) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_load(&self, _element: ElementRef, _key: ModuleKey) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

type PresetFn = Arc<dyn Fn(&ElementRef, &ModuleKey) -> anyhow::Result<()> + Send + Sync>;
type LoadFn = Arc<dyn Fn(ElementRef, ModuleKey) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A [`Lifecycle`] assembled from closures.
#[derive(Clone, Default)]
pub struct FnLifecycle {
    preset: Option<PresetFn>,
    load: Option<LoadFn>,
    cleanup: Option<CleanupFn>,
}

impl FnLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn preset<F>(mut self, f: F) -> Self
    where
        F: Fn(&ElementRef, &ModuleKey) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.preset = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_load<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ElementRef, ModuleKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.load = Some(Arc::new(move |element, key| f(element, key).boxed()));
        self
    }

    #[must_use]
    pub fn cleanup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move || f().boxed()));
        self
    }
}

#[async_trait]
impl Lifecycle for FnLifecycle {
    fn preset_on_load(&self, element: &ElementRef, key: &ModuleKey) -> anyhow::Result<()> {
        self.preset.as_ref().map_or(Ok(()), |f| f(element, key))
    }

    async fn on_load(&self, element: ElementRef, key: ModuleKey) -> anyhow::Result<()> {
        match &self.load {
            Some(f) => f(element, key).await,
            None => Ok(()),
        }
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        match &self.cleanup {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed,
    /// The element was found but a lifecycle stage failed.
    LifecycleFailed,
    MissingHandler,
    /// This key's lifecycle already ran for the element currently mounted.
    AlreadyLoaded,
    /// Every presence check came back empty.
    NotReady,
}

/// Registry counters
#[derive(Debug, Default)]
struct RegistryCounters {
    presence_checks: AtomicU64,
    readiness_failures: AtomicU64,
    executions: AtomicU64,
    lifecycle_failures: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: usize,
    pub pending: usize,
    pub presence_checks: u64,
    pub readiness_failures: u64,
    pub executions: u64,
    pub lifecycle_failures: u64,
}

pub struct HandlerRegistry {
    document: Document,
    config: LifecycleConfig,
    handlers: RwLock<HashMap<ModuleKey, Arc<dyn Lifecycle>>>,
    pending: Mutex<IndexSet<ModuleKey>>,
    mounted: Mutex<HashMap<ModuleKey, NodeId>>,
    holds: watch::Sender<usize>,
    init_started: AtomicBool,
    initialized: AtomicBool,
    counters: RegistryCounters,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.read().len())
            .field("pending", &self.pending.lock().len())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    pub fn new(document: Document, config: LifecycleConfig) -> Self {
        Self {
            document,
            config,
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(IndexSet::new()),
            mounted: Mutex::new(HashMap::new()),
            holds: watch::channel(0).0,
            init_started: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            counters: RegistryCounters::default(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn handler(&self, key: &ModuleKey) -> Option<Arc<dyn Lifecycle>> {
        self.handlers.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.handlers.read().contains_key(key)
    }

    pub fn pending_keys(&self) -> Vec<ModuleKey> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Stores `handler` under `key`, replacing any previous one.
    ///
    /// Before init the key joins the pending set; afterwards its execution
    /// is spawned right away and the handle returned. Outside a tokio
    /// runtime nothing is spawned and the handler waits for the next
    /// `execute`.
    pub fn register_handler(
        self: &Arc<Self>,
        key: ModuleKey,
        handler: Arc<dyn Lifecycle>,
    ) -> Option<JoinHandle<ExecutionOutcome>> {
        let replaced: bool = self
            .handlers
            .write()
            .insert(key.clone(), handler)
            .is_some();
        info!(module_key = %key, replaced, "Handler registered for {key}");

        {
            let mut pending = self.pending.lock();
            if !self.is_initialized() {
                pending.insert(key);
                return None;
            }
        }

        let Ok(runtime) = Handle::try_current() else {
            error!(module_key = %key, "No async runtime, {key} registered but not executed");
            return None;
        };
        let registry: Arc<Self> = Arc::clone(self);
        Some(runtime.spawn(async move { registry.execute(key).await }))
    }

    /// Keeps lifecycles from starting until the returned guard is dropped.
    /// Held by the router while a view's markup and includes are spliced in.
    pub fn hold_execution(&self) -> ExecutionHold<'_> {
        self.holds.send_modify(|count| *count += 1);
        ExecutionHold { registry: self }
    }

    pub fn is_held(&self) -> bool {
        *self.holds.borrow() > 0
    }

    async fn wait_released(&self) {
        let mut holds: watch::Receiver<usize> = self.holds.subscribe();
        // the sender lives in `self`
        let _ = holds.wait_for(|count| *count == 0).await;
    }

    /// Runs once, after the document's initial load: executes every
    /// registered key and everything pending, each key at most once.
    /// Later calls do nothing and return an empty list.
    pub async fn init(&self) -> Vec<(ModuleKey, ExecutionOutcome)> {
        if self
            .init_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("HandlerRegistry already initialized");
            return Vec::new();
        }

        self.document.wait_loaded().await;

        let drained: IndexSet<ModuleKey> = {
            let mut pending = self.pending.lock();
            self.initialized.store(true, Ordering::Release);
            std::mem::take(&mut *pending)
        };

        let mut keys: IndexSet<ModuleKey> = self.handlers.read().keys().cloned().collect();
        keys.extend(drained);
        info!("HandlerRegistry initialized, sweeping {} key(s)", keys.len());

        let runs = keys.into_iter().map(|key| async move {
            let outcome: ExecutionOutcome = self.execute(key.clone()).await;
            (key, outcome)
        });
        join_all(runs).await
    }

    /// [`execute_with_retry`](Self::execute_with_retry) with the configured
    /// attempt count.
    pub async fn execute(&self, key: ModuleKey) -> ExecutionOutcome {
        self.execute_with_retry(key, self.config.max_attempts).await
    }

    /// Looks for the element of `key` at most `retries` times, waiting
    /// `base_delay × attempt` between looks, then runs the lifecycle.
    pub async fn execute_with_retry(&self, key: ModuleKey, retries: u32) -> ExecutionOutcome {
        if !self.contains(&key) {
            warn!(module_key = %key, "No handler registered for {key}");
            return ExecutionOutcome::MissingHandler;
        }

        let selectors: [Selector; 2] = key_selectors(&key);
        let mut mounts: broadcast::Receiver<MountEvent> = self.document.subscribe_mounts();

        for attempt in 1..=retries {
            self.wait_released().await;
            self.counters.presence_checks.fetch_add(1, Ordering::Relaxed);
            if let Some(element) = self.find_element(&selectors) {
                debug!(module_key = %key, attempt, "Element found for {key}");
                return self.run_lifecycle(key, element).await;
            }
            if attempt < retries {
                let delay: Duration = self.config.base_delay * attempt;
                self.wait_for_mount(&mut mounts, &selectors, delay).await;
            }
        }

        self.counters.readiness_failures.fetch_add(1, Ordering::Relaxed);
        let e = AppError::ReadinessTimeout {
            key: key.to_string(),
            attempts: retries,
        };
        error!(module_key = %key, "{e}");
        ExecutionOutcome::NotReady
    }

    /// Runs the cleanup stage of `key`'s handler. Returns whether a handler
    /// was registered.
    pub async fn cleanup(&self, key: &ModuleKey) -> bool {
        let Some(handler) = self.handler(key) else {
            debug!(module_key = %key, "No handler to clean up for {key}");
            return false;
        };
        if let Err(e) = handler.cleanup().await {
            let e = AppError::lifecycle(key.as_str(), "cleanup", format!("{e:#}"));
            error!(module_key = %key, "{e}");
        }
        true
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.handlers.read().len(),
            pending: self.pending.lock().len(),
            presence_checks: self.counters.presence_checks.load(Ordering::Relaxed),
            readiness_failures: self.counters.readiness_failures.load(Ordering::Relaxed),
            executions: self.counters.executions.load(Ordering::Relaxed),
            lifecycle_failures: self.counters.lifecycle_failures.load(Ordering::Relaxed),
        }
    }

    fn find_element(&self, selectors: &[Selector; 2]) -> Option<NodeId> {
        let root: NodeId = self.document.root();
        selectors
            .iter()
            .find_map(|selector| self.document.query_first(root, selector))
    }

    /// Sleeps for `delay`, returning early when a mount brings in an element
    /// matching `selectors`.
    async fn wait_for_mount(
        &self,
        mounts: &mut broadcast::Receiver<MountEvent>,
        selectors: &[Selector; 2],
        delay: Duration,
    ) {
        let deadline: Instant = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return,
                event = mounts.recv() => match event {
                    Ok(event) if self.mount_matches(&event, selectors) => return,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        sleep_until(deadline).await;
                        return;
                    }
                },
            }
        }
    }

    fn mount_matches(&self, event: &MountEvent, selectors: &[Selector; 2]) -> bool {
        event.inserted.iter().any(|&node| {
            selectors.iter().any(|selector| {
                self.document
                    .element(node)
                    .is_some_and(|el| selector.matches(&el))
                    || self.document.query_first(node, selector).is_some()
            })
        })
    }

    async fn run_lifecycle(&self, key: ModuleKey, node: NodeId) -> ExecutionOutcome {
        let Some(handler) = self.handler(&key) else {
            return ExecutionOutcome::MissingHandler;
        };
        if self.mounted.lock().insert(key.clone(), node) == Some(node) {
            debug!(module_key = %key, "Lifecycle of {key} already ran for {node}");
            return ExecutionOutcome::AlreadyLoaded;
        }
        let element: ElementRef = ElementRef::new(self.document.clone(), node);
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = handler.preset_on_load(&element, &key) {
            let e = AppError::lifecycle(key.as_str(), "preset", format!("{e:#}"));
            return self.lifecycle_failed(e);
        }
        if let Err(e) = handler.on_load(element, key.clone()).await {
            let e = AppError::lifecycle(key.as_str(), "onload", format!("{e:#}"));
            return self.lifecycle_failed(e);
        }

        info!(module_key = %key, "Module {key} loaded");
        ExecutionOutcome::Executed
    }

    fn lifecycle_failed(&self, e: AppError) -> ExecutionOutcome {
        self.counters.lifecycle_failures.fetch_add(1, Ordering::Relaxed);
        error!("{e}");
        ExecutionOutcome::LifecycleFailed
    }
}

/// Returned by [`HandlerRegistry::hold_execution`].
#[must_use = "the hold is released when dropped"]
pub struct ExecutionHold<'a> {
    registry: &'a HandlerRegistry,
}

impl Drop for ExecutionHold<'_> {
    fn drop(&mut self) {
        self.registry.holds.send_modify(|count| *count -= 1);
    }
}

/// `[data-load-key="key"]` first, then `#key`.
pub fn key_selectors(key: &ModuleKey) -> [Selector; 2] {
    [
        Selector::attr_eq(LOAD_KEY_ATTR, key.as_str()),
        Selector::id(key.as_str()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::sync::atomic::AtomicUsize;

    fn loaded_doc(markup: &str) -> Document {
        let doc = Document::parse(markup);
        doc.mark_loaded();
        doc
    }

    fn counting(hits: &Arc<AtomicUsize>) -> Arc<dyn Lifecycle> {
        let hits = Arc::clone(hits);
        Arc::new(FnLifecycle::new().on_load(move |_, _| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let doc = loaded_doc(r#"<body><div data-load-key="a"></div><div id="b"></div></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(registry.register_handler(ModuleKey::new("a"), counting(&hits)).is_none());
        assert!(registry.register_handler(ModuleKey::new("b"), counting(&hits)).is_none());
        assert_eq!(registry.pending_keys().len(), 2);

        let first = registry.init().await;
        let second = registry.init().await;

        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|(_, o)| *o == ExecutionOutcome::Executed));
        assert!(second.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(registry.pending_keys().is_empty());
    }

    #[tokio::test]
    async fn test_registration_after_init_executes_immediately() {
        let doc = loaded_doc(r#"<body><section data-load-key="late"></section></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        registry.init().await;

        let hits = Arc::new(AtomicUsize::new(0));
        let handle = registry
            .register_handler(ModuleKey::new("late"), counting(&hits))
            .unwrap();
        assert_eq!(handle.await.unwrap(), ExecutionOutcome::Executed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_counts_presence_checks() {
        let doc = loaded_doc("<body></body>");
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_handler(ModuleKey::new("ghost"), counting(&hits));

        let started = Instant::now();
        let outcome = registry.execute_with_retry(ModuleKey::new("ghost"), 4).await;

        assert_eq!(outcome, ExecutionOutcome::NotReady);
        let stats = registry.stats();
        assert_eq!(stats.presence_checks, 4);
        assert_eq!(stats.readiness_failures, 1);
        // 100 + 200 + 300 ms between the four checks
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600) && elapsed < Duration::from_millis(700));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_wakes_pending_execution() {
        let doc = loaded_doc(r#"<body><main id="router"></main></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc.clone(), LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_handler(ModuleKey::new("moduleA"), counting(&hits));

        let started = Instant::now();
        let run = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.execute(ModuleKey::new("moduleA")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let router = doc.get_element_by_id("router").unwrap();
        doc.set_inner_html(router, r#"<div data-load-key="moduleA"></div>"#)
            .unwrap();

        assert_eq!(run.await.unwrap(), ExecutionOutcome::Executed);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(registry.stats().presence_checks, 2);
    }

    #[tokio::test]
    async fn test_same_mount_runs_once() {
        let doc = loaded_doc(r#"<body><main id="router"><div data-load-key="a"></div></main></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc.clone(), LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_handler(ModuleKey::new("a"), counting(&hits));

        assert_eq!(registry.execute(ModuleKey::new("a")).await, ExecutionOutcome::Executed);
        assert_eq!(registry.execute(ModuleKey::new("a")).await, ExecutionOutcome::AlreadyLoaded);

        let router = doc.get_element_by_id("router").unwrap();
        doc.set_inner_html(router, r#"<div data-load-key="a"></div>"#).unwrap();
        assert_eq!(registry.execute(ModuleKey::new("a")).await, ExecutionOutcome::Executed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_errors_are_contained() {
        let doc = loaded_doc(r#"<body><div id="broken"></div></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        let handler = FnLifecycle::new()
            .on_load(|_, _| async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .cleanup(|| async { Err::<(), _>(anyhow::anyhow!("cleanup boom")) });
        registry.register_handler(ModuleKey::new("broken"), Arc::new(handler));

        assert_eq!(
            registry.execute(ModuleKey::new("broken")).await,
            ExecutionOutcome::LifecycleFailed
        );
        assert!(registry.cleanup(&ModuleKey::new("broken")).await);
        assert!(!registry.cleanup(&ModuleKey::new("absent")).await);
        assert_eq!(registry.stats().lifecycle_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_handler_is_reported_not_retried() {
        let doc = loaded_doc("<body></body>");
        let registry = HandlerRegistry::new(doc, LifecycleConfig::default());
        assert_eq!(
            registry.execute(ModuleKey::new("nobody")).await,
            ExecutionOutcome::MissingHandler
        );
        assert_eq!(registry.stats().presence_checks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_defers_lifecycle_until_released() {
        let doc = loaded_doc(r#"<body><main id="router"></main></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc.clone(), LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_handler(ModuleKey::new("moduleA"), counting(&hits));

        let hold = registry.hold_execution();
        assert!(registry.is_held());
        let router = doc.get_element_by_id("router").unwrap();
        doc.set_inner_html(router, r#"<div data-load-key="moduleA"></div>"#)
            .unwrap();
        let run = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.execute(ModuleKey::new("moduleA")).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.stats().presence_checks, 0);

        drop(hold);
        assert!(!registry.is_held());
        assert_eq!(run.await.unwrap(), ExecutionOutcome::Executed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_without_runtime_keeps_handler() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let doc = loaded_doc(r#"<body><div id="outside"></div></body>"#);
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        runtime.block_on(registry.init());

        let hits = Arc::new(AtomicUsize::new(0));
        let key = ModuleKey::new("outside");
        assert!(registry.register_handler(key.clone(), counting(&hits)).is_none());
        assert!(registry.contains(&key));

        let outcome = runtime.block_on(registry.execute(key));
        assert_eq!(outcome, ExecutionOutcome::Executed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    type Spawned = Arc<Mutex<Vec<JoinHandle<ExecutionOutcome>>>>;

    /// On load, registers `inner` with the registry and keeps the spawned run.
    fn registering(
        registry: &Arc<HandlerRegistry>,
        inner: &'static str,
        hits: &Arc<AtomicUsize>,
        spawned: &Spawned,
    ) -> Arc<dyn Lifecycle> {
        let registry: Weak<HandlerRegistry> = Arc::downgrade(registry);
        let hits = Arc::clone(hits);
        let spawned = Arc::clone(spawned);
        Arc::new(FnLifecycle::new().on_load(move |_, _| {
            let registry = registry.upgrade();
            let handler = counting(&hits);
            let spawned = Arc::clone(&spawned);
            async move {
                let registry = registry.ok_or_else(|| anyhow::anyhow!("registry gone"))?;
                if let Some(run) = registry.register_handler(ModuleKey::new(inner), handler) {
                    spawned.lock().push(run);
                }
                anyhow::Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_registration_from_on_load_runs_once() {
        let doc = loaded_doc(
            r#"<body><div id="a"></div><div id="b"></div><div id="a2"></div><div id="b2"></div></body>"#,
        );
        let registry = Arc::new(HandlerRegistry::new(doc, LifecycleConfig::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        let spawned: Spawned = Arc::new(Mutex::new(Vec::new()));

        // during the init sweep
        let outer = registering(&registry, "b", &hits, &spawned);
        assert!(registry.register_handler(ModuleKey::new("a"), outer).is_none());
        let swept = registry.init().await;
        assert_eq!(swept, vec![(ModuleKey::new("a"), ExecutionOutcome::Executed)]);

        let runs: Vec<JoinHandle<ExecutionOutcome>> = spawned.lock().drain(..).collect();
        assert_eq!(runs.len(), 1);
        for run in runs {
            assert_eq!(run.await.unwrap(), ExecutionOutcome::Executed);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // after init
        let outer = registering(&registry, "b2", &hits, &spawned);
        let run = registry
            .register_handler(ModuleKey::new("a2"), outer)
            .unwrap();
        assert_eq!(run.await.unwrap(), ExecutionOutcome::Executed);
        let runs: Vec<JoinHandle<ExecutionOutcome>> = spawned.lock().drain(..).collect();
        assert_eq!(runs.len(), 1);
        for run in runs {
            assert_eq!(run.await.unwrap(), ExecutionOutcome::Executed);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        for key in ["a", "b", "a2", "b2"] {
            assert_eq!(
                registry.execute(ModuleKey::new(key)).await,
                ExecutionOutcome::AlreadyLoaded
            );
        }
        assert_eq!(registry.stats().executions, 4);
        assert!(registry.pending_keys().is_empty());
    }
}
