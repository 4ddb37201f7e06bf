//! src/shell.rs
//! ============================================================================
//! # Shell: composition root
//!
//! Builds every service around one [`Document`] and boots them in order:
//! layout includes, submit and link listeners, the load signal, the handler
//! registry sweep, the router event loop and finally the initial route.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::template_cache::TemplateCache;
use crate::config::{AssetConfig, Config};
use crate::controller::form_registry::FormRegistry;
use crate::controller::handler_registry::{HandlerRegistry, Lifecycle};
use crate::controller::navigation::{Location, NavigationEvent};
use crate::controller::router::{LoadOutcome, Router, RouterParts};
use crate::dom::Document;
use crate::error::AppResult;
use crate::fetch::{Fetcher, HttpFetcher, StaticDirFetcher};
use crate::includes::{IncludeReport, IncludeResolver};
use crate::keys::{ModuleKey, Route};
use crate::notify::NotificationSink;

pub struct Shell {
    pub config: Config,
    pub document: Document,
    pub location: Arc<Location>,
    pub fetcher: Arc<dyn Fetcher>,
    pub templates: TemplateCache,
    pub includes: IncludeResolver,
    pub sink: Arc<NotificationSink>,
    pub handlers: Arc<HandlerRegistry>,
    pub forms: Arc<FormRegistry>,
    pub router: Arc<Router>,
    events: Mutex<Option<UnboundedReceiver<NavigationEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("router", &self.router)
            .field("handlers", &self.handlers)
            .field("forms", &self.forms)
            .finish_non_exhaustive()
    }
}

impl Shell {
    /// Wires the services around `document`. Nothing runs until
    /// [`boot`](Self::boot).
    pub fn new(
        config: Config,
        document: Document,
        fetcher: Arc<dyn Fetcher>,
        initial: Option<Route>,
    ) -> Self {
        let (location, events) = Location::new(initial);
        let location: Arc<Location> = Arc::new(location);
        let templates: TemplateCache =
            TemplateCache::new(Arc::clone(&fetcher), config.templates.clone());
        let includes: IncludeResolver =
            IncludeResolver::new(templates.clone(), config.includes.clone());
        let sink: Arc<NotificationSink> = Arc::new(NotificationSink::new(
            document.clone(),
            config.notifications.clone(),
        ));
        let handlers: Arc<HandlerRegistry> = Arc::new(HandlerRegistry::new(
            document.clone(),
            config.lifecycle.clone(),
        ));
        let forms: Arc<FormRegistry> =
            Arc::new(FormRegistry::new(document.clone(), Arc::clone(&sink)));

        let router: Arc<Router> = Arc::new(Router::new(
            RouterParts {
                document: document.clone(),
                location: Arc::clone(&location),
                fetcher: Arc::clone(&fetcher),
                includes: includes.clone(),
                handlers: Arc::clone(&handlers),
                forms: Arc::clone(&forms),
            },
            config.router.clone(),
        ));

        Self {
            config,
            document,
            location,
            fetcher,
            templates,
            includes,
            sink,
            handlers,
            forms,
            router,
            events: Mutex::new(Some(events)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Fetches the index document named in the asset config and wires the
    /// services around it.
    pub async fn from_index(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        initial: Option<Route>,
    ) -> AppResult<Self> {
        let index: String = fetcher.fetch_text(&config.assets.index).await?;
        let document: Document = Document::parse(&index);
        info!("Index document {} parsed", config.assets.index);
        Ok(Self::new(config, document, fetcher, initial))
    }

    /// Remote assets when a base URL is configured, the local tree
    /// otherwise.
    pub fn fetcher_for(assets: &AssetConfig) -> AppResult<Arc<dyn Fetcher>> {
        Ok(match &assets.base_url {
            Some(base_url) => Arc::new(HttpFetcher::new(base_url)?),
            None => Arc::new(StaticDirFetcher::new(assets.root_dir.clone())),
        })
    }

    pub fn register_module(&self, key: ModuleKey, lifecycle: Arc<dyn Lifecycle>) {
        self.handlers.register_handler(key, lifecycle);
    }

    /// Starts the application. Returns the outcome of the initial route
    /// load, which is [`LoadOutcome::Redirected`] when the address was empty
    /// and the event loop picks up the default route.
    pub async fn boot(&self) -> AppResult<LoadOutcome> {
        let layout: IncludeReport = self
            .includes
            .resolve(&self.document, self.document.body())
            .await;
        info!("Layout includes loaded ({} resolved)", layout.resolved);

        self.forms.install();
        self.router.install();
        self.document.mark_loaded();

        let handlers: Arc<HandlerRegistry> = Arc::clone(&self.handlers);
        let init: JoinHandle<()> = tokio::spawn(async move {
            handlers.init().await;
        });
        self.tasks.lock().push(init);

        match self.events.lock().take() {
            Some(events) => {
                let router: Arc<Router> = Arc::clone(&self.router);
                self.tasks.lock().push(tokio::spawn(router.run(events)));
            }
            None => warn!("Shell already booted, router loop not restarted"),
        }

        Ok(self.router.load_route().await)
    }

    /// Stops the background tasks started by [`boot`](Self::boot).
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        info!("Shell stopped ({} task(s) aborted)", tasks.len());
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
