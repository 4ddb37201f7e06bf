//! Base for business views: tracked listeners, tracked form bindings, an
//! element cache, and a single cleanup that undoes all of it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use compact_str::{CompactString, format_compact};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::form_registry::{FormContext, FormRegistry};
use super::handler_registry::{ExecutionOutcome, HandlerRegistry, Lifecycle};
use crate::dom::{Document, DomEvent, ElementRef, EventTarget, ListenerId, NodeId};
use crate::keys::{FormId, ModuleKey};

/// Set on a view's root element once its lifecycle has started.
pub const LOADED_ATTR: &str = "data-loaded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRecord {
    pub node: NodeId,
    pub event_type: CompactString,
    pub id: ListenerId,
}

fn bound_marker(event_type: &str) -> CompactString {
    format_compact!("data-bound-{event_type}")
}

pub struct ViewHandler {
    key: ModuleKey,
    document: Document,
    // the registry owns registered modules
    handlers: Weak<HandlerRegistry>,
    forms: Arc<FormRegistry>,
    listeners: Mutex<Vec<ListenerRecord>>,
    form_ids: Mutex<Vec<FormId>>,
    elements: Mutex<HashMap<String, NodeId>>,
}

impl std::fmt::Debug for ViewHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandler")
            .field("key", &self.key)
            .field("listeners", &self.listeners.lock().len())
            .field("form_ids", &*self.form_ids.lock())
            .finish_non_exhaustive()
    }
}

impl ViewHandler {
    pub fn new(
        key: ModuleKey,
        document: Document,
        handlers: &Arc<HandlerRegistry>,
        forms: Arc<FormRegistry>,
    ) -> Self {
        Self {
            key,
            document,
            handlers: Arc::downgrade(handlers),
            forms,
            listeners: Mutex::new(Vec::new()),
            form_ids: Mutex::new(Vec::new()),
            elements: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Attaches `callback` for `event_type` on `node` and records it. A node
    /// already bound for that event type (per its `data-bound-<type>`
    /// marker) is left alone and `None` is returned.
    pub fn add_listener<F>(&self, node: NodeId, event_type: &str, callback: F) -> Option<ListenerId>
    where
        F: Fn(&DomEvent) + Send + Sync + 'static,
    {
        let marker: CompactString = bound_marker(event_type);
        if self.document.has_attr(node, &marker) {
            debug!(module_key = %self.key, "{event_type} already bound on {node}");
            return None;
        }
        if let Err(e) = self.document.set_attr(node, &marker, "true") {
            warn!(module_key = %self.key, "Cannot bind {event_type}: {e}");
            return None;
        }

        let id: ListenerId =
            self.document
                .add_listener(EventTarget::Node(node), event_type, Arc::new(callback));
        self.listeners.lock().push(ListenerRecord {
            node,
            event_type: CompactString::new(event_type),
            id,
        });
        Some(id)
    }

    /// Binds a form callback and remembers the id.
    pub fn register_form<F, Fut>(&self, form_id: FormId, callback: F)
    where
        F: Fn(FormContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.forms.register(form_id.clone(), callback);
        let mut ids = self.form_ids.lock();
        if !ids.contains(&form_id) {
            ids.push(form_id);
        }
    }

    /// Element with the given id, cached for later calls while it stays in
    /// the document. Logs a warning when `required` and absent.
    pub fn get_element(&self, id: &str, required: bool) -> Option<NodeId> {
        if let Some(&node) = self.elements.lock().get(id) {
            if self.document.contains(node) {
                return Some(node);
            }
        }

        match self.document.get_element_by_id(id) {
            Some(node) => {
                self.elements.lock().insert(id.to_string(), node);
                Some(node)
            }
            None => {
                self.elements.lock().remove(id);
                if required {
                    warn!(module_key = %self.key, "Required element #{id} not found");
                }
                None
            }
        }
    }

    pub fn listeners(&self) -> Vec<ListenerRecord> {
        self.listeners.lock().clone()
    }

    pub fn form_ids(&self) -> Vec<FormId> {
        self.form_ids.lock().clone()
    }

    /// Detaches every recorded listener and its marker, forgets the form
    /// ids and empties the element cache.
    pub fn cleanup(&self) {
        let records: Vec<ListenerRecord> = std::mem::take(&mut *self.listeners.lock());
        let count: usize = records.len();
        for record in records {
            self.document.remove_listener(record.id);
            // a node removed with its view has no marker left to clear
            let _ = self
                .document
                .remove_attr(record.node, &bound_marker(&record.event_type));
        }
        self.form_ids.lock().clear();
        self.elements.lock().clear();
        info!(module_key = %self.key, "Cleaned up {count} listener(s) for {}", self.key);
    }
}

/// The part a business view supplies on top of [`ViewHandler`].
#[async_trait]
pub trait View: Send + Sync + 'static {
    async fn on_load(&self, base: &ViewHandler, element: ElementRef) -> anyhow::Result<()>;

    /// Runs before the base bookkeeping is torn down.
    async fn on_cleanup(&self, _base: &ViewHandler) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A [`View`] with its [`ViewHandler`], usable as a [`Lifecycle`].
pub struct ViewModule<V: View> {
    base: ViewHandler,
    view: V,
}

impl<V: View> ViewModule<V> {
    pub fn new(base: ViewHandler, view: V) -> Self {
        Self { base, view }
    }

    pub fn base(&self) -> &ViewHandler {
        &self.base
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Registers this module under its key. `None` when the registry is
    /// gone or the run could not be spawned.
    pub fn register(self: Arc<Self>) -> Option<JoinHandle<ExecutionOutcome>> {
        let key: ModuleKey = self.base.key.clone();
        let Some(registry) = self.base.handlers.upgrade() else {
            warn!(module_key = %key, "Handler registry dropped, {key} not registered");
            return None;
        };
        registry.register_handler(key, self)
    }
}

#[async_trait]
impl<V: View> Lifecycle for ViewModule<V> {
    fn preset_on_load(&self, element: &ElementRef, key: &ModuleKey) -> anyhow::Result<()> {
        element.set_attr(LOADED_ATTR, "true")?;
        debug!(module_key = %key, "Preset done for {key}");
        Ok(())
    }

    async fn on_load(&self, element: ElementRef, _key: ModuleKey) -> anyhow::Result<()> {
        self.view.on_load(&self.base, element).await
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        let result: anyhow::Result<()> = self.view.on_cleanup(&self.base).await;
        self.base.cleanup();
        result
    }
}
