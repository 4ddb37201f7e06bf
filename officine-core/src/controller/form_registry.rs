//! FormRegistry: one document-wide submit listener dispatching to callbacks
//! keyed by the submitting form's id.

use std::future::Future;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::dom::{Document, DomEvent, ElementRef, EventTarget, ListenerId, NodeId};
use crate::error::AppError;
use crate::forms::fields::{self, FormFields, Validity};
use crate::forms::validators::Validator;
use crate::keys::FormId;
use crate::notify::{NotificationLevel, NotificationSink};

pub type FormCallback =
    Arc<dyn Fn(FormContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Everything a form callback receives.
#[derive(Clone)]
pub struct FormContext {
    pub fields: FormFields,
    pub form: ElementRef,
    pub sink: Arc<NotificationSink>,
    pub dispatcher: Arc<FormRegistry>,
    pub validator: Validator,
}

impl FormContext {
    pub fn form_id(&self) -> Option<String> {
        self.form.id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The event target is not a form.
    Ignored,
    /// Built-in validation failed; nothing was dispatched.
    Invalid(Validity),
    NoHandler,
    Handled,
    /// The callback failed and the error went to the notification sink.
    Failed(String),
}

/// Result of the synchronous part of a submission.
#[derive(Debug)]
enum Prepared {
    Ignored,
    Invalid(Validity),
    Ready(FormFields),
}

pub struct FormRegistry {
    document: Document,
    sink: Arc<NotificationSink>,
    handlers: DashMap<FormId, FormCallback>,
    listener: Mutex<Option<ListenerId>>,
}

impl std::fmt::Debug for FormRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormRegistry")
            .field("handlers", &self.handlers.len())
            .field("installed", &self.listener.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl FormRegistry {
    pub fn new(document: Document, sink: Arc<NotificationSink>) -> Self {
        Self {
            document,
            sink,
            handlers: DashMap::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn sink(&self) -> &Arc<NotificationSink> {
        &self.sink
    }

    pub fn register<F, Fut>(&self, form_id: FormId, callback: F)
    where
        F: Fn(FormContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_callback(form_id, Arc::new(move |ctx| callback(ctx).boxed()));
    }

    pub fn register_callback(&self, form_id: FormId, callback: FormCallback) {
        info!(form_id = %form_id, "Form handler registered for {form_id}");
        self.handlers.insert(form_id, callback);
    }

    pub fn unregister(&self, form_id: &FormId) -> bool {
        self.handlers.remove(form_id).is_some()
    }

    pub fn contains(&self, form_id: &FormId) -> bool {
        self.handlers.contains_key(form_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear_all_handlers(&self) {
        let count: usize = self.handlers.len();
        self.handlers.clear();
        debug!("Cleared {count} form handler(s)");
    }

    /// Attaches the document-level submit listener. Only the first call
    /// attaches anything.
    pub fn install(self: &Arc<Self>) -> ListenerId {
        let mut slot = self.listener.lock();
        if let Some(id) = *slot {
            return id;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id: ListenerId = self.document.add_listener(
            EventTarget::Document,
            "submit",
            Arc::new(move |event: &DomEvent| {
                if let Some(registry) = weak.upgrade() {
                    registry.on_submit_event(event);
                }
            }),
        );
        *slot = Some(id);
        info!("FormRegistry listening for submissions");
        id
    }

    fn on_submit_event(self: &Arc<Self>, event: &DomEvent) {
        let form: NodeId = event.target();
        let Prepared::Ready(fields) = self.prepare(form) else {
            return;
        };
        event.prevent_default();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry: Arc<Self> = Arc::clone(self);
                handle.spawn(async move { registry.dispatch(form, fields).await });
            }
            Err(e) => error!("Submission of {form} dropped, no async runtime: {e}"),
        }
    }

    /// The whole submission path, awaited in place.
    pub async fn handle_submit(self: &Arc<Self>, target: NodeId) -> SubmitOutcome {
        match self.prepare(target) {
            Prepared::Ignored => SubmitOutcome::Ignored,
            Prepared::Invalid(validity) => SubmitOutcome::Invalid(validity),
            Prepared::Ready(fields) => self.dispatch(target, fields).await,
        }
    }

    fn prepare(&self, target: NodeId) -> Prepared {
        if self.document.tag_name(target).as_deref() != Some("form") {
            return Prepared::Ignored;
        }
        let validity: Validity = fields::check_validity(&self.document, target);
        if !validity.is_valid() {
            debug!("Form {target} failed built-in validation: {:?}", validity.violations);
            return Prepared::Invalid(validity);
        }
        Prepared::Ready(fields::extract(&self.document, target))
    }

    async fn dispatch(self: &Arc<Self>, form: NodeId, fields: FormFields) -> SubmitOutcome {
        let id: String = self.document.attr(form, "id").unwrap_or_default();
        let form_id: FormId = FormId::new(&id);
        let Some(callback) = self.handlers.get(&form_id).map(|entry| Arc::clone(entry.value()))
        else {
            warn!(form_id = %form_id, "No handler for form {form_id}");
            return SubmitOutcome::NoHandler;
        };

        let context: FormContext = FormContext {
            fields,
            form: ElementRef::new(self.document.clone(), form),
            sink: Arc::clone(&self.sink),
            dispatcher: Arc::clone(self),
            validator: Validator,
        };

        match callback(context).await {
            Ok(()) => {
                debug!(form_id = %form_id, "Form {form_id} handled");
                SubmitOutcome::Handled
            }
            Err(e) => {
                let failure = AppError::form_handler(form_id.as_str(), format!("{e:#}"));
                error!(form_id = %form_id, "{failure}");
                let message: String = match e.to_string() {
                    text if text.trim().is_empty() => "Erreur inconnue".to_string(),
                    text => text,
                };
                self.sink
                    .show_when_ready(NotificationLevel::Error, message.as_str())
                    .await;
                SubmitOutcome::Failed(message)
            }
        }
    }
}
