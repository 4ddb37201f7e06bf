pub mod error;

pub mod config;

pub mod keys;
pub use keys::{FormId, ModuleKey, Route};

pub mod dom;

pub mod fetch;

pub mod cache {
    pub mod template_cache;
    pub use template_cache::TemplateCache;
}

pub mod includes;
pub use includes::IncludeResolver;

pub mod notify;
pub use notify::{Notification, NotificationLevel, NotificationSink};

pub mod forms {
    pub mod fields;
    pub use fields::FormFields;

    pub mod validators;
    pub use validators::{Check, Validator};
}

pub mod controller {
    pub mod handler_registry;
    pub use handler_registry::{
        ExecutionHold, ExecutionOutcome, FnLifecycle, HandlerRegistry, Lifecycle,
    };

    pub mod form_registry;
    pub use form_registry::{FormContext, FormRegistry, SubmitOutcome};

    pub mod navigation;
    pub use navigation::{Location, NavigationEvent, NavigationIndicator};

    pub mod router;
    pub use router::{LoadOutcome, Router, RouterState};

    pub mod view_handler;
    pub use view_handler::{View, ViewHandler, ViewModule};
}

pub mod shell;
pub use shell::Shell;

pub mod logging;
pub use logging::Logger;

pub use error::{AppError, AppResult};
