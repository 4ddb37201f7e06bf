//! src/error.rs
//! ============================================================================
//! # `AppError`: Unified Error Type for the Application Runtime
//!
//! One enum covers every failure the runtime can observe: markup fetches,
//! configuration, the document tree, view lifecycles and form handlers. Core
//! modules return `AppResult<T>`; business callbacks return `anyhow::Result`
//! and are folded into [`AppError::Lifecycle`] / [`AppError::FormHandler`]
//! where they are caught.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Convenient alias carrying the unified error type
pub type AppResult<T> = Result<T, AppError>;

/// Unified error type for all runtime operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Standard IO error, auto-converted from `io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A markup or template resource answered with a non-success status.
    #[error("Fetch of {url} failed with HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    /// The resource could not be reached at all.
    #[error("Transport error while fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    /// A URL that cannot be mapped onto the asset tree.
    #[error("Invalid resource path '{url}': {reason}")]
    InvalidPath { url: String, reason: String },

    /// TOML config parsing error.
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// TOML config serialisation error.
    #[error("Config serialise error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Config file I/O error with path.
    #[error("Failed to read config file {path:?}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Serialization or deserialization error (e.g., JSON).
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A selector or id that should resolve to an element did not.
    #[error("Target element not found: {0}")]
    TargetNotFound(String),

    /// A node handle that no longer belongs to the document.
    #[error("Stale node handle: {0}")]
    StaleNode(String),

    /// A view lifecycle callback failed.
    #[error("Lifecycle '{stage}' failed for module {key}: {reason}")]
    Lifecycle {
        key: String,
        stage: &'static str,
        reason: String,
    },

    /// A form callback failed.
    #[error("Form handler for {form_id} failed: {reason}")]
    FormHandler { form_id: String, reason: String },

    /// Element for a module key never appeared.
    #[error("Module {key} not ready after {attempts} attempts")]
    ReadinessTimeout { key: String, attempts: u32 },

    /// Logging subsystem error.
    #[error("Logging error: {0}")]
    Logging(String),

    /// Any other error, with description.
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl AppError {
    /// Create a fetch status error
    pub fn fetch_status<S: Into<String>>(url: S, status: u16) -> Self {
        Self::FetchStatus {
            url: url.into(),
            status,
        }
    }

    /// Create a transport error
    pub fn transport<S1: Into<String>, S2: Into<String>>(url: S1, reason: S2) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path<S1: Into<String>, S2: Into<String>>(url: S1, reason: S2) -> Self {
        Self::InvalidPath {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a lifecycle failure error
    pub fn lifecycle<S1: Into<String>, S2: Into<String>>(
        key: S1,
        stage: &'static str,
        reason: S2,
    ) -> Self {
        Self::Lifecycle {
            key: key.into(),
            stage,
            reason: reason.into(),
        }
    }

    /// Create a form handler failure error
    pub fn form_handler<S1: Into<String>, S2: Into<String>>(form_id: S1, reason: S2) -> Self {
        Self::FormHandler {
            form_id: form_id.into(),
            reason: reason.into(),
        }
    }

    /// HTTP-like status carried by the error, if any
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::FetchStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Manual Clone implementation to handle non-Clone fields
impl Clone for AppError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::FetchStatus { url, status } => Self::FetchStatus {
                url: url.clone(),
                status: *status,
            },
            Self::Transport { url, reason } => Self::Transport {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::InvalidPath { url, reason } => Self::InvalidPath {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::Config(e) => Self::Other(format!("Config error: {e}")),
            Self::ConfigWrite(e) => Self::Other(format!("Config error: {e}")),
            Self::ConfigIo { path, source } => Self::ConfigIo {
                path: path.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Self::Serde(e) => Self::Other(format!("Serde error: {e}")),
            Self::TargetNotFound(target) => Self::TargetNotFound(target.clone()),
            Self::StaleNode(node) => Self::StaleNode(node.clone()),
            Self::Lifecycle { key, stage, reason } => Self::Lifecycle {
                key: key.clone(),
                stage: *stage,
                reason: reason.clone(),
            },
            Self::FormHandler { form_id, reason } => Self::FormHandler {
                form_id: form_id.clone(),
                reason: reason.clone(),
            },
            Self::ReadinessTimeout { key, attempts } => Self::ReadinessTimeout {
                key: key.clone(),
                attempts: *attempts,
            },
            Self::Logging(msg) => Self::Logging(msg.clone()),
            Self::Other(msg) => Self::Other(msg.clone()),
        }
    }
}

// Allow conversion from `anyhow::Error` as fallback.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::Other(e.to_string())
    }
}
