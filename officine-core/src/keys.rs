//! Strongly typed identifiers used as registry keys.
//!
//! Routes, module keys and form ids are all strings on the wire (the
//! navigation address and markup attributes), but they are never
//! interchangeable: a `FormId` cannot be passed where a `ModuleKey` is
//! expected.

use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(CompactString);

        impl $name {
            pub fn new(value: impl AsRef<str>) -> Self {
                Self(CompactString::new(value.as_ref()))
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(CompactString::from(value))
            }
        }
    };
}

string_key! {
    /// Path of a fetchable view fragment, e.g. `views/officine/officine.html`.
    Route
}

string_key! {
    /// Binds a loaded fragment to its lifecycle handler.
    ModuleKey
}

string_key! {
    /// Identifier of a form whose submissions are dispatched to a callback.
    FormId
}

impl Route {
    /// Route carried by a fragment-style address (`#views/a.html` or
    /// `views/a.html`). Empty addresses carry no route.
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        let trimmed: &str = fragment.trim_start_matches('#');
        (!trimmed.is_empty()).then(|| Self::new(trimmed))
    }

    /// The address form of the route, with its leading `#`.
    pub fn to_fragment(&self) -> String {
        format!("#{}", self.as_str())
    }
}
