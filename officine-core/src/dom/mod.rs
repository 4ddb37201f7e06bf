//! Document tree host model: arena nodes, markup parsing, selectors, events
//! and mount notifications.

pub mod document;
pub mod markup;
pub mod node;
pub mod selector;

pub use document::{
    Document, DomEvent, ElementRef, EventTarget, Listener, ListenerId, MountEvent,
};
pub use node::{ElementData, NodeData, NodeId};
pub use selector::Selector;
