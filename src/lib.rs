//! Slate - interactive segmentation label editing.
//!
//! A session-layer crate that synchronizes per-pixel label edits with a
//! backend labeling service. Pointer input runs through tool state machines,
//! finished gestures become zip-bundled edit requests, and a snapshot history
//! keeps every committed edit undoable. The host embeds a [`Session`], feeds
//! it input, and renders from its accessors.

mod bundle;
mod bus;
mod config;
mod dispatcher;
mod error;
mod gateway;
mod history;
mod http;
mod keybindings;
mod message;
mod project;
mod session;
mod tools;
mod volume;

pub use bundle::{read_project_bundle, write_export_bundle};
pub use config::{ConfigError, SessionConfig};
pub use error::{BackendError, BundleError, SessionError};
pub use http::{Backend, HttpBackend};
pub use keybindings::{chord_to_string, key_to_string, KeyBindings, KeyChord, KeyCode};
pub use message::{
    DisplayMode, EditIntent, LabeledEvent, LabelsEvent, RawEvent, SessionCommand, SessionEvent,
    Tool, WriteMode,
};
pub use project::{Dimensions, Lineage, LoadedProject, Overlaps, Track};
pub use session::Session;
