//! Core functionality for GlassToKey.
//!
//! This module contains:
//! - The contact tracker keyed by device and contact id
//! - Binding layouts and the spatial lookup index
//! - The intent engine turning frames into key and pointer intents
//! - Dispatch events and sinks
//! - The session that routes device frames through all of the above

pub mod bindings;
pub mod dispatch;
pub mod intent;
pub mod session;
pub mod tracker;

// Re-export commonly used types
pub use bindings::{Action, Binding, BindingIndex, KeyLayout, KeyPolicy, Modifiers, Probe};
pub use dispatch::{
    ChannelSink, Delivery, DispatchAction, DispatchEvent, DispatchSink, MouseButton, RecordingSink,
};
pub use intent::{IntentEngine, IntentMode};
pub use session::{Session, MAX_SESSION_DEVICES};
pub use tracker::ContactTracker;
