//! Frame collection for GlassToKey.
//!
//! Device sources deliver raw contact updates; a reader thread per device
//! assembles them into normalized frames and queues them for the session.

pub mod assembler;
pub mod reader;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use assembler::{ContactUpdate, DropReason, FrameAssembler, ReportInfo};
pub use reader::{Collector, CollectorConfig};
pub use source::{
    FrameSource, NoopSource, ReadStatus, ScriptedReport, ScriptedSource, SOURCE_TICK_FREQUENCY,
};
pub use types::{
    Contact, ContactState, DeviceDescriptor, DeviceProfile, Frame, FrameEnvelope, Side,
};
