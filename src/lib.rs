//! GlassToKey - flat gesture keyboard engine.
//!
//! This library turns raw multitouch contact reports from one or two
//! trackpads into keyboard and pointer events, with a binary capture format
//! that doubles as a deterministic regression harness.
//!
//! # Guarantees
//!
//! - **Deterministic**: the same configuration and frames produce the same
//!   events, transition counts and fingerprints
//! - **Bounded**: per-frame processing does not allocate after warm-up
//! - **Non-blocking**: device readers never wait on the engine; overload is
//!   counted, not queued
//! - **Auditable**: every dropped frame is attributed to one of six reasons
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            GlassToKey                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │ FrameSource │──▶│  Assembler  │──▶│   bounded   │  per device │
//! │  │  (device)   │   │  (frames)   │   │    queue    │             │
//! │  └─────────────┘   └─────────────┘   └─────────────┘             │
//! │                                             │                    │
//! │  ┌─────────────┐                            ▼                    │
//! │  │   Capture   │──── replay ──────▶┌─────────────┐               │
//! │  │  (.atpcap)  │◀─── record ───────│   Session   │               │
//! │  └─────────────┘                   │  + Intent   │               │
//! │                                    └─────────────┘               │
//! │  ┌─────────────┐                          │                      │
//! │  │ Diagnostics │◀── counters ─────────────┤                      │
//! │  └─────────────┘                          ▼                      │
//! │                                    ┌─────────────┐               │
//! │                                    │DispatchSink │               │
//! │                                    └─────────────┘               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use glasstokey::{config::Config, replay};
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let index = Arc::new(config.binding_index().expect("layout"));
//! let capture = replay::Capture::load("session.atpcap".as_ref()).expect("capture");
//!
//! let report = replay::replay(&capture, &config.engine, index);
//! println!("{:#018X}", report.fingerprint());
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod replay;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{Collector, CollectorConfig, DropReason, Frame, FrameEnvelope, FrameSource};
pub use config::{Config, EngineConfig};
pub use core::{BindingIndex, DispatchEvent, DispatchSink, IntentEngine, KeyLayout, Session};
pub use error::{CaptureError, CollectorError, ConfigError, LayoutError, SourceError};
pub use replay::{Capture, CaptureWriter, ReplayReport};
pub use transparency::{Diagnostics, DiagnosticsSummary, SharedDiagnostics};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
