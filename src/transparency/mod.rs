//! Transparency module for GlassToKey.
//!
//! Frame counters, drop reasons, fingerprints and the persisted session
//! summary that make the pipeline's behaviour auditable.

pub mod diagnostics;

// Re-export commonly used types
pub use diagnostics::{
    AllocationSummary, Diagnostics, DiagnosticsSummary, DispatchSummary, DropCounts,
    FrameCounters, IntentSummary, LatencyRing, LatencySummary, SharedDiagnostics,
};
