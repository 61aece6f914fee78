//! Error types.
//!
//! Only boundary operations return these: loading a capture, a layout or the
//! configuration, opening a device, starting the collector. Per-frame problems
//! are never errors; they are [`DropReason`](crate::collector::DropReason)s.

use std::path::PathBuf;
use thiserror::Error;

/// A capture file that cannot be interpreted. Fatal for that file.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("bad capture magic {found:?} (expected \"ATPCAP01\")")]
    BadMagic { found: [u8; 8] },

    #[error("unsupported capture version {0}")]
    UnsupportedVersion(u32),

    #[error("capture header truncated: {len} bytes")]
    TruncatedHeader { len: usize },

    #[error("record {record} truncated at offset {offset}: needs {needed} bytes, {available} left")]
    TruncatedRecord {
        record: usize,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid metadata record {record}: {reason}")]
    InvalidMetadata { record: usize, reason: String },

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key layout that cannot be indexed.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("binding {index} ({label}) has an invalid region")]
    InvalidRegion { index: usize, label: String },

    #[error("snap radius {0} must be finite and positive")]
    InvalidSnapRadius(f32),

    #[error("layout has {count} bindings; at most {max} are supported")]
    TooManyBindings { count: usize, max: usize },

    #[error("layout parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("layout I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(serde_json::Error),

    #[error("config serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// Per-device failures at the frame source boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("access denied to device {device}")]
    AccessDenied { device: String },

    #[error("device disconnected")]
    Disconnected,

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector is already running")]
    AlreadyRunning,

    #[error("no usable devices")]
    NoDevices,

    #[error("failed to spawn reader thread: {0}")]
    Spawn(std::io::Error),
}
