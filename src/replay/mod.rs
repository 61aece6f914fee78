//! Capture files and deterministic replay.

pub mod driver;
pub mod fingerprint;
pub mod format;

pub use driver::{
    replay, run_selftest, selftest_capture, ReplayExpectations, ReplayReport, SelftestReport,
};
pub use fingerprint::Fingerprint;
pub use format::{Capture, CaptureWriter, MetaRecord, Record, RecordHeader};
