//! Device source boundary.
//!
//! A [`FrameSource`] is one opened touchpad handle. Platform backends
//! implement it; the reader thread owns it and drops it (releasing the
//! handle) on every exit path.

use crate::collector::assembler::{ContactUpdate, ReportInfo};
use crate::collector::types::DeviceDescriptor;
use crate::error::SourceError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Live sources stamp arrival in microseconds.
pub const SOURCE_TICK_FREQUENCY: u64 = 1_000_000;

/// Outcome of one [`FrameSource::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// One input report was decoded into the update buffer
    Report { info: ReportInfo, arrival_ticks: u64 },
    /// Nothing arrived within the timeout
    Timeout,
}

pub trait FrameSource: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Block for at most `timeout` waiting for the next input report and
    /// append its decoded updates to `updates`.
    fn read(
        &mut self,
        updates: &mut Vec<ContactUpdate>,
        timeout: Duration,
    ) -> Result<ReadStatus, SourceError>;
}

/// A source that never reports. Used where no platform backend exists.
#[derive(Debug)]
pub struct NoopSource {
    descriptor: DeviceDescriptor,
}

impl NoopSource {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self { descriptor }
    }
}

impl FrameSource for NoopSource {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn read(
        &mut self,
        _updates: &mut Vec<ContactUpdate>,
        timeout: Duration,
    ) -> Result<ReadStatus, SourceError> {
        std::thread::sleep(timeout);
        Ok(ReadStatus::Timeout)
    }
}

/// One scripted input report.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedReport {
    pub info: ReportInfo,
    pub arrival_ticks: u64,
    pub updates: Vec<ContactUpdate>,
}

impl ScriptedReport {
    /// A well-formed digitizer report for `descriptor`.
    pub fn new(descriptor: &DeviceDescriptor, arrival_ticks: u64, updates: Vec<ContactUpdate>) -> Self {
        Self {
            info: ReportInfo::decoded(descriptor),
            arrival_ticks,
            updates,
        }
    }
}

/// Plays back a fixed list of reports, then either disconnects or idles.
#[derive(Debug)]
pub struct ScriptedSource {
    descriptor: DeviceDescriptor,
    reports: VecDeque<ScriptedReport>,
    /// Keep returning timeouts once the script is exhausted
    idle_when_done: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(descriptor: DeviceDescriptor, reports: Vec<ScriptedReport>) -> Self {
        Self {
            descriptor,
            reports: reports.into(),
            idle_when_done: false,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn idle_when_done(mut self) -> Self {
        self.idle_when_done = true;
        self
    }

    /// Set once the source has been dropped.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl FrameSource for ScriptedSource {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn read(
        &mut self,
        updates: &mut Vec<ContactUpdate>,
        timeout: Duration,
    ) -> Result<ReadStatus, SourceError> {
        match self.reports.pop_front() {
            Some(report) => {
                updates.extend_from_slice(&report.updates);
                Ok(ReadStatus::Report {
                    info: report.info,
                    arrival_ticks: report.arrival_ticks,
                })
            }
            None if self.idle_when_done => {
                std::thread::sleep(timeout);
                Ok(ReadStatus::Timeout)
            }
            None => Err(SourceError::Disconnected),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
