//! Per-device reader threads.
//!
//! Each opened device gets its own thread that reads input reports, folds them
//! into frames and queues them for the session on a bounded channel. A full
//! queue drops the newest frame; the reader never blocks on the session.

use crate::collector::assembler::{classify_report, DropReason, FrameAssembler};
use crate::collector::source::{FrameSource, ReadStatus};
use crate::collector::types::{DeviceDescriptor, FrameEnvelope};
use crate::error::{CollectorError, SourceError};
use crate::transparency::SharedDiagnostics;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reader settings.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Frames buffered per device
    pub queue_capacity: usize,
    /// Longest a read may block before the cancel flag is rechecked
    pub read_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Owns the reader threads for one session.
pub struct Collector {
    config: CollectorConfig,
    diagnostics: SharedDiagnostics,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    receivers: Vec<Receiver<FrameEnvelope>>,
    descriptors: Vec<DeviceDescriptor>,
}

impl Collector {
    pub fn new(config: CollectorConfig, diagnostics: SharedDiagnostics) -> Self {
        Self {
            config,
            diagnostics,
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            receivers: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Start a reader for every source that opened.
    ///
    /// Sources that failed to open are recorded and skipped; startup only
    /// fails when none are left.
    pub fn start(
        &mut self,
        sources: Vec<Result<Box<dyn FrameSource>, SourceError>>,
    ) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        for source in sources {
            let source = match source {
                Ok(source) => source,
                Err(SourceError::AccessDenied { device }) => {
                    warn!("Access denied to {}; continuing without it", device);
                    self.diagnostics.record_device_denied(&device);
                    continue;
                }
                Err(e) => {
                    warn!("Device failed to open: {}", e);
                    self.diagnostics
                        .record_reader_fault(format!("open failed: {e}"));
                    continue;
                }
            };
            if let Err(e) = self.spawn_reader(source) {
                self.stop();
                return Err(e);
            }
        }

        if self.threads.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(CollectorError::NoDevices);
        }
        info!(devices = self.threads.len(), "collector started");
        Ok(())
    }

    fn spawn_reader(&mut self, source: Box<dyn FrameSource>) -> Result<(), CollectorError> {
        let descriptor = source.descriptor().clone();
        let (sender, receiver) = bounded(self.config.queue_capacity.max(1));
        let running = self.running.clone();
        let diagnostics = self.diagnostics.clone();
        let timeout = self.config.read_timeout;

        let handle = thread::Builder::new()
            .name(format!("glasstokey-reader-{}", descriptor.index))
            .spawn(move || run_reader(source, sender, running, diagnostics, timeout))
            .map_err(CollectorError::Spawn)?;

        self.threads.push(handle);
        self.receivers.push(receiver);
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Signal every reader to stop and wait for them.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared cancel flag; clearing it stops readers and the session drain.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Per-device frame queues, in the order devices were started.
    pub fn receivers(&self) -> &[Receiver<FrameEnvelope>] {
        &self.receivers
    }

    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reader loop for one device. The source is dropped when this returns.
fn run_reader(
    mut source: Box<dyn FrameSource>,
    sender: Sender<FrameEnvelope>,
    running: Arc<AtomicBool>,
    diagnostics: SharedDiagnostics,
    timeout: Duration,
) {
    let descriptor = source.descriptor().clone();
    let mut assembler = FrameAssembler::new(descriptor.clone(), diagnostics.clone());
    let mut updates = Vec::with_capacity(64);
    debug!(device = %descriptor.name, "reader started");

    while running.load(Ordering::SeqCst) {
        updates.clear();
        let (info, arrival_ticks) = match source.read(&mut updates, timeout) {
            Ok(ReadStatus::Report {
                info,
                arrival_ticks,
            }) => (info, arrival_ticks),
            Ok(ReadStatus::Timeout) => continue,
            Err(SourceError::Disconnected) => {
                info!(device = %descriptor.name, "device disconnected");
                break;
            }
            Err(e) => {
                warn!("Reader for {} failed: {}", descriptor.name, e);
                diagnostics.record_reader_fault(format!("{}: {e}", descriptor.name));
                break;
            }
        };

        if let Err(reason) = classify_report(&info) {
            diagnostics.record_seen();
            diagnostics.record_drop(reason);
            assembler.discard_pending();
            continue;
        }

        for update in updates.drain(..) {
            let Some(envelope) = assembler.push(update, arrival_ticks) else {
                continue;
            };
            match sender.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => diagnostics.record_drop(DropReason::QueueFull),
                Err(TrySendError::Disconnected(_)) => {
                    debug!(device = %descriptor.name, "session gone; reader exiting");
                    return;
                }
            }
        }
    }
    debug!(device = %descriptor.name, "reader stopped");
}
