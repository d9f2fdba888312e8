use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Select, Sender, TrySendError};
use parking_lot::Mutex;

use super::{PacketProcessor, PacketSink, SinkError};
use crate::packet::Packet;
use crate::pool::{PoolError, WorkerPool};

#[derive(Debug, Default)]
struct Lifecycle {
    active_sources: usize,
    shutting_down: bool,
}

/// Queue, processing loop and reference-counted lifecycle around a
/// [`PacketProcessor`].
pub struct Sink<P: PacketProcessor> {
    name: String,
    queue_tx: Sender<Arc<Packet>>,
    queue_rx: Receiver<Arc<Packet>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    lifecycle: Mutex<Lifecycle>,
    retired: AtomicBool,
    processor: Mutex<Option<P>>,
    dropped: AtomicU64,
}

impl<P: PacketProcessor> Sink<P> {
    pub fn new(name: impl Into<String>, capacity: usize, processor: P) -> Arc<Self> {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(capacity);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Arc::new(Self {
            name: name.into(),
            queue_tx,
            queue_rx,
            wake_tx,
            wake_rx,
            lifecycle: Mutex::new(Lifecycle::default()),
            retired: AtomicBool::new(false),
            processor: Mutex::new(Some(processor)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Start the processing loop on a pool thread.
    pub fn spawn(self: &Arc<Self>, pool: &WorkerPool) -> Result<(), PoolError> {
        let sink = Arc::clone(self);
        pool.execute(&format!("sink {}", self.name), move || sink.run())
    }

    /// Processing loop: one packet per wake-up until the sink retires.
    pub fn run(&self) {
        log::debug!("sink {} processing loop started", self.name);
        while !self.is_retired() {
            let mut select = Select::new();
            select.recv(&self.queue_rx);
            select.recv(&self.wake_rx);
            select.ready();

            while self.wake_rx.try_recv().is_ok() {}

            let mut guard = self.processor.lock();
            let Some(processor) = guard.as_mut() else {
                break;
            };
            if let Ok(packet) = self.queue_rx.try_recv() {
                if let Err(err) = processor.process(&packet) {
                    log::warn!("sink {}: {}", self.name, err);
                }
            }
        }
        log::debug!("sink {} processing loop exited", self.name);
    }

    /// Request shutdown. Retires immediately when no producer is attached.
    pub fn cancel(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.shutting_down {
            log::debug!("sink {} shutdown requested", self.name);
            lifecycle.shutting_down = true;
            if lifecycle.active_sources == 0 {
                self.retire();
            }
        }
        drop(lifecycle);
        self.wake();
    }

    pub fn active_sources(&self) -> usize {
        self.lifecycle.lock().active_sources
    }

    /// Packets waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    /// Packets refused because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs with the lifecycle lock held.
    fn retire(&self) {
        if self.retired.load(Ordering::Acquire) {
            return;
        }
        if let Some(mut processor) = self.processor.lock().take() {
            while let Ok(packet) = self.queue_rx.try_recv() {
                if let Err(err) = processor.process(&packet) {
                    log::warn!("sink {}: {}", self.name, err);
                }
            }
            if let Err(err) = processor.finish() {
                log::error!("sink {} failed to finish: {}", self.name, err);
            }
        }
        self.retired.store(true, Ordering::Release);
        self.wake();
        log::info!("sink {} has shut down", self.name);
    }

    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }
}

impl<P: PacketProcessor> PacketSink for Sink<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&self, packet: Arc<Packet>) {
        if self.is_retired() {
            log::trace!("sink {} retired, packet discarded", self.name);
            return;
        }
        match self.queue_tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::info!("sink {} queue full, packet dropped", self.name);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn activate(&self) -> Result<(), SinkError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shutting_down {
            return Err(SinkError::ShuttingDown {
                sink: self.name.clone(),
            });
        }
        lifecycle.active_sources += 1;
        log::debug!(
            "sink {} activated ({} sources)",
            self.name,
            lifecycle.active_sources
        );
        Ok(())
    }

    fn deactivate(&self) -> Result<(), SinkError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.active_sources == 0 {
            return Err(SinkError::NotActive {
                sink: self.name.clone(),
            });
        }
        lifecycle.active_sources -= 1;
        log::debug!(
            "sink {} deactivated ({} sources)",
            self.name,
            lifecycle.active_sources
        );
        if lifecycle.active_sources == 0 && lifecycle.shutting_down {
            self.retire();
        }
        drop(lifecycle);
        self.wake();
        Ok(())
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}
