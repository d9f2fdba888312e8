//! Capture-and-dispatch pipeline.
//!
//! A [`Sniffer`] is bound to one device. Each session runs two pool jobs:
//!
//! - the capture job runs the handle's blocking loop and pushes packets into
//!   the bounded dispatch queue, dropping them when the queue is full;
//! - the dispatch job drains the queue and offers every packet to the
//!   enabled sinks in registration order.
//!
//! Stopping interrupts the dispatch job through its cancel channel. The
//! dispatch job then raises the capture stop signal, waits for the capture
//! loop to return, delivers what is left in the queue and deactivates the
//! sinks. A capture failure or the end of the feed interrupts the dispatch
//! job the same way.
//!
//! States: Idle -> Running -> Idle. A session that ended on its own stays
//! pending until [`Sniffer::stop`] collects its outcome or the next
//! [`Sniffer::start`] discards it.

mod registry;
mod stats;

use std::net::Ipv4Addr;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, select};
use parking_lot::Mutex;
use thiserror::Error;

use crate::capture::{CaptureBackend, CaptureError, CaptureHandle, FilterSpec, StopSignal};
use crate::config::{ConfigError, SnifferConfig};
use crate::packet::Packet;
use crate::pool::{PoolError, WorkerPool};
use crate::sink::{PacketSink, SinkError};

use registry::SinkRegistry;
pub use stats::{SnifferStats, StatsSnapshot};

#[derive(Debug, Error)]
pub enum SnifferError {
    #[error("sniffer is already running")]
    AlreadyRunning,
    #[error("sniffer is already stopped")]
    AlreadyStopped,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("capture session failed: {0}")]
    CaptureFailed(String),
}

type Outcome = Result<(), String>;

struct Session {
    cancel: Sender<()>,
    done: Receiver<Outcome>,
    outcome: Option<Outcome>,
}

impl Session {
    fn poll(&mut self) -> bool {
        if self.outcome.is_none() {
            match self.done.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.outcome = Some(Err("dispatcher exited unexpectedly".to_string()))
                }
            }
        }
        self.outcome.is_some()
    }

    fn finish(mut self) -> Outcome {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let _ = self.cancel.try_send(());
        self.done
            .recv()
            .unwrap_or_else(|_| Err("dispatcher exited unexpectedly".to_string()))
    }
}

pub struct Sniffer {
    device: String,
    backend: Arc<dyn CaptureBackend>,
    config: SnifferConfig,
    pool: WorkerPool,
    registry: Arc<SinkRegistry>,
    filter: Mutex<Option<FilterSpec>>,
    stats: Arc<SnifferStats>,
    session: Mutex<Option<Session>>,
}

impl Sniffer {
    pub fn new(
        device: impl Into<String>,
        backend: Arc<dyn CaptureBackend>,
        config: SnifferConfig,
        pool: WorkerPool,
    ) -> Result<Self, SnifferError> {
        config.validate()?;
        Ok(Self {
            device: device.into(),
            backend,
            config,
            pool,
            registry: Arc::new(SinkRegistry::default()),
            filter: Mutex::new(None),
            stats: Arc::new(SnifferStats::default()),
            session: Mutex::new(None),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Register a sink. It receives packets from the next start on.
    pub fn add_sink(&self, sink: Arc<dyn PacketSink>) {
        self.registry.add(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.registry.len()
    }

    /// Set the BPF filter applied on every subsequent start.
    pub fn set_filter(&self, expression: impl Into<String>, netmask: Option<Ipv4Addr>) {
        let filter = FilterSpec::new(expression);
        let filter = match netmask {
            Some(mask) => filter.with_netmask(mask),
            None => filter,
        };
        *self.filter.lock() = Some(filter);
    }

    pub fn clear_filter(&self) {
        *self.filter.lock() = None;
    }

    pub fn start(&self) -> Result<(), SnifferError> {
        let mut session = self.session.lock();
        if let Some(current) = session.as_mut() {
            if !current.poll() {
                return Err(SnifferError::AlreadyRunning);
            }
            log::debug!("discarding finished session on {}", self.device);
            *session = None;
        }

        let mut handle = self.backend.open(&self.device, &self.config.capture)?;
        if let Some(filter) = self.filter.lock().as_ref() {
            if let Err(err) = handle.apply_filter(filter) {
                log::error!("cannot apply filter on {}: {}", self.device, err);
                return Err(err.into());
            }
        }
        self.registry.activate_all()?;

        match self.spawn_session(handle) {
            Ok(started) => {
                *session = Some(started);
                log::info!("sniffer started on {}", self.device);
                Ok(())
            }
            Err(err) => {
                log::error!("cannot start sniffer on {}: {}", self.device, err);
                self.registry.deactivate_all();
                Err(err.into())
            }
        }
    }

    fn spawn_session(&self, mut handle: Box<dyn CaptureHandle>) -> Result<Session, PoolError> {
        let (packet_tx, packet_rx) =
            crossbeam_channel::bounded::<Arc<Packet>>(self.config.dispatch_queue_capacity);
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let (capture_done_tx, capture_done_rx) = crossbeam_channel::bounded::<Outcome>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<Outcome>(1);
        let stop = StopSignal::new();

        let dispatcher = Dispatcher {
            device: self.device.clone(),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            packets: packet_rx,
            cancel: cancel_rx,
            capture_done: capture_done_rx,
            stop: stop.clone(),
        };
        self.pool
            .execute(&format!("dispatch {}", self.device), move || {
                let outcome = dispatcher.run();
                let _ = done_tx.send(outcome);
            })?;

        let stats = Arc::clone(&self.stats);
        let interrupt = cancel_tx.clone();
        let capture_stop = stop.clone();
        let spawned = self
            .pool
            .execute(&format!("capture {}", self.device), move || {
                let mut deliver = |packet: Packet| {
                    stats.record_captured();
                    match packet_tx.try_send(Arc::new(packet)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            stats.record_dropped();
                            log::info!("dispatch queue full, packet dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => {}
                    }
                };
                let outcome = handle
                    .run_loop(&capture_stop, &mut deliver)
                    .map_err(|err| err.to_string());
                if let Err(err) = &outcome {
                    log::error!("capture loop failed: {err}");
                }
                let _ = capture_done_tx.send(outcome);
                let _ = interrupt.try_send(());
            });
        if let Err(err) = spawned {
            // The dispatcher is already waiting; let it unwind the session.
            stop.stop();
            let _ = cancel_tx.try_send(());
            let _ = done_rx.recv();
            return Err(err);
        }

        Ok(Session {
            cancel: cancel_tx,
            done: done_rx,
            outcome: None,
        })
    }

    /// Stop the running session and report how it ended.
    pub fn stop(&self) -> Result<(), SnifferError> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(SnifferError::AlreadyStopped)?;
        let outcome = session.finish();
        log::info!("sniffer stopped on {}", self.device);
        outcome.map_err(SnifferError::CaptureFailed)
    }

    /// Whether a session is live. A session whose feed ended on its own is
    /// not running.
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_mut()
            .is_some_and(|session| !session.poll())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Sniffer {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            if let Err(err) = self.stop() {
                log::warn!("sniffer on {} dropped: {}", self.device, err);
            }
        }
    }
}

struct Dispatcher {
    device: String,
    registry: Arc<SinkRegistry>,
    stats: Arc<SnifferStats>,
    packets: Receiver<Arc<Packet>>,
    cancel: Receiver<()>,
    capture_done: Receiver<Outcome>,
    stop: StopSignal,
}

impl Dispatcher {
    fn run(self) -> Outcome {
        loop {
            select! {
                recv(self.packets) -> packet => match packet {
                    Ok(packet) => self.dispatch(&packet),
                    Err(_) => break,
                },
                recv(self.cancel) -> _ => break,
            }
        }

        self.stop.stop();
        let outcome = self
            .capture_done
            .recv()
            .unwrap_or_else(|_| Err("capture loop exited unexpectedly".to_string()));
        let mut drained = 0usize;
        while let Ok(packet) = self.packets.try_recv() {
            self.dispatch(&packet);
            drained += 1;
        }
        if drained > 0 {
            log::debug!("delivered {drained} queued packets after stop");
        }
        self.registry.deactivate_all();

        match &outcome {
            Ok(()) => log::info!("capture on {} ended", self.device),
            Err(err) => log::error!("capture on {} failed: {}", self.device, err),
        }
        outcome
    }

    fn dispatch(&self, packet: &Arc<Packet>) {
        self.registry.dispatch(packet);
        self.stats.record_dispatched();
    }
}
