//! Capture sources.
//!
//! A [`CaptureBackend`] opens a [`CaptureHandle`] for a device name. The
//! handle owns the feed: it applies an optional BPF filter and runs a
//! blocking loop that pushes every packet into a callback until the
//! [`StopSignal`] is raised, the feed ends, or the feed fails.
//!
//! Backends:
//! - `PcapBackend` (feature `live`): libpcap live capture.
//! - [`ReplayBackend`]: replays a `.pcap`/`.pcapng` file; the device name is
//!   the file path.

#[cfg(feature = "live")]
mod live;
mod replay;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::config::CaptureConfig;
use crate::packet::Packet;

#[cfg(feature = "live")]
pub use live::{PcapBackend, list_devices};
pub use replay::ReplayBackend;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open capture on {device}: {message}")]
    Open { device: String, message: String },
    #[error("invalid filter {expression:?}: {message}")]
    Filter { expression: String, message: String },
    #[error("capture loop failed: {0}")]
    Loop(String),
    #[error("cannot list capture devices: {0}")]
    Devices(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Unsupported(&'static str),
}

/// BPF filter expression plus the netmask it should be compiled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub expression: String,
    pub netmask: Option<Ipv4Addr>,
}

impl FilterSpec {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            netmask: None,
        }
    }

    pub fn with_netmask(mut self, netmask: Ipv4Addr) -> Self {
        self.netmask = Some(netmask);
        self
    }
}

/// Shared flag that tells a capture loop to return.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        device: &str,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

pub trait CaptureHandle: Send {
    fn apply_filter(&mut self, filter: &FilterSpec) -> Result<(), CaptureError>;

    /// Deliver packets until `stop` is raised (`Ok`), the feed ends (`Ok`),
    /// or the feed fails (`Err`).
    ///
    /// Implementations must observe `stop` at least once per read timeout.
    fn run_loop(
        &mut self,
        stop: &StopSignal,
        deliver: &mut dyn FnMut(Packet),
    ) -> Result<(), CaptureError>;
}

/// Capture device as reported by libpcap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub loopback: bool,
}
