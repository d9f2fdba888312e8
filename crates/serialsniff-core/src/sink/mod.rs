//! Packet sinks.
//!
//! A sink is an independent consumer of captured packets. The dispatcher
//! only sees the [`PacketSink`] trait: a non-blocking `accept` plus the
//! reference-counted `activate`/`deactivate` pair, one activation per
//! producer. [`Sink`] implements the contract once, on top of a bounded
//! queue and a processing loop that hands packets to a [`PacketProcessor`].
//!
//! Lifecycle:
//! - `activate` fails once shutdown was requested.
//! - Shutdown is requested with [`Sink::cancel`]; the sink retires as soon
//!   as no producer holds it active.
//! - Retirement drains the queue through the processor, runs
//!   [`PacketProcessor::finish`] once and drops the processor, releasing its
//!   output.

mod analysis;
mod base;
mod raw;

use std::sync::Arc;

use thiserror::Error;

use crate::packet::Packet;

pub use analysis::{AggregateKey, AnalysisFormat, AnalysisWriter, RESULT_SEPARATOR};
pub use base::Sink;
pub use raw::{PACKET_SEPARATOR, RawPacketWriter};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink {sink} is shutting down")]
    ShuttingDown { sink: String },
    #[error("sink {sink} is not active")]
    NotActive { sink: String },
    #[error("sink output error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the dispatcher needs from a sink.
pub trait PacketSink: Send + Sync {
    fn name(&self) -> &str;

    /// Offer a packet without blocking; drops it when the sink is full.
    fn accept(&self, packet: Arc<Packet>);

    /// Register one producer.
    fn activate(&self) -> Result<(), SinkError>;

    /// Release one producer.
    fn deactivate(&self) -> Result<(), SinkError>;

    fn is_retired(&self) -> bool;
}

/// Sink-specific packet handling, run on the sink's own thread.
pub trait PacketProcessor: Send + 'static {
    fn process(&mut self, packet: &Packet) -> Result<(), SinkError>;

    /// Flush aggregate state. Runs exactly once, after the last packet.
    fn finish(&mut self) -> Result<(), SinkError>;
}
