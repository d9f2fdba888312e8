//! serialsniff core library: live capture, fan-out to sinks, and forensic
//! scanning of packet payloads for embedded serialized objects.
//!
//! Data flows from a capture handle (`capture`) through the sniffer's
//! dispatch queue (`sniffer`) into every enabled sink (`sink`). Each sink
//! owns a bounded queue and a processing loop; the analysis sink runs the
//! byte-stream scanner (`analysis`) over the innermost layer of each packet
//! and the scanner drives the object decoders in `protocols`
//! (layout/reader/parser). Worker threads come from a bounded pool (`pool`).
//!
//! Invariants:
//! - No producer ever blocks on a full queue; overflowing packets are
//!   dropped and counted.
//! - Packets reach each sink in capture order.
//! - A sink flushes its aggregate state exactly once, when its last
//!   producer detaches after shutdown was requested.
//! - The scanner is deterministic: identical bytes give identical results.
//!
//! Version française (résumé):
//! Capture en direct, distribution vers des puits indépendants à files
//! bornées (perte plutôt que blocage), et recherche d'un objet sérialisé
//! dans la charge utile de chaque paquet avec détection d'un préfixe de
//! longueur.
//!
//! # Examples
//! ```no_run
//! use std::fs::File;
//! use std::sync::Arc;
//!
//! use serialsniff_core::capture::ReplayBackend;
//! use serialsniff_core::config::SnifferConfig;
//! use serialsniff_core::pool::WorkerPool;
//! use serialsniff_core::sink::{AnalysisFormat, AnalysisWriter, Sink};
//! use serialsniff_core::sniffer::Sniffer;
//!
//! let config = SnifferConfig::default();
//! let pool = WorkerPool::new(config.pool.clone());
//! let out = File::create("analysis.txt")?;
//! let sink = Sink::new(
//!     "analysis",
//!     config.sink_queue_capacity,
//!     AnalysisWriter::new(out, AnalysisFormat::Text),
//! );
//! sink.spawn(&pool)?;
//!
//! let sniffer = Sniffer::new("capture.pcap", Arc::new(ReplayBackend), config, pool)?;
//! sniffer.add_sink(sink.clone());
//! sniffer.start()?;
//! while sniffer.is_running() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! sniffer.stop()?;
//! sink.cancel();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analysis;
pub mod capture;
pub mod config;
pub mod packet;
pub mod pool;
pub mod protocols;
pub mod sink;
pub mod sniffer;

pub use analysis::{AnalysisResult, analyze};
pub use packet::{LinkKind, Packet};
pub use sniffer::{Sniffer, SnifferError};
