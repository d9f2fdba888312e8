use std::sync::Arc;

use parking_lot::Mutex;

use crate::packet::Packet;
use crate::sink::{PacketSink, SinkError};

struct Entry {
    sink: Arc<dyn PacketSink>,
    enabled: bool,
}

/// Registered sinks in registration order, each either enabled (receives
/// packets, holds one activation) or disabled.
#[derive(Default)]
pub(crate) struct SinkRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl SinkRegistry {
    pub(crate) fn add(&self, sink: Arc<dyn PacketSink>) {
        log::debug!("sink {} registered", sink.name());
        self.entries.lock().push(Entry {
            sink,
            enabled: false,
        });
    }

    /// Enable every disabled sink. On failure the sinks enabled by this call
    /// are disabled again, retired sinks are dropped from the registry, and
    /// the first error is returned.
    pub(crate) fn activate_all(&self) -> Result<(), SinkError> {
        let mut entries = self.entries.lock();
        let mut activated = Vec::new();
        let mut failure = None;
        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.enabled {
                continue;
            }
            match entry.sink.activate() {
                Ok(()) => {
                    entry.enabled = true;
                    activated.push(index);
                }
                Err(err) => {
                    log::error!("cannot activate sink {}: {}", entry.sink.name(), err);
                    failure = Some(err);
                    break;
                }
            }
        }
        let Some(err) = failure else {
            return Ok(());
        };

        for index in activated {
            let entry = &mut entries[index];
            entry.enabled = false;
            if let Err(rollback) = entry.sink.deactivate() {
                log::warn!("rollback of sink {}: {}", entry.sink.name(), rollback);
            }
        }
        entries.retain(|entry| {
            let keep = !entry.sink.is_retired();
            if !keep {
                log::info!("retired sink {} removed", entry.sink.name());
            }
            keep
        });
        Err(err)
    }

    pub(crate) fn deactivate_all(&self) {
        for entry in self.entries.lock().iter_mut().filter(|entry| entry.enabled) {
            entry.enabled = false;
            if let Err(err) = entry.sink.deactivate() {
                log::warn!("cannot deactivate sink {}: {}", entry.sink.name(), err);
            }
        }
    }

    /// Offer `packet` to every enabled sink, in registration order.
    pub(crate) fn dispatch(&self, packet: &Arc<Packet>) {
        for entry in self.entries.lock().iter().filter(|entry| entry.enabled) {
            entry.sink.accept(Arc::clone(packet));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn enabled(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.enabled)
            .count()
    }
}
