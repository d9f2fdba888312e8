use std::io::Write;

use super::{PacketProcessor, SinkError};
use crate::packet::Packet;

pub const PACKET_SEPARATOR: &str = "--- END OF PACKET ---";

/// Appends one formatted record per packet.
pub struct RawPacketWriter<W: Write + Send + 'static> {
    out: W,
    written: u64,
}

impl<W: Write + Send + 'static> RawPacketWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }
}

impl<W: Write + Send + 'static> PacketProcessor for RawPacketWriter<W> {
    fn process(&mut self, packet: &Packet) -> Result<(), SinkError> {
        writeln!(self.out, "{packet}")?;
        writeln!(self.out, "{PACKET_SEPARATOR}")?;
        writeln!(self.out)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        log::debug!("raw writer wrote {} packets", self.written);
        self.out.flush()?;
        Ok(())
    }
}
