use std::io::{Read, Seek, SeekFrom};

use pcap_parser::Linktype;

use super::error::ReplayError;
use super::layout;

/// Read the four magic bytes and rewind to the start of the file.
///
/// # Errors
/// Returns `ReplayError::Io` when the file is shorter than four bytes or
/// cannot be rewound.
pub fn read_magic_and_rewind<R: Read + Seek>(reader: &mut R) -> Result<[u8; 4], ReplayError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

pub fn is_pcapng_magic(magic: &[u8; 4]) -> bool {
    magic == &layout::PCAPNG_MAGIC
}

/// Link type of interface `if_id`; Ethernet when the interface was never
/// described.
pub fn linktype_for_interface(linktypes: &[Linktype], if_id: u32) -> Linktype {
    linktypes
        .get(if_id as usize)
        .copied()
        .unwrap_or(Linktype::ETHERNET)
}

/// Enhanced Packet Block timestamp (default microsecond resolution) to
/// seconds.
pub fn pcapng_ts_to_seconds(ts_high: u32, ts_low: u32) -> f64 {
    let ts = ((ts_high as u64) << 32) | (ts_low as u64);
    ts as f64 * 1e-6
}
