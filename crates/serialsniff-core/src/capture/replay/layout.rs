/// Read buffer handed to the pcap-parser readers.
pub const READER_BUFFER_SIZE: usize = 64 * 1024;
/// Section Header Block type, first four bytes of every PCAPNG file.
pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
