use std::fs::File;
use std::path::Path;

use pcap_parser::{
    Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader,
    traits::PcapReaderIterator,
};

use super::error::ReplayError;
use super::layout;
use super::reader::{
    is_pcapng_magic, linktype_for_interface, pcapng_ts_to_seconds, read_magic_and_rewind,
};

/// One captured frame as stored in the file.
#[derive(Debug, Clone)]
pub struct Frame {
    pub ts: Option<f64>,
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

/// Sequential frame reader over a PCAP or PCAPNG file.
pub struct FrameReader {
    inner: Format,
}

enum Format {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: Option<Linktype>,
    },
    Ng {
        reader: PcapNGReader<File>,
        linktypes: Vec<Linktype>,
    },
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let mut file = File::open(path)?;
        let magic = read_magic_and_rewind(&mut file)?;
        let inner = if is_pcapng_magic(&magic) {
            let reader = PcapNGReader::new(layout::READER_BUFFER_SIZE, file).map_err(|e| {
                ReplayError::Parse {
                    context: "pcapng reader init",
                    message: e.to_string(),
                }
            })?;
            Format::Ng {
                reader,
                linktypes: Vec::new(),
            }
        } else {
            let reader = LegacyPcapReader::new(layout::READER_BUFFER_SIZE, file).map_err(|e| {
                ReplayError::Parse {
                    context: "pcap reader init",
                    message: e.to_string(),
                }
            })?;
            Format::Legacy {
                reader,
                linktype: None,
            }
        };
        Ok(Self { inner })
    }

    /// Next packet frame; `None` at end of file.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ReplayError> {
        loop {
            match &mut self.inner {
                Format::Legacy { reader, linktype } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::LegacyHeader(header) => {
                                *linktype = Some(header.network);
                                None
                            }
                            PcapBlockOwned::Legacy(packet) => Some(Frame {
                                ts: Some(packet.ts_sec as f64 + packet.ts_usec as f64 * 1e-6),
                                linktype: linktype.unwrap_or(Linktype::ETHERNET),
                                data: packet.data.to_vec(),
                            }),
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader.refill().map_err(|e| ReplayError::Parse {
                            context: "pcap reader refill",
                            message: e.to_string(),
                        })?;
                    }
                    Err(e) => {
                        return Err(ReplayError::Parse {
                            context: "pcap reader next",
                            message: e.to_string(),
                        });
                    }
                },
                Format::Ng { reader, linktypes } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                                linktypes.push(intf.linktype);
                                None
                            }
                            PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => Some(Frame {
                                ts: Some(pcapng_ts_to_seconds(packet.ts_high, packet.ts_low)),
                                linktype: linktype_for_interface(linktypes, packet.if_id),
                                data: packet.data.to_vec(),
                            }),
                            PcapBlockOwned::NG(Block::SimplePacket(packet)) => Some(Frame {
                                ts: None,
                                linktype: linktype_for_interface(linktypes, 0),
                                data: packet.data.to_vec(),
                            }),
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader.refill().map_err(|e| ReplayError::Parse {
                            context: "pcapng reader refill",
                            message: e.to_string(),
                        })?;
                    }
                    Err(e) => {
                        return Err(ReplayError::Parse {
                            context: "pcapng reader next",
                            message: e.to_string(),
                        });
                    }
                },
            }
        }
    }
}
