//! Captured packets and their protocol-layer chain.
//!
//! A [`Packet`] owns the raw frame and a forward-linked chain of [`Layer`]
//! records, outermost first. Each layer covers a byte span of the frame: its
//! own header plus everything nested inside it, like the frame view of a
//! protocol analyzer. The innermost layer is what the scanner inspects.

mod parser;

use std::fmt;
use std::ops::Range;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Link-layer framing of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    RawIp,
    /// Any other DLT/LINKTYPE value; frames are kept opaque.
    Other(i32),
}

impl LinkKind {
    /// Map a LINKTYPE/DLT code as reported by libpcap or a capture file.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => LinkKind::Ethernet,
            12 | 14 | 101 => LinkKind::RawIp,
            other => LinkKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ethernet,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Transport,
    Payload,
    Opaque,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Ethernet => "Ethernet",
            Protocol::Ipv4 => "IPv4",
            Protocol::Ipv6 => "IPv6",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Transport => "Transport",
            Protocol::Payload => "Payload",
            Protocol::Opaque => "Data",
        };
        f.write_str(name)
    }
}

/// One protocol layer: parsed header summary, byte span, inner layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    protocol: Protocol,
    header: String,
    span: Range<usize>,
    inner: Option<Box<Layer>>,
}

impl Layer {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Human-readable summary of this layer's header fields.
    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn inner(&self) -> Option<&Layer> {
        self.inner.as_deref()
    }

    /// Raw bytes of this layer (header and nested content) within `frame`.
    pub fn raw<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame.get(self.span.clone()).unwrap_or(&[])
    }
}

/// Immutable capture record.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    timestamp: Option<f64>,
    link: LinkKind,
    data: Vec<u8>,
    root: Option<Layer>,
}

impl Packet {
    /// Decode the layer chain of a captured frame.
    ///
    /// Frames that fail to decode keep a single opaque layer spanning the
    /// whole frame; an empty frame has no layers at all.
    pub fn from_frame(link: LinkKind, timestamp: Option<f64>, data: Vec<u8>) -> Self {
        let root = parser::decode_layers(link, &data);
        Self {
            timestamp,
            link,
            data,
            root,
        }
    }

    /// Capture time in seconds since the Unix epoch, when known.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn link(&self) -> LinkKind {
        self.link
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn layers(&self) -> Layers<'_> {
        Layers {
            next: self.root.as_ref(),
        }
    }

    pub fn innermost_layer(&self) -> Option<&Layer> {
        self.layers().last()
    }

    /// Raw bytes of the innermost layer; empty when there is no layer.
    pub fn innermost_bytes(&self) -> &[u8] {
        self.innermost_layer()
            .map(|layer| layer.raw(&self.data))
            .unwrap_or(&[])
    }
}

/// Iterator over a packet's layers, outermost first.
pub struct Layers<'a> {
    next: Option<&'a Layer>,
}

impl<'a> Iterator for Layers<'a> {
    type Item = &'a Layer;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.inner();
        Some(current)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self
            .timestamp
            .and_then(ts_to_rfc3339)
            .unwrap_or_else(|| "unknown".to_string());
        writeln!(f, "packet at {} ({} bytes)", ts, self.data.len())?;
        for (depth, layer) in self.layers().enumerate() {
            writeln!(
                f,
                "{:indent$}[{}] {} ({} bytes)",
                "",
                layer.protocol,
                layer.header,
                layer.span.len(),
                indent = 2 * (depth + 1)
            )?;
        }
        write!(f, "  hex: {}", hex::encode(&self.data))
    }
}

fn ts_to_rfc3339(ts: f64) -> Option<String> {
    let nanos = (ts * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
