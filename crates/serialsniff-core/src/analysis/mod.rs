//! Byte-stream object scanner.
//!
//! The scanner takes the innermost layer of a packet, searches it for one
//! embedded serialized object starting at every offset in turn, and reports
//! where the object sits, what precedes and follows it, and whether the bytes
//! right before it encode its length.
//!
//! Invariants:
//! - The first offset that decodes wins; later offsets are never tried.
//! - `prefix.len() + object_len + suffix.len()` equals the stream length.
//! - The same bytes always yield the same result.

mod decoder;
mod length_prefix;

use std::fmt;

use serde::{Serialize, Serializer};

use crate::packet::Packet;

pub use decoder::{DecodedObject, JavaSerialDecoder, ObjectDecoder};
pub use length_prefix::{length_pattern, prefix_encodes_length};

/// Outcome of scanning one packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    /// Type of the located object; `None` when nothing decoded or the object
    /// was a null.
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    /// Byte length of the decoded region.
    pub object_len: usize,
    /// Whether the prefix ends with the encoded `object_len`.
    pub length_in_prefix: bool,
    #[serde(serialize_with = "serialize_hex")]
    pub prefix: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub suffix: Vec<u8>,
    /// The whole stream decoded as UTF-8, invalid sequences replaced by U+FFFD.
    pub ascii: String,
}

impl AnalysisResult {
    fn empty() -> Self {
        Self {
            type_name: None,
            object_len: 0,
            length_in_prefix: false,
            prefix: Vec::new(),
            suffix: Vec::new(),
            ascii: String::new(),
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{type: {}, length found: {}, length: {}, prefix: {}, suffix: {}, bytestream translation: {}}}",
            self.type_name.as_deref().unwrap_or("null"),
            self.length_in_prefix,
            self.object_len,
            hex::encode(&self.prefix),
            hex::encode(&self.suffix),
            self.ascii
        )
    }
}

/// Scan a packet with the stock Java serialization decoder.
pub fn analyze(packet: &Packet) -> AnalysisResult {
    analyze_with(&JavaSerialDecoder, packet)
}

/// Scan the innermost layer of `packet` with `decoder`.
pub fn analyze_with(decoder: &dyn ObjectDecoder, packet: &Packet) -> AnalysisResult {
    analyze_bytes(decoder, packet.innermost_bytes())
}

/// Scan a raw byte stream with `decoder`.
pub fn analyze_bytes(decoder: &dyn ObjectDecoder, stream: &[u8]) -> AnalysisResult {
    if stream.is_empty() {
        return AnalysisResult::empty();
    }
    let ascii = render_text(stream);
    let found = (0..stream.len())
        .find_map(|offset| decoder.try_decode(stream, offset).map(|object| (offset, object)));

    let Some((offset, object)) = found else {
        log::trace!("no object in {} byte stream", stream.len());
        return AnalysisResult {
            prefix: stream.to_vec(),
            ascii,
            ..AnalysisResult::empty()
        };
    };

    let trailing = object.trailing.min(stream.len() - offset);
    let object_len = stream.len() - offset - trailing;
    let prefix = stream[..offset].to_vec();
    let suffix = stream[stream.len() - trailing..].to_vec();
    let length_in_prefix = prefix_encodes_length(&prefix, object_len);
    log::trace!(
        "object {:?} at offset {} ({} bytes, length in prefix: {})",
        object.type_name,
        offset,
        object_len,
        length_in_prefix
    );
    AnalysisResult {
        type_name: object.type_name,
        object_len,
        length_in_prefix,
        prefix,
        suffix,
        ascii,
    }
}

/// Text rendering of the stream: valid UTF-8 is kept, invalid sequences
/// become U+FFFD.
fn render_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}
