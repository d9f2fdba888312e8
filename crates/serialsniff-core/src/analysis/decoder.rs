use crate::protocols::javaser::decode_stream_object;

/// One object decoded out of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedObject {
    /// Runtime type carried by the stream; `None` for a null object.
    pub type_name: Option<String>,
    /// Bytes consumed from the decode offset.
    pub consumed: usize,
    /// Bytes left in the buffer after the object.
    pub trailing: usize,
}

/// Decoder for exactly one serialized object at a given offset.
///
/// Implementations must not panic on arbitrary input; a failed decode is
/// reported as `None` and simply moves the scan to the next offset.
pub trait ObjectDecoder: Send + Sync {
    fn try_decode(&self, buffer: &[u8], offset: usize) -> Option<DecodedObject>;
}

/// Java Object Serialization Stream decoder (`0xACED`, version 5).
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaSerialDecoder;

impl ObjectDecoder for JavaSerialDecoder {
    fn try_decode(&self, buffer: &[u8], offset: usize) -> Option<DecodedObject> {
        let window = buffer.get(offset..)?;
        let object = decode_stream_object(window).ok()?;
        Some(DecodedObject {
            type_name: object.type_name,
            consumed: object.consumed,
            trailing: window.len() - object.consumed,
        })
    }
}
