//! Java Object Serialization Stream decoding.
//!
//! The parser validates the stream header (`0xACED`, version 5) and then
//! walks exactly one content element: strings, objects with their class
//! descriptor chains, arrays, enums, class objects and back references.
//! Field values are skipped by type code, so objects of classes nobody has
//! seen before still decode; the reported type is the class name carried in
//! the stream.
//!
//! Anything the structural walk cannot account for (unknown type codes,
//! dangling handles, top-level block data, serialized exceptions,
//! truncation) is an error, which the scanner treats as "no object here".

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use error::JavaSerError;
pub use parser::{StreamObject, decode_stream_object};
