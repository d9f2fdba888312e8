//! Object-serialization wire formats.
//!
//! Each format follows a layered structure:
//! - `layout`: type codes, flags and fixed sizes (source of truth)
//! - `reader`: bounds-checked cursor over the byte stream
//! - `parser`: structural decoding (no direct byte indexing)
//! - `error`: explicit, actionable errors
//!
//! Parsers are pure and contain no I/O; the scanner in `analysis` decides
//! where in a packet payload decoding is attempted.

pub mod javaser;
