//! perfparser stream protocol
//!
//! A stream starts with the `QPERFSTREAM\0` magic and a little-endian `i32`
//! data-stream version, followed by length-prefixed, type-tagged events.
//! [`StreamDecoder`] consumes it incrementally; [`StreamWriter`] produces it.

mod codec;
pub mod error;
pub mod records;
pub mod wire;

pub use error::{DecodeError, DefinitionKind};
pub use records::*;
pub use wire::{DecoderState, StreamDecoder, StreamWriter, DEFAULT_STREAM_VERSION, MAGIC};
