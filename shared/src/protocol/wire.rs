//! Incremental stream decoder and writer
//!
//! The decoder owns a byte buffer that callers append to whenever their
//! source has data. [`StreamDecoder::try_next`] only consumes bytes once a
//! whole header or payload is available, so a read that comes up short has
//! no side effects and decoding simply resumes on the next call.

use crate::protocol::error::{DecodeError, DefinitionKind};
use crate::protocol::records::StreamEvent;
use crate::types::symbols::INVALID_ID;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Stream magic, including the trailing NUL
pub const MAGIC: &[u8; 12] = b"QPERFSTREAM\0";

/// Data-stream version written by [`StreamWriter::new`]
pub const DEFAULT_STREAM_VERSION: i32 = 19;

/// Decoder position within the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Header,
    DataStreamVersion,
    EventHeader,
    Event { size: usize },
    ParseError,
}

/// Count of accepted definitions per category
#[derive(Debug, Clone, Copy, Default)]
struct DefinitionCounters {
    strings: usize,
    locations: usize,
    symbols: usize,
    attributes: usize,
}

impl DefinitionCounters {
    /// Ids of each category must equal the number of definitions accepted so far
    fn accept(&mut self, event: &StreamEvent) -> Result<(), DecodeError> {
        match event {
            StreamEvent::StringDefinition(string) => {
                Self::expect_next(&mut self.strings, DefinitionKind::String, string.id)
            }
            StreamEvent::LocationDefinition(location) => {
                // inline parents come first, which also rules out cycles
                let parent = location.parent_location_id;
                if parent != INVALID_ID && !(0..location.id).contains(&parent) {
                    return Err(DecodeError::InvalidParentLocation {
                        id: location.id,
                        parent,
                    });
                }
                Self::expect_next(&mut self.locations, DefinitionKind::Location, location.id)
            }
            StreamEvent::SymbolDefinition(symbol) => {
                if usize::try_from(symbol.id).map_or(true, |id| id >= self.locations) {
                    return Err(DecodeError::UndeclaredLocation(symbol.id));
                }
                Self::expect_next(&mut self.symbols, DefinitionKind::Symbol, symbol.id)
            }
            StreamEvent::AttributesDefinition(attribute) => Self::expect_next(
                &mut self.attributes,
                DefinitionKind::Attribute,
                attribute.id,
            ),
            _ => Ok(()),
        }
    }

    fn expect_next(
        counter: &mut usize,
        kind: DefinitionKind,
        actual: i32,
    ) -> Result<(), DecodeError> {
        if usize::try_from(actual).ok() != Some(*counter) {
            return Err(DecodeError::OutOfOrderDefinition {
                kind,
                expected: *counter,
                actual,
            });
        }
        *counter += 1;
        Ok(())
    }
}

/// Resumable decoder for a perfparser stream
#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
    buffer: BytesMut,
    version: Option<i32>,
    counters: DefinitionCounters,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Header,
            buffer: BytesMut::with_capacity(1024),
            version: None,
            counters: DefinitionCounters::default(),
        }
    }

    /// Append newly available bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Data-stream version, once the header has been read
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the stream ended cleanly between two events
    pub fn at_event_boundary(&self) -> bool {
        self.state == DecoderState::EventHeader && self.buffer.is_empty()
    }

    /// Decode the next complete event.
    ///
    /// Returns `Ok(None)` when more bytes are needed. After an error the
    /// decoder stays in [`DecoderState::ParseError`] and returns
    /// [`DecodeError::Halted`] from then on.
    pub fn try_next(&mut self) -> Result<Option<StreamEvent>, DecodeError> {
        loop {
            match self.state {
                DecoderState::Header => {
                    if self.buffer.len() < MAGIC.len() {
                        return Ok(None);
                    }
                    let magic = self.buffer.split_to(MAGIC.len());
                    if magic[..] != MAGIC[..] {
                        return Err(self.fail(DecodeError::BadMagic));
                    }
                    self.state = DecoderState::DataStreamVersion;
                }
                DecoderState::DataStreamVersion => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let version = self.buffer.get_i32_le();
                    debug!("perfparser data stream version {}", version);
                    self.version = Some(version);
                    self.state = DecoderState::EventHeader;
                }
                DecoderState::EventHeader => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let size = self.buffer.get_u32_le() as usize;
                    self.state = DecoderState::Event { size };
                }
                DecoderState::Event { size } => {
                    if self.buffer.len() < size {
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(size).freeze();
                    self.state = DecoderState::EventHeader;
                    return self.decode_payload(&payload).map(Some);
                }
                DecoderState::ParseError => return Err(DecodeError::Halted),
            }
        }
    }

    fn decode_payload(&mut self, payload: &Bytes) -> Result<StreamEvent, DecodeError> {
        let version = self.version.unwrap_or(DEFAULT_STREAM_VERSION);
        let event = match StreamEvent::decode(payload, version) {
            Ok(event) => event,
            Err(err) => return Err(self.fail(err)),
        };
        if let Err(err) = self.counters.accept(&event) {
            return Err(self.fail(err));
        }
        Ok(event)
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        warn!("perfparser stream error: {}", err);
        self.state = DecoderState::ParseError;
        err
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes events into the stream format
#[derive(Debug)]
pub struct StreamWriter {
    buffer: BytesMut,
    version: i32,
    scratch: BytesMut,
}

impl StreamWriter {
    /// Start a stream with the magic and `version` header
    pub fn new(version: i32) -> Self {
        let mut buffer = BytesMut::with_capacity(1024);
        buffer.put_slice(MAGIC);
        buffer.put_i32_le(version);
        Self {
            buffer,
            version,
            scratch: BytesMut::new(),
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Append one length-prefixed event
    pub fn write_event(&mut self, event: &StreamEvent) -> &mut Self {
        self.scratch.clear();
        event.encode(self.version, &mut self.scratch);
        self.buffer.put_u32_le(self.scratch.len() as u32);
        self.buffer.put_slice(&self.scratch);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_VERSION)
    }
}
