//! Primitive field encoding shared by all event payloads
//!
//! Integers are little-endian. Byte arrays and lists carry a `u32` length,
//! `0xFFFFFFFF` marks a null byte array, and streams from version
//! [`EXTENDED_LENGTH_SINCE`] on escape lengths that do not fit with
//! `0xFFFFFFFE` followed by a `u64`.

use crate::protocol::error::DecodeError;
use bytes::{Buf, BufMut, BytesMut};

const NULL_LENGTH: u32 = 0xFFFF_FFFF;
const EXTENDED_LENGTH: u32 = 0xFFFF_FFFE;

/// First stream version with 64-bit length escapes
pub(crate) const EXTENDED_LENGTH_SINCE: i32 = 20;

/// First stream version that writes floats with double precision
pub(crate) const DOUBLE_PRECISION_SINCE: i32 = 12;

pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    version: i32,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8], version: i32) -> Self {
        Self { buf, version }
    }

    pub(crate) fn version(&self) -> i32 {
        self.version
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, field: &'static str) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn read_i8(&mut self, field: &'static str) -> Result<i8, DecodeError> {
        self.ensure(1, field)?;
        Ok(self.buf.get_i8())
    }

    pub(crate) fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.ensure(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn read_bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        Ok(self.read_u8(field)? != 0)
    }

    pub(crate) fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.ensure(4, field)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn read_u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        self.ensure(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    pub(crate) fn read_i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        self.ensure(8, field)?;
        Ok(self.buf.get_i64_le())
    }

    /// Floats follow the stream's precision setting
    pub(crate) fn read_float(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        if self.version >= DOUBLE_PRECISION_SINCE {
            self.ensure(8, field)?;
            Ok(self.buf.get_f64_le() as f32)
        } else {
            self.ensure(4, field)?;
            Ok(self.buf.get_f32_le())
        }
    }

    /// `None` for the null marker
    fn read_length(&mut self, field: &'static str) -> Result<Option<usize>, DecodeError> {
        let length = self.read_u32(field)?;
        match length {
            NULL_LENGTH => Ok(None),
            EXTENDED_LENGTH if self.version >= EXTENDED_LENGTH_SINCE => {
                let extended = self.read_u64(field)?;
                usize::try_from(extended)
                    .map(Some)
                    .map_err(|_| DecodeError::InvalidLength(length))
            }
            _ => Ok(Some(length as usize)),
        }
    }

    pub(crate) fn read_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, DecodeError> {
        let Some(length) = self.read_length(field)? else {
            return Ok(Vec::new());
        };
        self.ensure(length, field)?;
        let bytes = self.buf[..length].to_vec();
        self.buf.advance(length);
        Ok(bytes)
    }

    pub(crate) fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(field)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub(crate) fn read_list<T>(
        &mut self,
        field: &'static str,
        mut read_item: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let count = self
            .read_length(field)?
            .ok_or(DecodeError::InvalidLength(NULL_LENGTH))?;
        // every element takes at least one byte, so never trust the count for allocation
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }

    /// Consume whatever is left, returning it
    pub(crate) fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.buf.to_vec();
        self.buf.advance(rest.len());
        rest
    }
}

pub(crate) struct PayloadWriter<'a> {
    out: &'a mut BytesMut,
    version: i32,
}

impl<'a> PayloadWriter<'a> {
    pub(crate) fn new(out: &'a mut BytesMut, version: i32) -> Self {
        Self { out, version }
    }

    pub(crate) fn put_i8(&mut self, value: i8) {
        self.out.put_i8(value);
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.out.put_u8(value);
    }

    pub(crate) fn put_bool(&mut self, value: bool) {
        self.out.put_u8(u8::from(value));
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.out.put_u32_le(value);
    }

    pub(crate) fn put_i32(&mut self, value: i32) {
        self.out.put_i32_le(value);
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        self.out.put_u64_le(value);
    }

    pub(crate) fn put_i64(&mut self, value: i64) {
        self.out.put_i64_le(value);
    }

    pub(crate) fn put_float(&mut self, value: f32) {
        if self.version >= DOUBLE_PRECISION_SINCE {
            self.out.put_f64_le(f64::from(value));
        } else {
            self.out.put_f32_le(value);
        }
    }

    fn put_length(&mut self, length: usize) {
        match u32::try_from(length) {
            Ok(short) if short < EXTENDED_LENGTH => self.out.put_u32_le(short),
            _ => {
                self.out.put_u32_le(EXTENDED_LENGTH);
                self.out.put_u64_le(length as u64);
            }
        }
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_length(bytes.len());
        self.out.put_slice(bytes);
    }

    pub(crate) fn put_list<T>(&mut self, items: &[T], mut put_item: impl FnMut(&mut Self, &T)) {
        self.put_length(items.len());
        for item in items {
            put_item(self, item);
        }
    }

    pub(crate) fn put_raw(&mut self, bytes: &[u8]) {
        self.out.put_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_integers() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = PayloadReader::new(&data, 19);
        assert_eq!(reader.read_u32("a").unwrap(), 1);
        assert_eq!(reader.read_i32("b").unwrap(), -1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_field() {
        let data = [0x01, 0x02];
        let mut reader = PayloadReader::new(&data, 19);
        let err = reader.read_u32("pid").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                field: "pid",
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_null_byte_array_is_empty() {
        let data = NULL_LENGTH.to_le_bytes();
        let mut reader = PayloadReader::new(&data, 19);
        assert!(reader.read_bytes("name").unwrap().is_empty());
    }

    #[test]
    fn test_extended_length_only_for_new_versions() {
        let mut data = EXTENDED_LENGTH.to_le_bytes().to_vec();
        data.extend_from_slice(&3u64.to_le_bytes());
        data.extend_from_slice(b"abc");

        let mut reader = PayloadReader::new(&data, EXTENDED_LENGTH_SINCE);
        assert_eq!(reader.read_bytes("s").unwrap(), b"abc");

        // older streams take the marker as a literal, oversized length
        let mut reader = PayloadReader::new(&data, EXTENDED_LENGTH_SINCE - 1);
        assert!(matches!(
            reader.read_bytes("s"),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_float_precision_follows_version() {
        let mut out = BytesMut::new();
        PayloadWriter::new(&mut out, DOUBLE_PRECISION_SINCE).put_float(0.5);
        assert_eq!(out.len(), 8);
        let mut reader = PayloadReader::new(&out, DOUBLE_PRECISION_SINCE);
        assert_eq!(reader.read_float("progress").unwrap(), 0.5);

        let mut out = BytesMut::new();
        PayloadWriter::new(&mut out, DOUBLE_PRECISION_SINCE - 1).put_float(0.25);
        assert_eq!(out.len(), 4);
        let mut reader = PayloadReader::new(&out, DOUBLE_PRECISION_SINCE - 1);
        assert_eq!(reader.read_float("progress").unwrap(), 0.25);
    }

    #[test]
    fn test_list_with_huge_count_fails_without_allocating() {
        let data = 1_000_000u32.to_le_bytes();
        let mut reader = PayloadReader::new(&data, 19);
        let result = reader.read_list("frames", |r| r.read_i32("frame"));
        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }
}
