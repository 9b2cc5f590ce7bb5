//! Big-endian binary archive used by every record.
//!
//! Primitive layout:
//! - `int`: i32 BE, `long`: i64 BE, `bool`: one byte (0 or 1)
//! - `buffer` / `ustring`: i32 length then bytes, `-1` for null
//! - `vector`: i32 count then elements, `-1` for null

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Record;
use crate::error::{Result, ZkError};

/// Growable output archive.
#[derive(Debug, Default)]
pub struct OutputArchive {
    buf: BytesMut,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_buffer(&mut self, v: &[u8]) {
        self.buf.put_i32(v.len() as i32);
        self.buf.put_slice(v);
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_buffer(v.as_bytes());
    }

    pub fn write_vec<T: Record>(&mut self, items: &[T]) {
        self.buf.put_i32(items.len() as i32);
        for item in items {
            item.serialize(self);
        }
    }

    pub fn write_record<T: Record>(&mut self, record: &T) {
        record.serialize(self);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return the frozen bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct InputArchive {
    buf: Bytes,
}

impl InputArchive {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ZkError::Protocol(format!(
                "Truncated record: need {} bytes for {}, have {}",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "int")?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.need(8, "long")?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.need(1, "bool")?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_buffer(&mut self) -> Result<Vec<u8>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(Vec::new());
        }
        let len = len as usize;
        self.need(len, "buffer")?;
        Ok(self.buf.copy_to_bytes(len).to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let raw = self.read_buffer()?;
        String::from_utf8(raw).map_err(|e| ZkError::Protocol(format!("Invalid UTF-8: {}", e)))
    }

    pub fn read_vec<T: Record>(&mut self) -> Result<Vec<T>> {
        let count = self.read_i32()?;
        if count < 0 {
            return Ok(Vec::new());
        }
        // Every element is at least one byte, so a count larger than the
        // remaining input is malformed.
        let count = count as usize;
        self.need(count, "vector")?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::deserialize(self)?);
        }
        Ok(items)
    }

    pub fn read_record<T: Record>(&mut self) -> Result<T> {
        T::deserialize(self)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

impl Record for String {
    fn serialize(&self, out: &mut OutputArchive) {
        out.write_string(self);
    }

    fn deserialize(input: &mut InputArchive) -> Result<Self> {
        input.read_string()
    }
}
