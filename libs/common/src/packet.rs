//! Wire packet: an opcode plus a payload byte buffer with a read cursor.
//!
//! Reads never panic; running past the end of the payload yields a
//! [`PacketError`], which callers treat as a protocol error on the offending
//! connection.

use bytes::{BufMut, BytesMut};

/// Strings on the wire are NUL-terminated byte sequences.
const STRING_TERMINATOR: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("read past end of packet (opcode {opcode}, pos {pos}, wanted {wanted}, size {size})")]
    UnexpectedEnd {
        opcode: u16,
        pos: usize,
        wanted: usize,
        size: usize,
    },
    #[error("unterminated string in packet (opcode {opcode}, pos {pos})")]
    UnterminatedString { opcode: u16, pos: usize },
    #[error("invalid utf-8 string in packet (opcode {opcode}, pos {pos})")]
    InvalidUtf8 { opcode: u16, pos: usize },
    #[error("array length {len} exceeds maximum {max} (opcode {opcode})")]
    ArrayTooLarge { opcode: u16, len: usize, max: usize },
}

/// A single protocol frame, header already stripped.
#[derive(Debug, Clone)]
pub struct Packet {
    opcode: u16,
    payload: BytesMut,
    rpos: usize,
}

impl Packet {
    pub fn new(opcode: u16) -> Self {
        Self::with_capacity(opcode, 0)
    }

    pub fn with_capacity(opcode: u16, capacity: usize) -> Self {
        Self {
            opcode,
            payload: BytesMut::with_capacity(capacity),
            rpos: 0,
        }
    }

    /// Wrap a fully received payload buffer.
    pub fn from_payload(opcode: u16, payload: BytesMut) -> Self {
        Self {
            opcode,
            payload,
            rpos: 0,
        }
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes left unread after handler dispatch; non-zero means the handler
    /// under-read the frame.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.rpos
    }

    // Write side -----------------------------------------------------------

    pub fn write_u8(&mut self, value: u8) {
        self.payload.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.payload.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.payload.put_u32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.payload.put_i64_le(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.payload.put_u8(value as u8);
    }

    pub fn write_str(&mut self, value: &str) {
        self.payload.put_slice(value.as_bytes());
        self.payload.put_u8(STRING_TERMINATOR);
    }

    // Read side ------------------------------------------------------------

    fn take(&mut self, wanted: usize) -> Result<&[u8], PacketError> {
        if self.rpos + wanted > self.payload.len() {
            return Err(PacketError::UnexpectedEnd {
                opcode: self.opcode,
                pos: self.rpos,
                wanted,
                size: self.payload.len(),
            });
        }
        let slice = &self.payload[self.rpos..self.rpos + wanted];
        self.rpos += wanted;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, PacketError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, PacketError> {
        let start = self.rpos;
        let terminator = self.payload[start..]
            .iter()
            .position(|&b| b == STRING_TERMINATOR)
            .ok_or(PacketError::UnterminatedString {
                opcode: self.opcode,
                pos: start,
            })?;

        let bytes = &self.payload[start..start + terminator];
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PacketError::InvalidUtf8 {
                opcode: self.opcode,
                pos: start,
            })?
            .to_owned();
        self.rpos = start + terminator + 1;
        Ok(text)
    }

    /// Read an array length and reject absurd values before allocating.
    pub fn read_array_len(&mut self, max: usize) -> Result<usize, PacketError> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(PacketError::ArrayTooLarge {
                opcode: self.opcode,
                len,
                max,
            });
        }
        Ok(len)
    }

    /// Hex dump of the payload for error logs.
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(self.payload.len() * 3);
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                out.push(if i % 16 == 0 { '\n' } else { ' ' });
            }
            out.push_str(&format!("{byte:02X}"));
        }
        out
    }
}
