//! Frame header codec.
//!
//! Client→server frames carry a 4-byte header: a big-endian `u16` size (the
//! payload length *including* the 2-byte opcode field) followed by a
//! little-endian `u16` opcode. Server→client frames use the same shape. The
//! codec only validates and converts headers; partial-frame assembly is the
//! connection's job.

use crate::opcodes::NUM_OPCODES;

/// Width of the header on the wire.
pub const HEADER_SIZE: usize = 4;

/// Width of the opcode field included in the declared size.
pub const OPCODE_SIZE: u16 = 2;

/// Largest client frame the gateway accepts (opcode + payload).
pub const MAX_CLIENT_FRAME_SIZE: u16 = 10240;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed header (size {size}, opcode {opcode})")]
    MalformedHeader { size: u16, opcode: u16 },
}

/// A validated client frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub opcode: u16,
    /// Payload length with the opcode field already subtracted.
    pub payload_len: usize,
}

/// Decode and validate a client header.
pub fn decode_client_header(raw: &[u8; HEADER_SIZE]) -> Result<ClientHeader, CodecError> {
    let size = u16::from_be_bytes([raw[0], raw[1]]);
    let opcode = u16::from_le_bytes([raw[2], raw[3]]);

    let valid_size = (OPCODE_SIZE..=MAX_CLIENT_FRAME_SIZE).contains(&size);
    let valid_opcode = opcode >= 1 && opcode < NUM_OPCODES;
    if !valid_size || !valid_opcode {
        return Err(CodecError::MalformedHeader { size, opcode });
    }

    Ok(ClientHeader {
        opcode,
        payload_len: (size - OPCODE_SIZE) as usize,
    })
}

/// Encode a client header for a payload of the given length.
pub fn encode_client_header(opcode: u16, payload_len: usize) -> [u8; HEADER_SIZE] {
    encode_header(opcode, payload_len)
}

/// Encode a server header for a payload of the given length.
pub fn encode_server_header(opcode: u16, payload_len: usize) -> [u8; HEADER_SIZE] {
    encode_header(opcode, payload_len)
}

fn encode_header(opcode: u16, payload_len: usize) -> [u8; HEADER_SIZE] {
    let size = (payload_len as u16 + OPCODE_SIZE).to_be_bytes();
    let op = opcode.to_le_bytes();
    [size[0], size[1], op[0], op[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_encode_identity_for_valid_headers() {
        for opcode in 1..NUM_OPCODES {
            for payload_len in [0usize, 1, 255, 4096] {
                let raw = encode_client_header(opcode, payload_len);
                let header = decode_client_header(&raw).unwrap();
                assert_eq!(header.opcode, opcode);
                assert_eq!(header.payload_len, payload_len);
            }
        }
    }

    #[test]
    fn size_is_big_endian_opcode_little_endian() {
        let raw = encode_client_header(2, 1);
        // size = 3 (payload 1 + opcode field 2), big-endian
        assert_eq!(&raw[..2], &[0x00, 0x03]);
        // opcode 2, little-endian
        assert_eq!(&raw[2..], &[0x02, 0x00]);
    }

    #[test]
    fn out_of_range_opcode_is_malformed() {
        let raw = encode_client_header(NUM_OPCODES, 4);
        assert!(matches!(
            decode_client_header(&raw),
            Err(CodecError::MalformedHeader { .. })
        ));

        let raw = encode_client_header(0, 4);
        assert!(decode_client_header(&raw).is_err());
    }

    #[test]
    fn undersized_and_oversized_frames_are_malformed() {
        // Declared size below the opcode width.
        let raw = [0x00, 0x01, 0x02, 0x00];
        assert_eq!(
            decode_client_header(&raw),
            Err(CodecError::MalformedHeader { size: 1, opcode: 2 })
        );

        // Declared size above the frame cap.
        let size = (MAX_CLIENT_FRAME_SIZE + 1).to_be_bytes();
        let raw = [size[0], size[1], 0x02, 0x00];
        assert!(decode_client_header(&raw).is_err());
    }
}
