//! Message envelope: header plus codec-encoded arguments.
//!
//! Transports move whole envelopes, so decoding is a single length check
//! rather than incremental framing. Uses `bytes::Bytes` for zero-copy
//! payload sharing.
//!
//! # Example
//!
//! ```
//! use taskloaf::protocol::Envelope;
//! use bytes::Bytes;
//!
//! let envelope = Envelope::new(5, Bytes::from_static(b"hello"))?;
//! let wire = envelope.encode();
//!
//! let decoded = Envelope::decode(wire, u32::MAX)?;
//! assert_eq!(decoded.type_code(), 5);
//! assert_eq!(decoded.payload(), b"hello");
//! # Ok::<(), taskloaf::TaskloafError>(())
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, HEADER_SIZE};
use crate::error::{Result, TaskloafError};

/// A complete protocol envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Decoded header.
    pub header: Header,
    /// Codec-encoded arguments (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Envelope {
    /// Create an envelope, deriving the header length from the payload.
    ///
    /// Fails with [`TaskloafError::Protocol`] when the payload length does
    /// not fit the header's 32-bit length field.
    pub fn new(type_code: u16, payload: Bytes) -> Result<Self> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            TaskloafError::Protocol(format!(
                "Payload size {} does not fit a 32-bit length",
                payload.len()
            ))
        })?;
        Ok(Self {
            header: Header::new(type_code, length),
            payload,
        })
    }

    /// Get the type code.
    #[inline]
    pub fn type_code(&self) -> u16 {
        self.header.type_code
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Encode into one contiguous buffer: header then payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a received frame.
    ///
    /// Fails with [`TaskloafError::Decode`] when the frame is shorter than a
    /// header, or the payload is truncated or followed by trailing bytes.
    /// Fails with [`TaskloafError::Protocol`] when the declared payload
    /// exceeds `max_payload_size`.
    pub fn decode(mut frame: Bytes, max_payload_size: u32) -> Result<Self> {
        let header = Header::decode(&frame).ok_or_else(|| {
            TaskloafError::Decode(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                frame.len(),
                HEADER_SIZE
            ))
        })?;
        header.validate(max_payload_size)?;

        let payload = frame.split_off(HEADER_SIZE);
        let declared = header.payload_length as usize;
        if payload.len() < declared {
            return Err(TaskloafError::Decode(format!(
                "truncated payload: header declares {} bytes, got {}",
                declared,
                payload.len()
            )));
        }
        if payload.len() > declared {
            return Err(TaskloafError::Decode(format!(
                "{} trailing bytes after declared payload",
                payload.len() - declared
            )));
        }

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, WORK_TYPE_CODE};

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new(3, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(envelope.type_code(), 3);
        assert_eq!(envelope.header.payload_length, 5);
        assert_eq!(envelope.payload_len(), 5);
    }

    #[test]
    fn test_encode_layout() {
        let bytes = Envelope::new(WORK_TYPE_CODE, Bytes::from_static(b"ab"))
            .unwrap()
            .encode();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_decode_roundtrip() {
        let original = Envelope::new(9, Bytes::from_static(b"0123456789")).unwrap();
        let decoded = Envelope::decode(original.encode(), DEFAULT_MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_empty_payload() {
        let original = Envelope::new(2, Bytes::new()).unwrap();
        let decoded = Envelope::decode(original.encode(), DEFAULT_MAX_PAYLOAD_SIZE).unwrap();
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_decode_short_frame() {
        let result = Envelope::decode(Bytes::from_static(&[0, 1, 0]), DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(matches!(result, Err(TaskloafError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let mut wire = Envelope::new(2, Bytes::from_static(b"hello"))
            .unwrap()
            .encode();
        wire.truncate(wire.len() - 1);
        let err = Envelope::decode(wire, DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let envelope = Envelope::new(2, Bytes::from_static(b"x")).unwrap();
        let mut wire = BytesMut::from(&envelope.encode()[..]);
        wire.put_u8(0xFF);
        let err = Envelope::decode(wire.freeze(), DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_decode_oversized_payload() {
        let wire = Envelope::new(2, Bytes::from(vec![0u8; 64]))
            .unwrap()
            .encode();
        let result = Envelope::decode(wire, 16);
        assert!(matches!(result, Err(TaskloafError::Protocol(_))));
    }

    #[test]
    fn test_payload_zero_copy() {
        let wire = Envelope::new(2, Bytes::from_static(b"shared"))
            .unwrap()
            .encode();
        let base = wire.as_ptr();
        let decoded = Envelope::decode(wire, DEFAULT_MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(decoded.payload.as_ptr(), base.wrapping_add(HEADER_SIZE));
    }
}
