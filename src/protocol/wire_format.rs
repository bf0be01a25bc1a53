//! Wire format encoding and decoding.
//!
//! Every envelope starts with a 6-byte header:
//! ```text
//! ┌───────────┬──────────┐
//! │ Type code │ Length   │
//! │ 2 bytes   │ 4 bytes  │
//! │ uint16 BE │ uint32 BE│
//! └───────────┴──────────┘
//! ```
//!
//! followed by exactly `Length` bytes of codec-encoded arguments.
//! All multi-byte integers are Big Endian.

use crate::error::{Result, TaskloafError};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Type code reserved for WORK envelopes.
pub const WORK_TYPE_CODE: u16 = 0;

/// Type code reserved for reference decrements.
pub const DECREMENT_TYPE_CODE: u16 = 1;

/// First type code handed out to user-registered handlers.
pub const FIRST_USER_TYPE_CODE: u16 = 2;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind.
    pub type_code: u16,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(type_code: u16, payload_length: u32) -> Self {
        Self {
            type_code,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use taskloaf::protocol::Header;
    ///
    /// let bytes = Header::new(3, 100).encode();
    /// assert_eq!(bytes, [0, 3, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.type_code.to_be_bytes());
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            type_code: u16::from_be_bytes([buf[0], buf[1]]),
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the declared payload length against a ceiling.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(TaskloafError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }
}
