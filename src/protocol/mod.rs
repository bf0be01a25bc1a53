//! Protocol module - wire format and message envelopes.
//!
//! This module implements the binary envelope every transport carries:
//! - 6-byte header encoding/decoding
//! - Envelope struct with whole-frame decode
//! - The closed set of built-in message kinds
//!
//! The type-code registry and dispatch live in [`crate::handler`].

mod envelope;
mod kind;
mod wire_format;

pub use envelope::Envelope;
pub use kind::MessageKind;
pub use wire_format::{
    Header, DECREMENT_TYPE_CODE, DEFAULT_MAX_PAYLOAD_SIZE, FIRST_USER_TYPE_CODE, HEADER_SIZE,
    WORK_TYPE_CODE,
};
