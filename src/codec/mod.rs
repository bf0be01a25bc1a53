//! Codec module - serialization/deserialization for envelope arguments.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! Encoding is reentrant with respect to [`DistributedRef`]: serializing a
//! reference clones it, so every encode of a value that holds references
//! bumps their bookkeeping. Decoding a value that holds references must go
//! through [`MsgPackCodec::decode_in`], which binds the decoded references to
//! the receiving worker.
//!
//! # Example
//!
//! ```
//! use taskloaf::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&(123, "hello")).unwrap();
//! let decoded: (i32, String) = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, (123, "hello".to_string()));
//! ```
//!
//! [`DistributedRef`]: crate::dref::DistributedRef

mod context;
mod msgpack;

pub(crate) use context::current_worker;
pub use msgpack::MsgPackCodec;
