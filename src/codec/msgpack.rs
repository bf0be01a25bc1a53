//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` (struct-as-map), so peers built
//! from different versions of a task type still agree on field names rather
//! than positions.

use super::context::DecodeScope;
use crate::error::Result;
use crate::worker::Worker;

/// MessagePack codec for envelope arguments and task payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// Any [`DistributedRef`](crate::dref::DistributedRef) reachable from
    /// `value` is cloned as part of the encode: the wire carries the clone,
    /// and the in-memory original records one more child.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value that holds no distributed references.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T, including
    /// when T contains a distributed reference.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode MsgPack bytes on behalf of `worker`.
    ///
    /// Distributed references inside the value are bound to `worker`, which
    /// is where their eventual release will be issued from.
    pub fn decode_in<T: serde::de::DeserializeOwned>(worker: &Worker, bytes: &[u8]) -> Result<T> {
        let _scope = DecodeScope::enter(worker);
        Self::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskloafError;
    use crate::transport::NullTransport;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Resize {
        width: u32,
        height: u32,
        label: String,
    }

    #[test]
    fn test_structs_encode_as_maps() {
        let task = Resize {
            width: 640,
            height: 480,
            label: "thumb".to_string(),
        };

        let encoded = MsgPackCodec::encode(&task).unwrap();
        assert_eq!(encoded[0], 0x83, "expected fixmap with 3 entries");

        let decoded: Resize = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_tuples_encode_as_arrays() {
        let args = (7u32, "seven".to_string());
        let encoded = MsgPackCodec::encode(&args).unwrap();
        assert_eq!(encoded[0], 0x92);

        let decoded: (u32, String) = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_nested_task_bytes_use_bin() {
        let payload = crate::task::WorkPayload {
            task: "t".to_string(),
            args: vec![0xde, 0xad],
        };
        let encoded = MsgPackCodec::encode(&payload).unwrap();
        // {"task": "t", "args": bin8[2]}
        assert!(encoded.windows(2).any(|w| w == [0xc4, 0x02]));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Resize> = MsgPackCodec::decode(b"\xc1");
        assert!(matches!(result, Err(TaskloafError::MsgPackDecode(_))));
    }

    #[test]
    fn test_decode_in_plain_value() {
        let worker = Worker::builder(NullTransport::new()).build();
        let encoded = MsgPackCodec::encode(&[1u8, 2, 3]).unwrap();
        let decoded: Vec<u8> = MsgPackCodec::decode_in(&worker, &encoded).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }
}
