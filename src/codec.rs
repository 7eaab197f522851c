//! Pluggable message codec.
//!
//! The default codec is schemaless MessagePack via `rmp-serde`, the same
//! crate the cache service uses for its typed `get`/`set` helpers.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ChannelLayerError, Result};

/// A message codec. Implementations must round-trip any value the channel
/// layer is asked to transmit.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Schemaless binary codec (MessagePack).
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| ChannelLayerError::Codec(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| ChannelLayerError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn round_trips_a_map() {
        let codec = MsgpackCodec;
        let mut msg = BTreeMap::new();
        msg.insert("type".to_string(), "chat.message".to_string());
        msg.insert("text".to_string(), "hello".to_string());

        let bytes = codec.encode(&msg).unwrap();
        let decoded: BTreeMap<String, String> = codec.decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn bytes_and_array_of_small_ints_are_distinct_shapes() {
        use crate::layer::MessageValue;

        let codec = MsgpackCodec;
        let bytes_value = MessageValue::Bytes(vec![1, 2]);
        let array_value = MessageValue::Array(vec![MessageValue::Int(1), MessageValue::Int(2)]);

        let encoded_bytes = codec.encode(&bytes_value).unwrap();
        let encoded_array = codec.encode(&array_value).unwrap();

        let decoded_bytes: MessageValue = codec.decode(&encoded_bytes).unwrap();
        let decoded_array: MessageValue = codec.decode(&encoded_array).unwrap();

        assert_eq!(decoded_bytes, bytes_value);
        assert_eq!(decoded_array, array_value);
    }
}
