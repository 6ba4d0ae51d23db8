//! Pluggable record payload codecs.
//!
//! The client core moves opaque bytes; turning application values into
//! bytes and back is an injected strategy.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode/decode strategy for one payload type.
pub trait Codec<T> {
    fn encode(&self, item: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON payloads via serde.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(item)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// UTF-8 string payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, item: &String) -> Result<Vec<u8>> {
        Ok(item.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// Raw byte payloads, passed through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, item: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        item: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec;
        let order = Order {
            id: 7,
            item: "anchovies".to_owned(),
        };
        let bytes = codec.encode(&order).expect("encodes");
        let decoded: Order = codec.decode(&bytes).expect("decodes");
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec;
        let result: Result<Order> = codec.decode(b"{not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_utf8_codec_rejects_invalid() {
        let codec = Utf8Codec;
        assert!(codec.decode(&[0xff, 0xfe]).is_err());
        assert_eq!(codec.decode(b"hello").expect("decodes"), "hello");
    }
}
