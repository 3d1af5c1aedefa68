/*!
Raw payloads and their byte encoding.

A payload is either text (a fetched page, a serialized record) or binary (an
image, an archive). The variant is fixed when the payload is built, so
backends never have to probe what kind of buffer they were given.
*/

use bytes::Bytes;
use std::borrow::Cow;

/// In-memory artifact body produced by a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    Text(String),
    Binary(Bytes),
}

/// How a local backend should open its destination file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Text,
    Binary,
}

/// Byte form of a payload plus the write mode it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub mode: WriteMode,
}

impl EncodedBody<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl RawPayload {
    pub fn text(text: impl Into<String>) -> Self {
        RawPayload::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        RawPayload::Binary(data.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, RawPayload::Text(_))
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            RawPayload::Text(text) => text.len(),
            RawPayload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode to bytes for a durable write
    ///
    /// Text is UTF-8 encoded, binary data is passed through untouched. The
    /// payload is only borrowed, so it can be encoded again after a failed
    /// write.
    pub fn encode(&self) -> EncodedBody<'_> {
        match self {
            RawPayload::Text(text) => EncodedBody {
                bytes: Cow::Borrowed(text.as_bytes()),
                mode: WriteMode::Text,
            },
            RawPayload::Binary(data) => EncodedBody {
                bytes: Cow::Borrowed(data.as_ref()),
                mode: WriteMode::Binary,
            },
        }
    }
}

impl From<String> for RawPayload {
    fn from(text: String) -> Self {
        RawPayload::Text(text)
    }
}

impl From<&str> for RawPayload {
    fn from(text: &str) -> Self {
        RawPayload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(data: Vec<u8>) -> Self {
        RawPayload::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for RawPayload {
    fn from(data: Bytes) -> Self {
        RawPayload::Binary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_encodes_utf8() {
        let payload = RawPayload::text("héllo");
        let body = payload.encode();

        assert_eq!(body.mode, WriteMode::Text);
        assert_eq!(body.bytes.as_ref(), "héllo".as_bytes());
        assert_eq!(body.len(), 6);
    }

    #[test]
    fn test_binary_passes_through() {
        let data = vec![0u8, 159, 146, 150, 255];
        let payload = RawPayload::from(data.clone());
        let body = payload.encode();

        assert_eq!(body.mode, WriteMode::Binary);
        assert_eq!(body.bytes.as_ref(), data.as_slice());
        assert!(!payload.is_text());
    }

    #[test]
    fn test_payload_can_be_encoded_twice() {
        let payload = RawPayload::from("again");
        let first = payload.encode().bytes.into_owned();
        let second = payload.encode().bytes.into_owned();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_payload() {
        let payload = RawPayload::binary(Bytes::new());
        assert!(payload.is_empty());
        assert!(payload.encode().is_empty());
    }
}
