//! Chunk payload codecs.
//!
//! Every chunk of a table save file is passed through the codec named in the
//! file header before it is written. Only `identity` ships; compressed or
//! encrypted codecs plug in here and readers refuse ids they do not know.

/// Transforms chunk payloads on their way to and from disk
pub trait ChunkCodec: Send + Sync {
    /// Identifier recorded in the table file header
    fn id(&self) -> &'static str;

    /// Bytes to store for `payload`
    fn encode(&self, payload: &[u8]) -> Vec<u8>;

    /// Payload recovered from stored bytes
    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Codec failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Header names a codec this build does not have
    #[error("Table file uses unknown chunk codec {0:?}")]
    Unknown(String),

    /// Stored bytes are not valid output of the codec
    #[error("Chunk of {len} bytes is not valid {codec} output")]
    Malformed {
        /// Codec id
        codec: &'static str,
        /// Stored length
        len: usize,
    },
}

/// Stores payloads unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl ChunkCodec for IdentityCodec {
    fn id(&self) -> &'static str {
        "identity"
    }

    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(stored.to_vec())
    }
}

/// Codec for a header's codec id
pub fn codec_for(id: &str) -> Result<Box<dyn ChunkCodec>, CodecError> {
    match id {
        "identity" => Ok(Box::new(IdentityCodec)),
        other => Err(CodecError::Unknown(other.to_string())),
    }
}
