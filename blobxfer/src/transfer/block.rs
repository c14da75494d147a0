//! Block identifiers for staged uploads.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;

/// Base64-encoded block identifier, as sent in Put Block and Put Block List.
///
/// All IDs of one blob must encode to the same length, so generated IDs use a
/// fixed-width layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(String);

impl BlockId {
    /// Encodes an arbitrary raw identifier.
    pub fn new(raw: impl AsRef<[u8]>) -> Self {
        Self(STANDARD.encode(raw.as_ref()))
    }

    /// Wraps an identifier that is already base64-encoded.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates block IDs for one upload.
///
/// Each upload gets a random prefix so that blocks left uncommitted by an
/// earlier, failed upload of the same blob are never reused.
#[derive(Debug, Clone)]
pub struct BlockIdGenerator {
    prefix: u64,
}

impl BlockIdGenerator {
    /// Create a generator with a random prefix.
    pub fn new() -> Self {
        Self {
            prefix: rand::rng().random(),
        }
    }

    /// ID for the chunk with sequence number `index`.
    pub fn block_id(&self, index: usize) -> BlockId {
        BlockId::new(format!("{:016x}-{:06}", self.prefix, index))
    }
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
