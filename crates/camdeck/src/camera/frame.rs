//! Captured frames.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// MIME type of every frame produced by the bundled sources.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// An encoded image produced by the capture loop.
///
/// The image bytes are opaque to the session; only the route layer looks at
/// `content_type`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Position of this frame within the current acquisition, from 1.
    pub sequence: u64,

    /// When the frame was read from the device.
    pub captured_at: DateTime<Utc>,

    /// MIME type of `data`.
    pub content_type: &'static str,

    /// BLAKE3 digest of `data`, hex encoded.
    pub digest: String,

    /// The encoded image.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap freshly captured JPEG bytes.
    #[must_use]
    pub fn jpeg(sequence: u64, data: Vec<u8>) -> Self {
        let digest = Self::compute_digest(&data);
        Self {
            sequence,
            captured_at: Utc::now(),
            content_type: JPEG_CONTENT_TYPE,
            digest,
            data,
        }
    }

    /// Compute the BLAKE3 digest of encoded frame bytes.
    #[must_use]
    pub fn compute_digest(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// Quoted entity tag for HTTP caching.
    #[must_use]
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.digest)
    }

    /// Size of the encoded image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .field("content_type", &self.content_type)
            .field("digest", &self.digest)
            .field("len", &self.data.len())
            .finish()
    }
}
