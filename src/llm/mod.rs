pub mod gemini;
pub mod media;

use async_trait::async_trait;

use crate::state::UploadedImage;

pub use gemini::GeminiHeadshotGenerator;

/// Failure reported by a headshot generator, surfaced to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct GenerationFailure(pub String);

impl GenerationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<anyhow::Error> for GenerationFailure {
    fn from(err: anyhow::Error) -> Self {
        Self(err.to_string())
    }
}

/// Remote service that turns a photo and style instructions into a headshot.
///
/// Each call has exactly one outcome: an image reference (typically a
/// `data:` URL) or a failure.
#[async_trait]
pub trait HeadshotGenerator: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate_headshot(
        &self,
        image: &UploadedImage,
        instructions: &str,
    ) -> Result<String, GenerationFailure>;
}
