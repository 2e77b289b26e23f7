use tracing::{debug, info, warn};

use crate::llm::GenerationFailure;
use crate::state::{SessionPhase, SessionSnapshot, SessionState, UploadedImage};
use crate::styles::{find_style, StyleDefinition};

pub const MISSING_IMAGE_MESSAGE: &str = "Please upload an image first.";
pub const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please upload an image first.")]
    InvalidState,
    #[error("A headshot is already being generated")]
    AlreadyGenerating,
    #[error("Unknown style: {0}")]
    UnknownStyle(String),
    #[error("Session runtime is no longer running")]
    RuntimeClosed,
}

/// Work order handed to the generator after a successful `generate`.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub token: u64,
    pub style: &'static StyleDefinition,
    pub image: UploadedImage,
}

impl GenerationRequest {
    pub fn instructions(&self) -> &'static str {
        self.style.prompt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The request was superseded by an upload or reset; state untouched.
    Stale,
}

/// Upload/generate/reset state machine for one session.
///
/// Every dispatched request gets a fresh token. `upload` and `reset` drop the
/// outstanding token, so a completion that arrives afterwards is discarded
/// instead of leaking into the new session.
#[derive(Debug, Default)]
pub struct SessionController {
    state: SessionState,
    next_token: u64,
    outstanding: Option<u64>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn outstanding_token(&self) -> Option<u64> {
        self.outstanding
    }

    pub fn upload(&mut self, image: UploadedImage) {
        if let Some(token) = self.outstanding.take() {
            info!("Upload superseded in-flight generation token={}", token);
        }
        info!(
            "Image uploaded: mime={} size={} name={:?}",
            image.mime_type,
            image.len(),
            image.display_name
        );
        self.state = SessionState {
            uploaded_image: Some(image),
            ..SessionState::default()
        };
    }

    pub fn generate(&mut self, style_id: &str) -> Result<GenerationRequest, SessionError> {
        let Some(image) = self.state.uploaded_image.clone() else {
            warn!("Generate requested without an uploaded image (style={})", style_id);
            self.state.result_image_ref = None;
            self.state.error_message = Some(MISSING_IMAGE_MESSAGE.to_string());
            return Err(SessionError::InvalidState);
        };

        if self.state.is_generating {
            warn!(
                "Generate rejected: token={:?} still in flight (style={})",
                self.outstanding, style_id
            );
            return Err(SessionError::AlreadyGenerating);
        }

        let style = find_style(style_id)
            .ok_or_else(|| SessionError::UnknownStyle(style_id.trim().to_string()))?;

        self.next_token += 1;
        let token = self.next_token;
        self.outstanding = Some(token);
        self.state.is_generating = true;
        self.state.result_image_ref = None;
        self.state.error_message = None;
        self.state.selected_style_id = Some(style.id.to_string());
        info!("Dispatching generation token={} style={}", token, style.id);

        Ok(GenerationRequest {
            token,
            style,
            image,
        })
    }

    pub fn complete(
        &mut self,
        token: u64,
        outcome: Result<String, GenerationFailure>,
    ) -> Completion {
        if self.outstanding != Some(token) {
            debug!(
                "Discarding stale generation result token={} outstanding={:?}",
                token, self.outstanding
            );
            return Completion::Stale;
        }

        self.outstanding = None;
        self.state.is_generating = false;
        self.state.selected_style_id = None;
        match outcome {
            Ok(image_ref) => {
                info!("Generation token={} succeeded", token);
                self.state.result_image_ref = Some(image_ref);
                self.state.error_message = None;
            }
            Err(failure) => {
                let message = failure.message().trim();
                let message = if message.is_empty() {
                    FALLBACK_ERROR_MESSAGE
                } else {
                    message
                };
                warn!("Generation token={} failed: {}", token, message);
                self.state.result_image_ref = None;
                self.state.error_message = Some(message.to_string());
            }
        }
        Completion::Applied
    }

    pub fn reset(&mut self) {
        if let Some(token) = self.outstanding.take() {
            info!("Reset abandoned in-flight generation token={}", token);
        }
        self.state = SessionState::default();
        debug!("Session reset");
    }
}
