use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Photo supplied by the file selection boundary.
///
/// Bytes are shared so a dispatched generation can hold them while the
/// session moves on.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedImage {
    bytes: Arc<[u8]>,
    pub mime_type: String,
    pub display_name: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, mime_type: String, display_name: Option<String>) -> Self {
        Self {
            bytes: Arc::from(bytes),
            mime_type,
            display_name,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            mime_type: self.mime_type.clone(),
            size_bytes: self.len(),
            display_name: self.display_name.clone(),
        }
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.len())
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Ready,
    Generating,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Ready => "ready",
            SessionPhase::Generating => "generating",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub uploaded_image: Option<UploadedImage>,
    pub selected_style_id: Option<String>,
    pub is_generating: bool,
    pub result_image_ref: Option<String>,
    pub error_message: Option<String>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if self.is_generating {
            SessionPhase::Generating
        } else if self.uploaded_image.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            uploaded_image: self.uploaded_image.as_ref().map(UploadedImage::summary),
            selected_style_id: self.selected_style_id.clone(),
            is_generating: self.is_generating,
            result_image_ref: self.result_image_ref.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub mime_type: String,
    pub size_bytes: usize,
    pub display_name: Option<String>,
}

/// Read-only view of the session handed to the display boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub uploaded_image: Option<ImageSummary>,
    pub selected_style_id: Option<String>,
    pub is_generating: bool,
    pub result_image_ref: Option<String>,
    pub error_message: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::default().snapshot()
    }
}
