pub mod controller;
pub mod runtime;

pub use controller::{
    Completion, GenerationRequest, SessionController, SessionError, FALLBACK_ERROR_MESSAGE,
    MISSING_IMAGE_MESSAGE,
};
pub use runtime::{SessionEvent, SessionHandle, SessionRuntime};
