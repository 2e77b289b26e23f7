use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, info};

use crate::llm::media::{detect_mime_type, is_supported_upload_mime};
use crate::state::UploadedImage;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is empty")]
    Empty { path: PathBuf },
    #[error("Unsupported image type {mime_type} for {path}; expected PNG, JPEG, or WEBP")]
    Unsupported { path: PathBuf, mime_type: String },
    #[error("{path} could not be decoded as an image: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Reads a photo from disk and checks it is a PNG, JPEG or WEBP image.
pub async fn load_image_file(path: &Path) -> Result<UploadedImage, UploadError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    image_from_bytes(path, bytes, display_name)
}

pub fn image_from_bytes(
    path: &Path,
    bytes: Vec<u8>,
    display_name: Option<String>,
) -> Result<UploadedImage, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty {
            path: path.to_path_buf(),
        });
    }

    let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "unknown".to_string());
    if !is_supported_upload_mime(&mime_type) {
        return Err(UploadError::Unsupported {
            path: path.to_path_buf(),
            mime_type,
        });
    }

    let (width, height) = probe_dimensions(&bytes).map_err(|source| UploadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "Loaded {} ({}, {}x{}, {} bytes)",
        path.display(),
        mime_type,
        width,
        height,
        bytes.len()
    );

    Ok(UploadedImage::new(bytes, mime_type, display_name))
}

fn probe_dimensions(bytes: &[u8]) -> image::ImageResult<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    debug!("Guessed image format {:?}", reader.format());
    reader.into_dimensions()
}
