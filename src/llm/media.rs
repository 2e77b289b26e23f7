use base64::{engine::general_purpose, Engine as _};

/// Content types accepted from the file selection boundary.
pub const SUPPORTED_UPLOAD_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| normalize_image_mime_type(kind.mime_type()))
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn is_supported_upload_mime(mime_type: &str) -> bool {
    let normalized = normalize_image_mime_type(mime_type);
    SUPPORTED_UPLOAD_MIME_TYPES.contains(&normalized.as_str())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match normalize_image_mime_type(mime_type).as_str() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Splits a base64 `data:` URL into its mime type and decoded bytes.
pub fn decode_data_url(value: &str) -> Option<(String, Vec<u8>)> {
    let rest = value.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    let bytes = general_purpose::STANDARD.decode(payload).ok()?;
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        normalize_image_mime_type(mime_type)
    };
    Some((mime_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 16] = [
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
    ];

    #[test]
    fn detects_png_magic_bytes() {
        assert_eq!(detect_mime_type(&PNG_HEADER).as_deref(), Some("image/png"));
        assert_eq!(detect_mime_type(b"plain text"), None);
    }

    #[test]
    fn accepts_only_png_jpeg_webp() {
        assert!(is_supported_upload_mime("image/png"));
        assert!(is_supported_upload_mime("IMAGE/JPG"));
        assert!(is_supported_upload_mime("image/webp"));
        assert!(!is_supported_upload_mime("image/gif"));
        assert!(!is_supported_upload_mime("application/pdf"));
    }

    #[test]
    fn data_url_decodes_back_to_bytes() {
        let url = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(PNG_HEADER)
        );
        let (mime_type, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime_type, "image/png");
        assert_eq!(bytes, PNG_HEADER.to_vec());
    }

    #[test]
    fn rejects_non_base64_data_urls() {
        assert!(decode_data_url("https://example.com/a.png").is_none());
        assert!(decode_data_url("data:image/png,rawpayload").is_none());
        assert!(decode_data_url("data:image/png;base64,@@@").is_none());
    }

    #[test]
    fn picks_file_extension_from_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
