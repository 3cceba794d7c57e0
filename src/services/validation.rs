use thiserror::Error;

const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

const ALLOWED_IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Search query cannot be empty")]
    EmptyQuery,

    #[error("Unsupported image type: {0}")]
    UnsupportedImageType(String),

    #[error("Image exceeds the 10 MB size limit ({0} bytes)")]
    ImageTooLarge(u64),
}

/// Trims, collapses internal whitespace, and strips angle brackets.
pub fn sanitize_query(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    Ok(cleaned)
}

/// Hashtag queries always carry a leading `#`.
#[must_use]
pub fn format_hashtag(query: &str) -> String {
    if query.starts_with('#') {
        query.to_string()
    } else {
        format!("#{query}")
    }
}

/// Synchronous gate run before any quota or network effect.
pub fn validate_image_file(
    file_name: &str,
    content_type: &str,
    size_bytes: u64,
) -> Result<(), ValidationError> {
    let mime = content_type.to_ascii_lowercase();
    if !ALLOWED_IMAGE_MIMES.contains(&mime.as_str()) {
        return Err(ValidationError::UnsupportedImageType(format!(
            "{content_type} ({file_name})"
        )));
    }

    if size_bytes > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageTooLarge(size_bytes));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace_and_strips_brackets() {
        assert_eq!(
            sanitize_query("  jane   <b>doe</b>  ").unwrap(),
            "jane bdoe/b"
        );
        assert_eq!(sanitize_query("plain").unwrap(), "plain");
    }

    #[test]
    fn sanitize_rejects_empty_after_cleanup() {
        assert_eq!(sanitize_query("  <> "), Err(ValidationError::EmptyQuery));
        assert_eq!(sanitize_query(""), Err(ValidationError::EmptyQuery));
    }

    #[test]
    fn hashtag_prefix_added_once() {
        assert_eq!(format_hashtag("travel"), "#travel");
        assert_eq!(format_hashtag("#travel"), "#travel");
    }

    #[test]
    fn image_validation_enforces_mime_and_size() {
        assert!(validate_image_file("a.png", "image/png", 1024).is_ok());
        assert!(validate_image_file("a.webp", "IMAGE/WEBP", 1024).is_ok());

        assert_eq!(
            validate_image_file("a.bmp", "image/bmp", 1024),
            Err(ValidationError::UnsupportedImageType(
                "image/bmp (a.bmp)".to_string()
            ))
        );

        let eleven_mb = 11 * 1024 * 1024;
        assert_eq!(
            validate_image_file("a.png", "image/png", eleven_mb),
            Err(ValidationError::ImageTooLarge(eleven_mb))
        );
    }
}
