//! Upload validation for financial documents.
//!
//! The intake gateway rejects anything that is not plausibly a bank
//! statement or credit report before a record is created:
//! 1. Size ceiling
//! 2. MIME allowlist (PDF, common image formats, CSV/plain text)
//! 3. Magic byte verification so the claimed type matches the bytes
//! 4. Filename sanitization for safe storage

use crate::defaults::{FILENAME_MAX_LENGTH, MAX_UPLOAD_SIZE_BYTES};

/// MIME types accepted for analysis.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/webp",
    "text/csv",
    "text/plain",
];

/// Result of upload validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub allowed: bool,
    pub block_reason: Option<String>,
    /// MIME type established from the bytes (or extension for text formats).
    pub detected_mime: String,
}

impl ValidationResult {
    fn allowed(mime: impl Into<String>) -> Self {
        Self {
            allowed: true,
            block_reason: None,
            detected_mime: mime.into(),
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            block_reason: Some(reason.into()),
            detected_mime: "application/octet-stream".to_string(),
        }
    }
}

/// Detect the MIME type of an upload from its content.
///
/// Magic bytes are authoritative for binary formats. Text formats (CSV,
/// plain text) have no magic bytes, so the extension decides; anything
/// unrecognized falls back to `application/octet-stream`.
pub fn detect_mime_type(filename: &str, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    match filename.rsplit('.').next().map(|e| e.to_lowercase()) {
        Some(ext) if ext == "csv" => "text/csv".to_string(),
        Some(ext) if ext == "txt" => "text/plain".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Validate an upload for the analysis pipeline.
///
/// Rejection here is synchronous: no record, no blob, no orchestration.
pub fn validate_upload(filename: &str, data: &[u8]) -> ValidationResult {
    if data.is_empty() {
        return ValidationResult::blocked("Empty file");
    }

    if data.len() > MAX_UPLOAD_SIZE_BYTES {
        return ValidationResult::blocked(format!(
            "File exceeds maximum size of {} bytes",
            MAX_UPLOAD_SIZE_BYTES
        ));
    }

    let detected = detect_mime_type(filename, data);
    if !ALLOWED_MIME_TYPES.contains(&detected.as_str()) {
        return ValidationResult::blocked(format!(
            "Unsupported document type: {}",
            detected
        ));
    }

    ValidationResult::allowed(detected)
}

/// Sanitize a filename for safe storage: strip path components, replace
/// characters with filesystem meaning, enforce the length limit.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches(['.', ' ']).to_string();
    if trimmed.is_empty() {
        return "upload".to_string();
    }

    if trimmed.len() > FILENAME_MAX_LENGTH {
        // Truncate on a char boundary, keeping the extension when present
        let ext = trimmed.rsplit('.').next().filter(|e| e.len() < 16);
        match ext {
            Some(ext) if trimmed.contains('.') => {
                let keep = FILENAME_MAX_LENGTH - ext.len() - 1;
                let mut stem: String = trimmed.chars().take(keep).collect();
                stem.push('.');
                stem.push_str(ext);
                stem
            }
            _ => trimmed.chars().take(FILENAME_MAX_LENGTH).collect(),
        }
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_MAGIC: &[u8] = b"%PDF-1.7\nsome content";
    const PNG_MAGIC: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    #[test]
    fn pdf_upload_allowed() {
        let result = validate_upload("statement.pdf", PDF_MAGIC);
        assert!(result.allowed);
        assert_eq!(result.detected_mime, "application/pdf");
    }

    #[test]
    fn png_upload_allowed() {
        let result = validate_upload("scan.png", PNG_MAGIC);
        assert!(result.allowed);
        assert_eq!(result.detected_mime, "image/png");
    }

    #[test]
    fn csv_detected_by_extension() {
        let result = validate_upload("transactions.csv", b"date,amount\n2024-01-01,100");
        assert!(result.allowed);
        assert_eq!(result.detected_mime, "text/csv");
    }

    #[test]
    fn executable_blocked() {
        // ELF header
        let result = validate_upload("statement.pdf", &[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01]);
        assert!(!result.allowed);
        assert!(result.block_reason.is_some());
    }

    #[test]
    fn empty_file_blocked() {
        let result = validate_upload("statement.pdf", &[]);
        assert!(!result.allowed);
    }

    #[test]
    fn claimed_pdf_with_garbage_bytes_blocked() {
        // Extension says PDF, bytes say nothing recognizable
        let result = validate_upload("statement.pdf", &[0x00, 0x01, 0x02, 0x03]);
        assert!(!result.allowed);
        assert_eq!(result.detected_mime, "application/octet-stream");
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\doc.pdf"), "doc.pdf");
    }

    #[test]
    fn sanitize_replaces_dangerous_chars() {
        assert_eq!(sanitize_filename("state:ment?.pdf"), "state_ment_.pdf");
    }

    #[test]
    fn sanitize_empty_becomes_placeholder() {
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn sanitize_truncates_long_names_keeping_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let out = sanitize_filename(&long);
        assert!(out.len() <= FILENAME_MAX_LENGTH);
        assert!(out.ends_with(".pdf"));
    }
}
