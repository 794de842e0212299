use bytes::Bytes;
use thiserror::Error;

/// Upload types accepted by the analyzer.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

/// An uploaded resume file. Immutable once read; dropped when the analysis ends.
#[derive(Debug, Clone)]
pub struct ResumeDocument {
    pub bytes: Bytes,
    pub filename: String,
    /// Lowercased extension, always one of `ALLOWED_EXTENSIONS`.
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("uploaded file is empty")]
    Empty,

    #[error("'{0}' has no file extension")]
    MissingExtension(String),

    #[error("'.{0}' files are not accepted; upload one of: pdf, png, jpg, jpeg")]
    Unsupported(String),
}

impl ResumeDocument {
    /// Validates an upload against the allow-list. Runs before any network call.
    pub fn from_upload(filename: &str, bytes: Bytes) -> Result<Self, DocumentError> {
        let extension = file_extension(filename)
            .ok_or_else(|| DocumentError::MissingExtension(filename.to_string()))?
            .to_ascii_lowercase();

        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DocumentError::Unsupported(extension));
        }
        if bytes.is_empty() {
            return Err(DocumentError::Empty);
        }

        Ok(Self {
            bytes,
            filename: filename.to_string(),
            extension,
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.extension == "pdf"
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension.as_str() {
            "pdf" => "application/pdf",
            "png" => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// Splits off the text after the last `.`; `None` when there is none or it is empty.
pub fn file_extension(filename: &str) -> Option<&str> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}
