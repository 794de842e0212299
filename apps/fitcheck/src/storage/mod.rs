//! Blob store: persists the raw uploaded resume before extraction.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::NaiveDate;
use tracing::info;

use crate::errors::AnalysisError;
use crate::models::document::{file_extension, ResumeDocument};

/// Where an uploaded object landed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, document: &ResumeDocument, key: &str) -> Result<BlobLocation, AnalysisError>;
}

/// Object key for an upload: `<base name, spaces as underscores>_<YYYY-MM-DD>.<extension>`.
pub fn derive_object_key(filename: &str, date: NaiveDate) -> String {
    let (base, extension) = match file_extension(filename) {
        Some(ext) => (&filename[..filename.len() - ext.len() - 1], Some(ext)),
        None => (filename, None),
    };
    let sanitized = base.replace(' ', "_");
    let date = date.format("%Y-%m-%d");
    match extension {
        Some(ext) => format!("{sanitized}_{date}.{ext}"),
        None => format!("{sanitized}_{date}"),
    }
}

/// S3 (or MinIO) backed blob store.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, document: &ResumeDocument, key: &str) -> Result<BlobLocation, AnalysisError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(document.bytes.clone()))
            .content_type(document.content_type())
            .send()
            .await
            .map_err(|e| AnalysisError::Upload(format!("S3 upload failed: {}", DisplayErrorContext(&e))))?;

        let location = BlobLocation {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        };
        info!("Uploaded resume to {location}");
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 26).unwrap()
    }

    #[test]
    fn test_key_replaces_spaces_and_appends_date() {
        assert_eq!(
            derive_object_key("Jane Doe Resume.pdf", date()),
            "Jane_Doe_Resume_2024-11-26.pdf"
        );
    }

    #[test]
    fn test_key_keeps_original_extension_case() {
        assert_eq!(derive_object_key("scan.JPG", date()), "scan_2024-11-26.JPG");
    }

    #[test]
    fn test_key_splits_on_last_dot() {
        assert_eq!(
            derive_object_key("cv.v2.final.png", date()),
            "cv.v2.final_2024-11-26.png"
        );
    }

    #[test]
    fn test_key_without_extension() {
        assert_eq!(derive_object_key("resume", date()), "resume_2024-11-26");
    }

    #[test]
    fn test_location_display() {
        let location = BlobLocation {
            bucket: "resumes".into(),
            key: "cv_2024-11-26.pdf".into(),
        };
        assert_eq!(location.to_string(), "s3://resumes/cv_2024-11-26.pdf");
    }
}
