//! Archive upload validation and temporary upload files.
//!
//! Checks run cheapest first: filename extension, declared MIME type, then
//! the leading bytes. The magic-byte check is authoritative; a renamed or
//! mislabelled file fails it no matter what the first two checks said.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{CacheError, CoreResult, ValidationError};

/// Accepted filename extension (compared case-insensitively).
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Declared content types accepted for ZIP uploads.
pub const ARCHIVE_MIME_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/x-zip",
    "application/octet-stream",
    "multipart/x-zip",
];

/// ZIP signatures: local file header, empty archive, spanned archive.
pub const ZIP_SIGNATURES: &[&[u8; 4]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// An archive received from a client, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct ArchiveUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ArchiveUpload {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    /// Run every check in order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_extension(&self.file_name)?;
        check_mime(self.content_type.as_deref())?;
        check_magic(&self.bytes)
    }
}

fn rejected(reason: impl Into<String>) -> ValidationError {
    ValidationError::RejectedArchive {
        reason: reason.into(),
    }
}

pub fn check_extension(file_name: &str) -> Result<(), ValidationError> {
    let matches = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
    if matches {
        Ok(())
    } else {
        Err(rejected(format!("'{}' is not a .zip file", file_name)))
    }
}

/// A missing content type is allowed; the magic bytes still decide.
pub fn check_mime(content_type: Option<&str>) -> Result<(), ValidationError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if ARCHIVE_MIME_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(rejected(format!("content type '{}' is not a ZIP archive", content_type)))
    }
}

pub fn check_magic(bytes: &[u8]) -> Result<(), ValidationError> {
    let head = bytes.get(..4).ok_or_else(|| rejected("file is too short to be a ZIP archive"))?;
    if ZIP_SIGNATURES.iter().any(|sig| head == sig.as_slice()) {
        Ok(())
    } else {
        Err(rejected("file content does not match the ZIP signature"))
    }
}

/// Resolve `candidate` and require it to live under `base`.
///
/// Both paths are canonicalized, so symlinks and `..` segments are resolved
/// before the comparison.
pub async fn ensure_contained(base: &Path, candidate: &Path) -> Result<PathBuf, ValidationError> {
    let traversal = || ValidationError::PathTraversal {
        path: candidate.display().to_string(),
    };
    let base = tokio::fs::canonicalize(base).await.map_err(|_| traversal())?;
    let resolved = tokio::fs::canonicalize(candidate).await.map_err(|_| traversal())?;
    if resolved.starts_with(&base) && resolved != base {
        Ok(resolved)
    } else {
        Err(traversal())
    }
}

/// A validated upload written to the upload directory.
///
/// The file is removed when the guard drops, on every exit path.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    file_name: String,
}

impl TempUpload {
    /// Write `upload` under `upload_dir` with a generated name.
    pub async fn persist(upload_dir: &Path, upload: &ArchiveUpload) -> CoreResult<Self> {
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|e| CacheError::io(upload_dir, &e))?;

        let target = upload_dir.join(format!(
            "upload-{}.{}",
            uuid::Uuid::new_v4().simple(),
            ARCHIVE_EXTENSION
        ));
        tokio::fs::write(&target, &upload.bytes)
            .await
            .map_err(|e| CacheError::io(&target, &e))?;

        // From here on the guard owns the file, so a failed check still cleans up.
        let mut guard = Self {
            path: target,
            file_name: upload.file_name.clone(),
        };
        guard.path = ensure_contained(upload_dir, &guard.path).await?;
        debug!(path = %guard.path.display(), bytes = upload.bytes.len(), "Stored upload");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Original client-side filename.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed upload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, mime: Option<&str>, bytes: &'static [u8]) -> ArchiveUpload {
        ArchiveUpload::new(name, mime.map(str::to_string), Bytes::from_static(bytes))
    }

    #[test]
    fn test_valid_zip_passes() {
        assert!(upload("repo.ZIP", Some("application/zip"), b"PK\x03\x04rest").validate().is_ok());
        assert!(upload("repo.zip", None, b"PK\x05\x06").validate().is_ok());
    }

    #[test]
    fn test_spoofed_extension_rejected_by_magic_bytes() {
        let err = upload("repo.zip", Some("application/zip"), b"MZ\x90\x00binary")
            .validate()
            .unwrap_err();
        match err {
            ValidationError::RejectedArchive { reason } => assert!(reason.contains("signature")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_checks_run_in_order() {
        // Wrong extension wins even when MIME and bytes are also wrong.
        let err = upload("repo.tar", Some("text/plain"), b"xx").validate().unwrap_err();
        assert!(err.to_string().contains("not a .zip"));

        let err = upload("repo.zip", Some("text/plain"), b"xx").validate().unwrap_err();
        assert!(err.to_string().contains("content type"));

        let err = upload("repo.zip", Some("application/zip; charset=binary"), b"PK")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[tokio::test]
    async fn test_temp_upload_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let archive = upload("repo.zip", None, b"PK\x03\x04data");

        let guard = TempUpload::persist(dir.path(), &archive).await.unwrap();
        let path = guard.path().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(dir.path().canonicalize().unwrap()));
        assert_eq!(guard.file_name(), "repo.zip");

        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ensure_contained_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let outside = dir.path().join("outside.zip");
        std::fs::write(&outside, b"PK\x03\x04").unwrap();

        let escaped = uploads.join("..").join("outside.zip");
        assert!(matches!(
            ensure_contained(&uploads, &escaped).await,
            Err(ValidationError::PathTraversal { .. })
        ));

        let inside = uploads.join("inside.zip");
        std::fs::write(&inside, b"PK\x03\x04").unwrap();
        assert!(ensure_contained(&uploads, &inside).await.is_ok());
    }
}
