use std::path::{Component, Path};

use crate::ChunkStoreError;

/// Validates that an upload id can be used as a single directory name.
///
/// Upload ids are minted by the coordinator, but they arrive over the wire,
/// so anything that could escape the storage root is rejected:
/// - Empty ids
/// - Path separators (`/`, `\`)
/// - `.` and `..`
/// - Anything that does not parse as exactly one normal path component
pub fn validate_upload_id(upload_id: &str) -> Result<(), ChunkStoreError> {
    if upload_id.is_empty() {
        return Err(ChunkStoreError::InvalidUploadId("empty upload id".into()));
    }

    if upload_id.contains(['/', '\\']) {
        return Err(ChunkStoreError::InvalidUploadId(format!(
            "path separator not allowed: {upload_id}"
        )));
    }

    let mut components = Path::new(upload_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ChunkStoreError::InvalidUploadId(format!(
            "not a plain name: {upload_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uuid() {
        assert!(validate_upload_id("4b0d7d3e-6a0e-4d43-9c43-0b8f0f3f4a52").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_upload_id("").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_upload_id("..").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_upload_id(".").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_upload_id("../../etc").is_err());
    }

    #[test]
    fn rejects_nested_path() {
        assert!(validate_upload_id("a/b").is_err());
    }

    #[test]
    fn rejects_backslash() {
        assert!(validate_upload_id("a\\b").is_err());
    }

    #[test]
    fn rejects_absolute() {
        assert!(validate_upload_id("/tmp").is_err());
    }

    #[test]
    fn accepts_dotted_name() {
        assert!(validate_upload_id("upload.v2").is_ok());
    }
}
