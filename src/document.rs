use crate::{config::UploadConfig, error::PartdeskError};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use self::models::{Document, StorageObject};

pub mod db;
pub mod models;

/// Bucket holding raw uploaded bytes.
pub const DOCUMENTS_BUCKET: &str = "documents";

/// Bucket holding generated thumbnails and renders.
pub const RENDERS_BUCKET: &str = "renders";

/// Lifetime of a signed raw download link, in seconds.
pub const RAW_URL_TTL: u64 = 60;

/// Lifetime of a signed thumbnail or render link, in seconds.
pub const RENDER_URL_TTL: u64 = 3600;

/// Check an upload against the configured extension allow list and size limit.
pub fn validate_upload(
    file_name: &str,
    size: u64,
    config: &UploadConfig,
) -> Result<(), PartdeskError> {
    let name = file_name.trim();

    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(PartdeskError::Validation(format!(
            "{file_name}: invalid file name"
        )));
    }

    let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
        return Err(PartdeskError::Validation(format!(
            "{file_name}: missing file extension"
        )));
    };

    let ext = ext.to_ascii_lowercase();

    if !config.allowed_extensions.iter().any(|allowed| *allowed == ext) {
        return Err(PartdeskError::Validation(format!(
            "{file_name}: file type '.{ext}' is not allowed"
        )));
    }

    if size == 0 {
        return Err(PartdeskError::Validation(format!("{file_name}: file is empty")));
    }

    if size > config.max_bytes {
        return Err(PartdeskError::Validation(format!(
            "{file_name}: file exceeds the {} byte limit",
            config.max_bytes
        )));
    }

    debug!("Accepted upload {name} ({size} bytes)");

    Ok(())
}

/// Key under which the raw bytes of a new upload are stored.
pub fn storage_key(org: Uuid, file_name: &str) -> String {
    format!("{org}/{}/{}", Uuid::new_v4(), file_name.trim())
}

/// Storage location of the raw document for a short lived download link.
pub fn raw_object(document: &Document) -> StorageObject {
    StorageObject {
        bucket: document.bucket.clone(),
        key: document.storage_key.clone(),
        expires_in: RAW_URL_TTL,
    }
}

/// Storage location of the thumbnail, if the pipeline has produced one.
pub fn thumbnail_object(document: &Document) -> Option<StorageObject> {
    document.thumbnail_key.as_ref().map(|key| StorageObject {
        bucket: RENDERS_BUCKET.to_string(),
        key: key.clone(),
        expires_in: RENDER_URL_TTL,
    })
}
