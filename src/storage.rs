use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::forum::domain::ValidationError;

/// URL prefix under which stored images are served
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// An image file as received from a multipart form
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl ImageUpload {
    /// Browsers send an empty file part when nothing was picked.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn check(&self) -> Result<(), ValidationError> {
        match self.content_type.as_deref() {
            Some(ct) if !ct.starts_with("image/") => {
                Err(ValidationError(format!("Unsupported image type: {}", ct)))
            }
            _ => Ok(()),
        }
    }

    fn extension(&self) -> String {
        // image/jpeg lists jpe before jpeg, so prefer the one naming the subtype
        let from_mime = self.content_type.as_deref().and_then(|ct| {
            let exts = mime_guess::get_mime_extensions_str(ct)?;
            exts.iter()
                .find(|ext| ct.ends_with(**ext))
                .or_else(|| exts.first())
                .map(|ext| ext.to_string())
        });

        let from_name = || {
            self.file_name
                .as_deref()
                .and_then(|name| Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(|ext| ext.to_ascii_lowercase())
        };

        from_mime
            .or_else(from_name)
            .unwrap_or_else(|| "jpg".to_string())
    }
}

/// Images live on disk next to the database and are referenced by path
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the upload under a fresh name and return its public path.
    pub async fn save(&self, upload: ImageUpload) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;

        let file_name = format!("{}.{}", uuid::Uuid::now_v7(), upload.extension());
        tokio::fs::write(self.root.join(&file_name), &upload.data).await?;

        tracing::info!("Stored image {} ({} bytes)", file_name, upload.data.len());
        Ok(format!("{}{}", UPLOADS_PREFIX, file_name))
    }

    /// Map a stored file name to its location, rejecting anything that could
    /// escape the uploads directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.starts_with('.')
            && file_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        valid.then(|| self.root.join(file_name))
    }

    /// Best-effort removal of a previously stored image
    pub async fn remove(&self, public_path: &str) {
        let Some(path) = public_path
            .strip_prefix(UPLOADS_PREFIX)
            .and_then(|name| self.resolve(name))
        else {
            return;
        };

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove image {}: {}", path.display(), e);
        }
    }
}
