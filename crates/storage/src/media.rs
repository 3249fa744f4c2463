use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Every attachment is stored below this prefix of the media root.
pub const UPLOAD_PREFIX: &str = "control_files";
pub const MAX_FILENAME_BYTES: usize = 180;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid filename: {0}")]
    InvalidFilename(&'static str),
    #[error("path `{0}` is outside the upload prefix")]
    InvalidPath(String),
    #[error("stored file `{0}` is missing")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Backend that holds attachment bytes. Paths handed out by `save` are
/// relative and always start with [`UPLOAD_PREFIX`].
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, MediaError>;
    async fn open(&self, path: &str) -> Result<Vec<u8>, MediaError>;
    async fn delete(&self, path: &str) -> Result<(), MediaError>;
}

pub fn validate_filename(raw: &str) -> Result<&str, MediaError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(MediaError::InvalidFilename("filename cannot be empty"));
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(MediaError::InvalidFilename("filename is too long"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(MediaError::InvalidFilename(
            "filename must not contain path separators",
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(MediaError::InvalidFilename(
            "filename must not contain control characters",
        ));
    }
    if name.contains(['"', ';']) {
        return Err(MediaError::InvalidFilename(
            "filename must not contain quotes or semicolons",
        ));
    }
    if name == "." || name == ".." {
        return Err(MediaError::InvalidFilename("filename is reserved"));
    }
    Ok(name)
}

#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, MediaError> {
        let stored_name = path
            .strip_prefix(UPLOAD_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| MediaError::InvalidPath(path.to_string()))?;
        if stored_name.is_empty()
            || stored_name.contains(['/', '\\'])
            || stored_name == "."
            || stored_name == ".."
        {
            return Err(MediaError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(UPLOAD_PREFIX).join(stored_name))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, MediaError> {
        let name = validate_filename(filename)?;
        let relative = format!("{UPLOAD_PREFIX}/{}_{name}", Uuid::new_v4().simple());
        let full_path = self.resolve(&relative)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, bytes).await?;
        Ok(relative)
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(MediaError::NotFound(path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), MediaError> {
        let full_path = self.resolve(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
