use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("control with short number `{0}` already exists")]
    DuplicateShortNumber(String),
    #[error("user `{0}` already exists")]
    DuplicateUsername(String),
    #[error("referenced user or control does not exist")]
    MissingReference,
    #[error("column `{column}` holds an unexpected value `{value}`")]
    InvalidColumn { column: &'static str, value: String },
    #[error("stored json is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Maps constraint failures raised by a write into typed variants.
    pub(crate) fn from_write(error: sqlx::Error, unique: impl FnOnce() -> StorageError) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                return unique();
            }
            if db_error.is_foreign_key_violation() {
                return StorageError::MissingReference;
            }
        }
        StorageError::Database(error)
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
