use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// SQLSTATE for unique_violation.
pub const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for foreign_key_violation.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("duplicate key value violates unique constraint \"{constraint}\"")]
    UniqueViolation { constraint: &'static str },

    #[error("insert or update violates foreign key constraint \"{constraint}\"")]
    ForeignKeyViolation { constraint: &'static str },
}

impl StorageError {
    /// Stable SQLSTATE-style code identifying the violation class.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::UniqueViolation { .. } => UNIQUE_VIOLATION,
            StorageError::ForeignKeyViolation { .. } => FOREIGN_KEY_VIOLATION,
        }
    }

    pub fn constraint(&self) -> &'static str {
        match self {
            StorageError::UniqueViolation { constraint }
            | StorageError::ForeignKeyViolation { constraint } => constraint,
        }
    }
}
