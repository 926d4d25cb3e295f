use thiserror::Error;

use crate::DataType;

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("migration failed: {message}")]
    Migration { message: String },
    #[error("out of range: {message}")]
    OutOfRange { message: String },
    #[error("failed to deserialize {value:?} (type: {data_type})")]
    Deserialize { value: String, data_type: String },
}

impl RdbError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    pub fn deserialize(value: impl Into<String>, data_type: &DataType) -> Self {
        Self::Deserialize {
            value: value.into(),
            data_type: data_type.code().to_string(),
        }
    }
}

pub type RdbResult<T> = Result<T, RdbError>;

impl From<sea_orm::DbErr> for RdbError {
    fn from(value: sea_orm::DbErr) -> Self {
        RdbError::storage(value.to_string())
    }
}
