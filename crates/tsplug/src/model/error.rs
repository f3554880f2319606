use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid model record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Transition(#[from] tsplug_core::CoreError),

    #[error("Update rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
