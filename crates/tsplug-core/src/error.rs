//! Error types for tsplug-core

use thiserror::Error;

use crate::ModelState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ModelState, to: ModelState },

    #[error("Invalid time: {0}")]
    InvalidTime(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
