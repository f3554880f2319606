use thiserror::Error;
use tsplug_core::ModelState;

use crate::dispatcher::DispatchError;
use crate::model::ModelError;
use crate::storage::StorageError;

/// Errors surfaced by [`crate::PluginService`]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad or inconsistent request; nothing was changed
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The model exists but its state does not allow the operation
    #[error("Cannot do inference right now, status is {0}")]
    NotReady(ModelState),

    #[error("{0}")]
    AdmissionRejected(String),

    /// A plugin capability failed
    #[error("{0}")]
    Backend(String),

    #[error("{0}")]
    TransientRemote(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Repository(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ServiceError {
    /// Caused by the request rather than by the service itself
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound(_)
                | Self::NotReady(_)
                | Self::AdmissionRejected(_)
                | Self::Backend(_)
                | Self::TransientRemote(_)
                | Self::Dispatch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
