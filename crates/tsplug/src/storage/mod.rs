pub mod cache;
pub mod error;
pub mod local;
pub mod traits;

pub use cache::ArtifactCache;
pub use error::{StorageError, StorageResult};
pub use local::LocalArtifactStore;
pub use traits::{ArtifactKey, ArtifactStore};
