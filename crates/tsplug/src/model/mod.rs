pub mod error;
pub mod in_memory_repository;
pub mod postgres_repository;
pub mod record;
pub mod repository;

pub use error::{ModelError, Result};
pub use in_memory_repository::InMemoryModelRepository;
pub use postgres_repository::PostgresModelRepository;
pub use record::{ModelRecord, ModelSummary};
pub use repository::{ModelRepository, RecordMutation};
