pub mod memory_store;
pub mod postgres_store;

pub use memory_store::{MemoryTranscriptStore, StoreFailure};
pub use postgres_store::PostgresTranscriptStore;
