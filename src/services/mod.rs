//! Data service backends

pub mod memory_store;
pub mod postgrest;

pub use memory_store::MemoryStore;
pub use postgrest::PostgrestClient;
