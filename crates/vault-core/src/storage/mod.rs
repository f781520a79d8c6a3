//! Storage backends for encrypted node records
//!
//! Every backend implements [`StorageDriver`]:
//! 1. SQLite (normalized schema, the default)
//! 2. JSON file (single document, also reads and writes the legacy layout)
//! 3. Memory (volatile, for tests and scratch migrations)
//!
//! Drivers are normally obtained through the [`factory`].

pub mod factory;
mod json_file;
mod memory;
mod sqlite;
mod table;
mod traits;

pub use factory::{create, create_from_config, create_kind, BackendKind, ConnectionParams};
pub use json_file::{JsonFileDriver, SUPPORTED_VERSIONS};
pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;
pub use traits::{StorageDriver, CURRENT_SCHEMA_VERSION};
