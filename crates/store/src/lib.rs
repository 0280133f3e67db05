//! Secure key-value backends for persisting credentials.
//!
//! Provides an in-memory store for testing and a SQLite-backed store for
//! production. Both scope every key to a fixed service identifier.

pub mod memory;
pub mod sqlite;

pub use memory::InMemorySecureStore;
pub use sqlite::SqliteSecureStore;
