//! Durable persistence for Switchyard.
//!
//! The orchestration core only talks to the [`DurableStore`] trait. Two backends ship
//! with the crate: [`InMemoryStore`] for tests and single-process runs, and
//! [`FileStore`], which keeps JSON records and JSONL logs under a data directory.

/// File-backed store.
pub mod file;
/// In-memory store.
pub mod memory;
/// The store trait.
pub mod store;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::DurableStore;
