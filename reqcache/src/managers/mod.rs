//! Concrete [`crate::storage::Storage`] implementations beyond the
//! always-available [`crate::storage::MemoryBackend`].

#[cfg(feature = "backend-sqlite")]
pub mod sqlite;

#[cfg(feature = "backend-filesystem")]
pub mod filesystem;
