//! Key-value storage for `cardkeep`.
//!
//! The [`StorageBackend`] trait is a plain ordered key-value interface. The
//! world-info entry history in `cardkeep-core` is its only consumer: history
//! records are small JSON blobs keyed so that a prefix scan returns one
//! entry's versions oldest first.
//!
//! Two implementations are provided:
//!
//! - [`RedbBackend`]: persistent, pure Rust (feature `redb-backend`, on by default)
//! - [`MemoryBackend`]: in-memory, for tests and throwaway instances

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// An ordered key-value store shared across async tasks.
///
/// Keys are UTF-8 strings using `/` as a separator
/// (e.g. `wi_history/<scope>/<uid>/<seq>`). Values are opaque bytes.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key. `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys starting with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
