//! Persistence collaborators for the three reservation collections.
//!
//! The engine only talks to [`ReservationStore`]; adapters are picked at the
//! boundary (see `config::StoreKind`).

mod csv_file;
mod journal;
mod memory;

pub use csv_file::CsvStore;
pub use journal::JournalStore;
pub use memory::InMemoryStore;

use std::sync::Mutex;

use async_trait::async_trait;
use ulid::{Generator, Ulid};

use crate::model::{BlockedRange, Stay};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Mint an id for a new record. Ids are never handed out twice.
    fn next_id(&self) -> Ulid;

    async fn list_confirmed(&self) -> Result<Vec<Stay>, StoreError>;
    async fn list_pending(&self) -> Result<Vec<Stay>, StoreError>;
    async fn list_blocked(&self) -> Result<Vec<BlockedRange>, StoreError>;

    async fn append_confirmed(&self, stay: Stay) -> Result<(), StoreError>;
    async fn append_pending(&self, stay: Stay) -> Result<(), StoreError>;
    async fn append_blocked(&self, range: BlockedRange) -> Result<(), StoreError>;

    /// Returns `false` if no pending record had this id.
    async fn remove_pending(&self, id: Ulid) -> Result<bool, StoreError>;
    /// Returns `false` if no confirmed record had this id.
    async fn remove_confirmed(&self, id: Ulid) -> Result<bool, StoreError>;
    /// Returns `false` if no blocked range had this id.
    async fn remove_blocked(&self, id: Ulid) -> Result<bool, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Monotonic ULID source. Ids minted in the same millisecond still sort in
/// creation order.
pub(crate) struct IdMint {
    generator: Mutex<Generator>,
}

impl IdMint {
    pub(crate) fn new() -> Self {
        Self {
            generator: Mutex::new(Generator::new()),
        }
    }

    pub(crate) fn next(&self) -> Ulid {
        match self.generator.lock() {
            Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        }
    }
}
