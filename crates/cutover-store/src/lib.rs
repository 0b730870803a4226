//! Cutover Store
//!
//! The append-only audit log. Every attempted transition is written here
//! before it is reflected anywhere else, which makes the log the only source
//! of truth for resuming an interrupted migration.
//!
//! The [`EventLog`] trait defines:
//! - Appending an event, which assigns the next sequence number
//! - Reading every event after a sequence number
//! - Reading the last assigned sequence number

mod event;
mod memory;
mod sqlite;

pub use event::{Change, Event, NewEvent};
pub use memory::MemoryEventLog;
pub use sqlite::SqliteEventLog;

use async_trait::async_trait;

/// Error type for audit log operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running the embedded migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// An event could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The log refused the write.
  #[error("event log unavailable: {0}")]
  Unavailable(String),
}

/// Append-only event storage.
#[async_trait]
pub trait EventLog: Send + Sync {
  /// Append an event, assigning it the next sequence number (starting at 1).
  async fn append(&self, event: NewEvent) -> Result<Event, Error>;

  /// Every event with a sequence greater than `sequence`, in order.
  async fn read_after(&self, sequence: u64) -> Result<Vec<Event>, Error>;

  /// The highest assigned sequence, or 0 for an empty log.
  async fn last_sequence(&self) -> Result<u64, Error>;
}
