use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::{Change, Error, Event, EventLog, NewEvent};

/// Event log persisted to SQLite.
pub struct SqliteEventLog {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct EventRow {
  sequence: i64,
  timestamp: DateTime<Utc>,
  entity_id: String,
  change: Json<Change>,
  cause: String,
}

impl From<EventRow> for Event {
  fn from(row: EventRow) -> Self {
    Event {
      sequence: row.sequence as u64,
      timestamp: row.timestamp,
      entity_id: row.entity_id,
      change: row.change.0,
      cause: row.cause,
    }
  }
}

impl SqliteEventLog {
  /// Create a new event log with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl EventLog for SqliteEventLog {
  async fn append(&self, event: NewEvent) -> Result<Event, Error> {
    let result = sqlx::query(
      r#"
            INSERT INTO events (timestamp, entity_id, change, cause)
            VALUES (?, ?, ?, ?)
            "#,
    )
    .bind(event.timestamp)
    .bind(&event.entity_id)
    .bind(Json(&event.change))
    .bind(&event.cause)
    .execute(&self.pool)
    .await?;

    Ok(event.into_event(result.last_insert_rowid() as u64))
  }

  async fn read_after(&self, sequence: u64) -> Result<Vec<Event>, Error> {
    let rows: Vec<EventRow> = sqlx::query_as(
      r#"
            SELECT sequence, timestamp, entity_id, change, cause
            FROM events
            WHERE sequence > ?
            ORDER BY sequence ASC
            "#,
    )
    .bind(sequence as i64)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(Event::from).collect())
  }

  async fn last_sequence(&self) -> Result<u64, Error> {
    let last: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) FROM events")
      .fetch_one(&self.pool)
      .await?;

    Ok(last as u64)
  }
}
