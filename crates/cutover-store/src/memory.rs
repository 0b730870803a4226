use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Error, Event, EventLog, NewEvent};

/// In-process event log. Lost on restart; used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
  events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed a log with events, e.g. a copy of another log's contents.
  pub fn with_events(events: Vec<Event>) -> Self {
    Self {
      events: Mutex::new(events),
    }
  }

  pub async fn events(&self) -> Vec<Event> {
    self.events.lock().await.clone()
  }
}

#[async_trait]
impl EventLog for MemoryEventLog {
  async fn append(&self, event: NewEvent) -> Result<Event, Error> {
    let mut events = self.events.lock().await;
    let sequence = events.last().map_or(0, |e| e.sequence) + 1;
    let event = event.into_event(sequence);
    events.push(event.clone());
    Ok(event)
  }

  async fn read_after(&self, sequence: u64) -> Result<Vec<Event>, Error> {
    let events = self.events.lock().await;
    Ok(
      events
        .iter()
        .filter(|e| e.sequence > sequence)
        .cloned()
        .collect(),
    )
  }

  async fn last_sequence(&self) -> Result<u64, Error> {
    Ok(self.events.lock().await.last().map_or(0, |e| e.sequence))
  }
}
