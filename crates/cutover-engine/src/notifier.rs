//! Event notifiers for observability.
//!
//! Every event appended to the audit log is handed to the notifier after it
//! is durable, so consumers can stream progress to a UI or a chat channel.

use cutover_store::Event;
use tokio::sync::mpsc;

/// Receives each appended audit event.
///
/// Implementations must not block; the orchestrator calls `notify` inline.
pub trait Notifier: Send + Sync {
  fn notify(&self, event: Event);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
  fn notify(&self, _event: Event) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a cutover.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<Event>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
    Self { sender }
  }
}

impl Notifier for ChannelNotifier {
  fn notify(&self, event: Event) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
