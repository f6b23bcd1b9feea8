use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::sync::SyncStatus;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  /// Orchestrator status changed
  Status(SyncStatus),
  /// A manually triggered pass finished
  Synced(usize),
}

/// Event handler that produces events from terminal input, a tick timer and
/// orchestrator status changes
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    // crossterm polling blocks, keep it off the async workers
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if input_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if input_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Forward every change of `status` as an [`Event::Status`].
  pub fn watch_status(&self, mut status: watch::Receiver<SyncStatus>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if tx.send(Event::Status(current)).is_err() {
          break;
        }
      }
    });
  }

  /// Sender for background tasks reporting back to the UI
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
