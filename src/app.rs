use crate::cache::{CacheManager, INVENTORY_KEY, PRICING_KEY};
use crate::event::{Event, EventHandler};
use crate::remote::Mutation;
use crate::store::KvStore;
use crate::sync::{SyncItem, SyncStatus};
use crate::ui;
use crate::Orchestrator;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Age of one cached snapshot, for the footer
#[derive(Debug, Clone, PartialEq)]
pub struct CacheAge {
  pub label: &'static str,
  pub cached_at: Option<DateTime<Utc>>,
  pub stale: bool,
}

/// Status screen state
pub struct App {
  /// Vessel name or backend host
  title: String,

  orchestrator: Arc<Orchestrator>,

  cache: Arc<CacheManager<dyn KvStore>>,

  /// Last status published by the orchestrator
  status: SyncStatus,

  /// Unsynced queue entries, refreshed on every tick
  items: Vec<SyncItem<Mutation>>,

  selected: usize,

  cache_ages: Vec<CacheAge>,

  /// One-line feedback shown in the footer
  message: Option<String>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(
    title: String,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<CacheManager<dyn KvStore>>,
  ) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    let status = orchestrator.status();

    let mut app = Self {
      title,
      orchestrator,
      cache,
      status,
      items: Vec::new(),
      selected: 0,
      cache_ages: Vec::new(),
      message: None,
      event_tx: tx,
      should_quit: false,
    };
    app.refresh();
    app
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    events.watch_status(self.orchestrator.subscribe());
    self.event_tx = events.sender();

    let result = self.event_loop(&mut terminal, &mut events).await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {
        self.orchestrator.reload();
        self.refresh();
      }
      Event::Status(status) => {
        self.status = status;
        self.refresh();
      }
      Event::Synced(count) => {
        self.message = Some(format!("Synced {} change(s)", count));
        self.refresh();
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('j') | KeyCode::Down => {
        if self.selected + 1 < self.items.len() {
          self.selected += 1;
        }
      }
      KeyCode::Char('k') | KeyCode::Up => {
        self.selected = self.selected.saturating_sub(1);
      }
      KeyCode::Char('s') => self.trigger_sync(),
      KeyCode::Char('r') => self.requeue_selected(),
      _ => {}
    }
  }

  fn trigger_sync(&mut self) {
    if !self.status.online {
      self.message = Some("Offline, changes will sync when the connection returns".to_string());
      return;
    }

    let orchestrator = self.orchestrator.clone();
    let tx = self.event_tx.clone();
    self.message = Some("Syncing...".to_string());
    tokio::spawn(async move {
      let count = orchestrator.sync_now().await;
      let _ = tx.send(Event::Synced(count));
    });
  }

  fn requeue_selected(&mut self) {
    let Some(item) = self.items.get(self.selected) else {
      return;
    };
    let id = item.id.clone();
    self.message = Some(if self.orchestrator.requeue(&id) {
      format!("Requeued {}", id)
    } else {
      format!("{} is not quarantined", id)
    });
    self.refresh();
  }

  /// Reload queue entries and cache ages.
  pub fn refresh(&mut self) {
    self.items = self.orchestrator.pending_items();
    if self.selected >= self.items.len() {
      self.selected = self.items.len().saturating_sub(1);
    }

    self.cache_ages = [("inventory", INVENTORY_KEY), ("pricing", PRICING_KEY)]
      .into_iter()
      .map(|(label, key)| {
        let cached_at = self.cache.cached_at(key);
        CacheAge {
          label,
          cached_at,
          stale: cached_at.is_some_and(|at| self.cache.is_stale(at)),
        }
      })
      .collect();
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn status(&self) -> &SyncStatus {
    &self.status
  }

  pub fn items(&self) -> &[SyncItem<Mutation>] {
    &self.items
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn cache_ages(&self) -> &[CacheAge] {
    &self.cache_ages
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }
}
