use ratatui::prelude::Color;

use crate::sync::ItemState;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for a queue entry state
pub fn state_color(state: ItemState) -> Color {
  match state {
    ItemState::Synced => Color::Green,
    ItemState::Pending => Color::White,
    ItemState::Waiting => Color::Yellow,
    ItemState::Quarantined => Color::Red,
  }
}

/// Coarse human age, e.g. "just now", "5m ago", "3h ago", "2d ago"
pub fn format_age(age: chrono::Duration) -> String {
  if age < chrono::Duration::minutes(1) {
    "just now".to_string()
  } else if age < chrono::Duration::hours(1) {
    format!("{}m ago", age.num_minutes())
  } else if age < chrono::Duration::days(1) {
    format!("{}h ago", age.num_hours())
  } else {
    format!("{}d ago", age.num_days())
  }
}
