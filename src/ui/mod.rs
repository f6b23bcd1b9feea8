mod renderfns;
mod views;

use crate::app::App;
use ratatui::prelude::*;

pub use renderfns::utils::format_age;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Queue table
      Constraint::Length(2), // Footer
    ])
    .split(frame.area());

  renderfns::draw_header(frame, chunks[0], app.title(), app.status());
  views::queue::draw_queue(frame, chunks[1], app.items(), app.selected());
  renderfns::draw_footer(frame, chunks[2], app);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app::tests::test_app;
  use ratatui::backend::TestBackend;

  fn render(app: &App) -> String {
    let mut terminal = Terminal::new(TestBackend::new(100, 12)).unwrap();
    terminal.draw(|frame| draw(frame, app)).unwrap();
    terminal
      .backend()
      .buffer()
      .content()
      .iter()
      .map(|cell| cell.symbol())
      .collect()
  }

  #[test]
  fn test_draw_empty_queue() {
    let app = test_app();
    let screen = render(&app);
    assert!(screen.contains("MV Test"));
    assert!(screen.contains("Offline"));
    assert!(screen.contains("No pending changes"));
  }
}
