use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::utils::format_age;
use crate::app::App;

/// Draw the footer: cache ages and warnings, then key hints
pub fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
  let now = Utc::now();
  let mut spans = vec![Span::raw(" ")];

  for (i, age) in app.cache_ages().iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
    }
    spans.push(Span::styled(
      format!("{}: ", age.label),
      Style::default().fg(Color::White),
    ));
    match age.cached_at {
      Some(at) => {
        let style = if age.stale {
          Style::default().fg(Color::Yellow)
        } else {
          Style::default().fg(Color::Green)
        };
        let suffix = if age.stale { " (stale)" } else { "" };
        spans.push(Span::styled(
          format!("cached {}{}", format_age(now - at), suffix),
          style,
        ));
      }
      None => spans.push(Span::styled("not cached", Style::default().fg(Color::DarkGray))),
    }
  }

  if app.status().memory_only {
    spans.push(Span::styled(
      "  ⚠ storage unavailable, changes will not survive a restart",
      Style::default().fg(Color::Red).bold(),
    ));
  }

  let hint = match app.message() {
    Some(message) => Line::from(Span::styled(
      format!(" {}", message),
      Style::default().fg(Color::Cyan),
    )),
    None => Line::from(Span::styled(
      " s:sync  r:requeue  j/k:nav  q:quit",
      Style::default().fg(Color::DarkGray),
    )),
  };

  let paragraph =
    Paragraph::new(vec![Line::from(spans), hint]).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}
