use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::sync::SyncStatus;

/// Draw the header bar with title, connectivity and sync badge
pub fn draw_header(frame: &mut Frame, area: Rect, title: &str, status: &SyncStatus) {
  let (dot, dot_style) = if status.online {
    ("● Online", Style::default().fg(Color::Green))
  } else {
    ("○ Offline", Style::default().fg(Color::Red))
  };

  let badge_style = if status.quarantined > 0 {
    Style::default().fg(Color::Red).bold()
  } else if status.pending > 0 {
    Style::default().fg(Color::Yellow).bold()
  } else {
    Style::default().fg(Color::Green)
  };

  let mut spans = vec![
    Span::styled(" galley ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", dot), dot_style),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", status.badge()), badge_style),
  ];
  if status.quarantined > 0 {
    spans.push(Span::styled(
      format!("({} need attention) ", status.quarantined),
      Style::default().fg(Color::Red),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}
