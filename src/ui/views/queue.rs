use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState};

use crate::remote::Mutation;
use crate::sync::{ItemState, SyncItem};
use crate::ui::renderfns::utils::{state_color, truncate};

/// Draw the table of unsynced queue entries
pub fn draw_queue(frame: &mut Frame, area: Rect, items: &[SyncItem<Mutation>], selected: usize) {
  let block = Block::default()
    .borders(Borders::ALL)
    .title(format!(" Pending changes ({}) ", items.len()))
    .border_style(Style::default().fg(Color::DarkGray));

  if items.is_empty() {
    let empty = Paragraph::new("No pending changes")
      .style(Style::default().fg(Color::DarkGray))
      .block(block);
    frame.render_widget(empty, area);
    return;
  }

  let now = Utc::now();
  let header = Row::new(vec!["ID", "TABLE", "OP", "STATE", "TRIES", "LAST ERROR"])
    .style(Style::default().fg(Color::Cyan).bold());

  let rows: Vec<Row> = items
    .iter()
    .map(|item| {
      let state = item.state(now);
      let row = Row::new(vec![
        Cell::from(truncate(&item.id, 28)),
        Cell::from(item.data.table.clone()),
        Cell::from(item.data.kind.to_string()),
        Cell::from(state.to_string()).style(Style::default().fg(state_color(state))),
        Cell::from(item.attempts.to_string()),
        Cell::from(truncate(item.last_error.as_deref().unwrap_or(""), 60)),
      ]);
      if state == ItemState::Quarantined {
        row.style(Style::default().fg(Color::Red))
      } else {
        row
      }
    })
    .collect();

  let widths = [
    Constraint::Length(28),
    Constraint::Length(18),
    Constraint::Length(7),
    Constraint::Length(12),
    Constraint::Length(6),
    Constraint::Min(10),
  ];

  let table = Table::new(rows, widths)
    .header(header)
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).bold())
    .highlight_symbol("▶ ");

  let mut state = TableState::default().with_selected(Some(selected));
  frame.render_stateful_widget(table, area, &mut state);
}
