use ratatui::prelude::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Colored on/off label
pub fn flag_span(on: bool, on_label: &'static str, off_label: &'static str) -> Span<'static> {
  if on {
    Span::styled(format!("{:<8}", on_label), Style::default().fg(Color::Green))
  } else {
    Span::styled(format!("{:<8}", off_label), Style::default().fg(Color::DarkGray))
  }
}

/// Marker for rows whose change has not been confirmed by the server yet
pub fn pending_span(pending: bool) -> Span<'static> {
  if pending {
    Span::styled("~ ", Style::default().fg(Color::Yellow))
  } else {
    Span::raw("  ")
  }
}
