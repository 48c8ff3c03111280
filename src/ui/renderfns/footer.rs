use crate::ui::view::Notice;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the footer bar: view breadcrumb, then the latest notice
pub fn draw_footer(frame: &mut Frame, area: Rect, breadcrumb: &[String], notice: Option<&Notice>) {
  let mut spans = vec![Span::raw(" ")];

  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }

    let style = if i == breadcrumb.len() - 1 {
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };

    spans.push(Span::styled(part.clone(), style));
  }

  match notice {
    Some(Notice::Info(text)) => {
      spans.push(Span::styled("  │ ", Style::default().fg(Color::DarkGray)));
      spans.push(Span::styled(text.clone(), Style::default().fg(Color::Green)));
    }
    Some(Notice::Error(text)) => {
      spans.push(Span::styled("  │ ", Style::default().fg(Color::DarkGray)));
      spans.push(Span::styled(text.clone(), Style::default().fg(Color::Red).bold()));
    }
    None => {}
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
