use super::KeyResult;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Events a prompt hands back to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
  Submitted(String),
  Cancelled,
}

/// Single-line text entry shown as an overlay at the bottom of a view
#[derive(Debug, Clone, Default)]
pub struct Prompt {
  label: &'static str,
  buffer: String,
  active: bool,
}

impl Prompt {
  pub fn new(label: &'static str) -> Self {
    Self {
      label,
      ..Self::default()
    }
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn value(&self) -> &str {
    &self.buffer
  }

  pub fn activate(&mut self) {
    self.active = true;
    self.buffer.clear();
  }

  /// Handle a key while active. Inactive prompts never consume keys.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<PromptEvent> {
    if !self.active {
      return KeyResult::NotHandled;
    }

    match key.code {
      KeyCode::Esc => {
        self.active = false;
        self.buffer.clear();
        KeyResult::Event(PromptEvent::Cancelled)
      }
      KeyCode::Enter => {
        self.active = false;
        let value = std::mem::take(&mut self.buffer);
        KeyResult::Event(PromptEvent::Submitted(value.trim().to_string()))
      }
      KeyCode::Backspace => {
        self.buffer.pop();
        KeyResult::Handled
      }
      KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.buffer.clear();
        KeyResult::Handled
      }
      KeyCode::Char(c) => {
        self.buffer.push(c);
        KeyResult::Handled
      }
      _ => KeyResult::Handled,
    }
  }

  /// Render the prompt over the last three rows of `area`
  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active || area.height < 3 {
      return;
    }
    let rect = Rect {
      x: area.x,
      y: area.y + area.height - 3,
      width: area.width,
      height: 3,
    };
    let line = Line::from(vec![
      Span::styled(format!("{} ", self.label), Style::default().fg(Color::Yellow)),
      Span::raw(self.buffer.as_str()),
      Span::styled("_", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).block(
      Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow)),
    );
    frame.render_widget(Clear, rect);
    frame.render_widget(paragraph, rect);
  }
}
