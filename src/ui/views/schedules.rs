use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{flag_span, pending_span, truncate};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::collections::HashMap;
use w9s::hosting::{CachedHostingClient, HostingQueryKey, Schedule};
use w9s::mutation::{Mutation, MutationState};
use w9s::query::{Query, QueryState};

/// Update schedules of one site; space toggles the selected schedule
pub struct ScheduleListView {
  client: CachedHostingClient,
  site_id: u64,
  query: Query<Vec<Schedule>>,
  list_state: ListState,
  /// In-flight toggles by schedule id
  toggles: HashMap<String, Mutation<Schedule>>,
  notice: Option<Notice>,
}

impl ScheduleListView {
  pub fn new(site_id: u64, client: CachedHostingClient) -> Self {
    let fetch_client = client.clone();
    let mut query = Query::new(move || {
      let client = fetch_client.clone();
      async move { client.schedules(site_id).await.map_err(|e| e.to_string()) }
    })
    .watching(client.store(), HostingQueryKey::UpdateSchedules { site_id });
    query.fetch();

    Self {
      client,
      site_id,
      query,
      list_state: ListState::default(),
      toggles: HashMap::new(),
      notice: None,
    }
  }

  fn schedules(&self) -> &[Schedule] {
    self.query.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn toggle_selected(&mut self) {
    let Some(id) = self
      .list_state
      .selected()
      .and_then(|idx| self.schedules().get(idx))
      .map(|s| s.id.clone())
    else {
      return;
    };

    let mutation = match self.client.start_toggle_schedule(self.site_id, &id) {
      Ok(settle) => Mutation::spawn(settle),
      Err(e) => Mutation::failed(e),
    };
    if let MutationState::RolledBack(e) = mutation.state() {
      self.notice = Some(Notice::Error(e.clone()));
      return;
    }
    self.toggles.insert(id, mutation);
  }

  fn poll_toggles(&mut self) {
    let mut settled = Vec::new();
    for (id, mutation) in self.toggles.iter_mut() {
      if !mutation.poll() {
        continue;
      }
      match mutation.state() {
        MutationState::Committed(schedule) => {
          let verb = if schedule.active { "activated" } else { "paused" };
          self.notice = Some(Notice::Info(format!("Schedule {} {}", schedule.id, verb)));
        }
        MutationState::RolledBack(e) => {
          self.notice = Some(Notice::Error(format!("Toggling {} failed: {}", id, e)));
        }
        _ => {}
      }
      settled.push(id.clone());
    }
    for id in settled {
      self.toggles.remove(&id);
    }
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.schedules().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = match self.query.state() {
      QueryState::Loading => format!(" Schedules [site {}] (loading...) ", self.site_id),
      QueryState::Refetching(_) => format!(" Schedules [site {}] (refreshing...) ", self.site_id),
      QueryState::Error(e) => format!(" Schedules [site {}] (error: {}) ", self.site_id, e),
      _ => format!(" Schedules [site {}] ({}) ", self.site_id, len),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.query.is_loading() {
      let content = if self.query.is_error() {
        "Failed to load schedules. Press 'r' to retry."
      } else {
        "No update schedules."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .schedules()
      .iter()
      .map(|schedule| {
        let pending = self
          .toggles
          .get(&schedule.id)
          .is_some_and(|m| m.is_pending());
        let line = Line::from(vec![
          pending_span(pending),
          flag_span(schedule.active, "active", "paused"),
          Span::styled(
            format!("{:<8}", schedule.interval),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(format!("{:<18}", next_run(schedule.timestamp))),
          Span::raw(format!("{:>3} plugins  ", schedule.plugins.len())),
          Span::styled(truncate(&schedule.id, 24), Style::default().fg(Color::DarkGray)),
        ]);
        ListItem::new(line)
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }
}

fn next_run(timestamp: i64) -> String {
  DateTime::<Utc>::from_timestamp(timestamp, 0)
    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_else(|| "-".to_string())
}

impl View for ScheduleListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char(' ') | KeyCode::Enter => self.toggle_selected(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_list(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    format!("Schedules [{}]", self.site_id)
  }

  fn site_id(&self) -> Option<u64> {
    Some(self.site_id)
  }

  fn tick(&mut self) {
    self.query.poll();
    self.poll_toggles();
  }

  fn take_notice(&mut self) -> Option<Notice> {
    self.notice.take()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("space", "toggle").with_priority(15),
      ShortcutInfo::new("r", "refresh").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(90),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_next_run_formats_utc() {
    assert_eq!(next_run(1_700_000_000), "2023-11-14 22:13");
  }
}
