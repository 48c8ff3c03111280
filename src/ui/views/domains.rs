use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{flag_span, pending_span, truncate};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crate::ui::views::ScheduleListView;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::collections::BTreeSet;
use w9s::hosting::{CachedHostingClient, Domain, HostingQueryKey};
use w9s::mutation::{Mutation, MutationState};
use w9s::query::{Query, QueryState};

/// Every domain of the user, with bulk auto-renew changes
pub struct DomainListView {
  client: CachedHostingClient,
  query: Query<Vec<Domain>>,
  list_state: ListState,
  /// Domains marked with space
  marked: BTreeSet<String>,
  /// The running bulk change and the domains it covers
  bulk: Option<(Mutation<()>, Vec<String>, bool)>,
  notice: Option<Notice>,
}

impl DomainListView {
  pub fn new(client: CachedHostingClient) -> Self {
    let fetch_client = client.clone();
    let mut query = Query::new(move || {
      let client = fetch_client.clone();
      async move { client.domains().await.map_err(|e| e.to_string()) }
    })
    .watching(client.store(), HostingQueryKey::Domains);
    query.fetch();

    Self {
      client,
      query,
      list_state: ListState::default(),
      marked: BTreeSet::new(),
      bulk: None,
      notice: None,
    }
  }

  fn domains(&self) -> &[Domain] {
    self.query.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn selected_name(&self) -> Option<String> {
    self
      .list_state
      .selected()
      .and_then(|idx| self.domains().get(idx))
      .map(|d| d.domain.clone())
  }

  fn toggle_mark(&mut self) {
    if let Some(name) = self.selected_name() {
      if !self.marked.remove(&name) {
        self.marked.insert(name);
      }
    }
  }

  /// Marked domains, or the selected one when nothing is marked
  fn targets(&self) -> Vec<String> {
    if self.marked.is_empty() {
      self.selected_name().into_iter().collect()
    } else {
      self.marked.iter().cloned().collect()
    }
  }

  fn set_auto_renew(&mut self, enabled: bool) {
    if self.bulk.as_ref().is_some_and(|(m, _, _)| m.is_pending()) {
      self.notice = Some(Notice::Error("A bulk change is still saving".to_string()));
      return;
    }
    let targets = self.targets();
    if targets.is_empty() {
      return;
    }

    match self.client.start_set_domains_auto_renew(&targets, enabled) {
      Ok(settle) => {
        self.bulk = Some((Mutation::spawn(settle), targets, enabled));
        self.marked.clear();
      }
      Err(e) => self.notice = Some(Notice::Error(e.to_string())),
    }
  }

  fn poll_bulk(&mut self) {
    let Some((mutation, targets, enabled)) = self.bulk.as_mut() else {
      return;
    };
    if !mutation.poll() {
      return;
    }
    let state = if *enabled { "on" } else { "off" };
    self.notice = Some(match mutation.state() {
      MutationState::RolledBack(e) => Notice::Error(format!("Auto-renew change failed: {}", e)),
      _ => Notice::Info(format!(
        "Auto-renew {} for {} domain(s)",
        state,
        targets.len()
      )),
    });
    self.bulk = None;
  }

  fn is_saving(&self, name: &str) -> bool {
    self
      .bulk
      .as_ref()
      .is_some_and(|(m, targets, _)| m.is_pending() && targets.iter().any(|t| t == name))
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.domains().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = match self.query.state() {
      QueryState::Loading => " Domains (loading...) ".to_string(),
      QueryState::Error(e) => format!(" Domains (error: {}) ", e),
      _ if !self.marked.is_empty() => format!(" Domains ({}, {} marked) ", len, self.marked.len()),
      _ => format!(" Domains ({}) ", len),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.query.is_loading() {
      let content = if self.query.is_error() {
        "Failed to load domains. Press 'r' to retry."
      } else {
        "No domains."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .domains()
      .iter()
      .map(|domain| {
        let mark = if self.marked.contains(&domain.domain) {
          Span::styled("* ", Style::default().fg(Color::Magenta))
        } else {
          Span::raw("  ")
        };
        let site = domain
          .blog_id
          .map(|id| id.to_string())
          .unwrap_or_else(|| "-".to_string());
        let line = Line::from(vec![
          pending_span(self.is_saving(&domain.domain)),
          mark,
          flag_span(domain.auto_renew, "renew", "expire"),
          Span::styled(
            format!("{:<40}", truncate(&domain.domain, 40)),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(format!("{:<12}", site)),
          Span::styled(
            domain.expiry.clone().unwrap_or_default(),
            Style::default().fg(Color::DarkGray),
          ),
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

impl View for DomainListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char(' ') => self.toggle_mark(),
      KeyCode::Char('e') => self.set_auto_renew(true),
      KeyCode::Char('d') => self.set_auto_renew(false),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Enter => {
        // Drill into the schedules of the domain's site
        let site = self
          .list_state
          .selected()
          .and_then(|idx| self.domains().get(idx))
          .and_then(|d| d.blog_id);
        if let Some(site_id) = site {
          return ViewAction::Push(Box::new(ScheduleListView::new(
            site_id,
            self.client.clone(),
          )));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_list(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Domains".to_string()
  }

  fn tick(&mut self) {
    self.query.poll();
    self.poll_bulk();
  }

  fn take_notice(&mut self) -> Option<Notice> {
    self.notice.take()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("space", "mark").with_priority(15),
      ShortcutInfo::new("e/d", "auto-renew on/off").with_priority(16),
      ShortcutInfo::new("enter", "site schedules").with_priority(17),
      ShortcutInfo::new("r", "refresh").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(90),
    ]
  }
}
