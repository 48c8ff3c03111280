use crate::ui::components::{KeyResult, Prompt, PromptEvent};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use w9s::hosting::{CachedHostingClient, HostingQueryKey, SiteOwner, TransferResponse};
use w9s::mutation::{Mutation, MutationState};
use w9s::query::{Query, QueryState};

/// Site owner, with owner transfer
pub struct SiteOwnerView {
  client: CachedHostingClient,
  site_id: u64,
  query: Query<SiteOwner>,
  prompt: Prompt,
  transfer: Mutation<TransferResponse>,
  notice: Option<Notice>,
}

impl SiteOwnerView {
  pub fn new(site_id: u64, client: CachedHostingClient) -> Self {
    let fetch_client = client.clone();
    let mut query = Query::new(move || {
      let client = fetch_client.clone();
      async move { client.site_owner(site_id).await.map_err(|e| e.to_string()) }
    })
    .watching(client.store(), HostingQueryKey::SiteOwner { site_id });
    query.fetch();

    Self {
      client,
      site_id,
      query,
      prompt: Prompt::new("Transfer to (email):"),
      transfer: Mutation::idle(),
      notice: None,
    }
  }

  fn start_transfer(&mut self, email: &str) {
    if self.transfer.is_pending() {
      self.notice = Some(Notice::Error("A transfer is already in progress".to_string()));
      return;
    }
    match self.client.start_transfer_site_owner(self.site_id, email) {
      Ok(settle) => self.transfer = Mutation::spawn(settle),
      Err(e) => self.notice = Some(Notice::Error(e.to_string())),
    }
  }

  fn details(&self) -> Vec<Line<'static>> {
    let Some(owner) = self.query.data() else {
      return vec![];
    };
    let label = |text: &'static str| {
      Span::styled(format!("{:<16}", text), Style::default().fg(Color::DarkGray))
    };

    let mut lines = vec![
      Line::from(vec![label("Name"), Span::raw(owner.display_name.clone())]),
      Line::from(vec![label("Login"), Span::raw(owner.login.clone())]),
      Line::from(vec![label("Email"), Span::raw(owner.email.clone())]),
      Line::from(vec![label("User ID"), Span::raw(owner.id.to_string())]),
    ];
    if let Some(to) = &owner.pending_transfer_to {
      let status = if self.transfer.is_pending() {
        "sending..."
      } else {
        "awaiting confirmation"
      };
      lines.push(Line::from(vec![
        label("Transfer"),
        Span::styled(
          format!("{} ({})", to, status),
          Style::default().fg(Color::Yellow),
        ),
      ]));
    }
    lines
  }
}

impl View for SiteOwnerView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.prompt.handle_key(key) {
      KeyResult::Event(PromptEvent::Submitted(email)) => {
        self.start_transfer(&email);
        return ViewAction::None;
      }
      KeyResult::Event(PromptEvent::Cancelled) | KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('t') => self.prompt.activate(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let title = match self.query.state() {
      QueryState::Loading => format!(" Owner [site {}] (loading...) ", self.site_id),
      QueryState::Error(e) => format!(" Owner [site {}] (error: {}) ", self.site_id, e),
      _ => format!(" Owner [site {}] ", self.site_id),
    };
    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    frame.render_widget(Paragraph::new(self.details()).block(block), area);
    self.prompt.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Owner".to_string()
  }

  fn site_id(&self) -> Option<u64> {
    Some(self.site_id)
  }

  fn tick(&mut self) {
    self.query.poll();
    if self.transfer.poll() {
      self.notice = match self.transfer.state() {
        MutationState::Committed(response) if response.email_sent => Some(Notice::Info(
          "Transfer started, confirmation email sent".to_string(),
        )),
        MutationState::Committed(_) => Some(Notice::Info("Transfer started".to_string())),
        MutationState::RolledBack(e) => Some(Notice::Error(format!("Transfer failed: {}", e))),
        _ => None,
      };
    }
  }

  fn is_editing(&self) -> bool {
    self.prompt.is_active()
  }

  fn take_notice(&mut self) -> Option<Notice> {
    self.notice.take()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("t", "transfer").with_priority(15),
      ShortcutInfo::new("r", "refresh").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(90),
    ]
  }
}
