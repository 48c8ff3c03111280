use crate::commands::{self, CommandKind};
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::components::{KeyResult, Prompt, PromptEvent};
use crate::ui::view::{Notice, ShortcutInfo, View, ViewAction};
use crate::ui::views::{DomainListView, ScheduleListView, SiteOwnerView};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tracing::{debug, info};
use w9s::config::Config;
use w9s::hosting::CachedHostingClient;

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  /// `:` command entry
  command: Prompt,

  /// Latest message for the footer
  notice: Option<Notice>,

  config: Config,
  site_id: u64,
  client: CachedHostingClient,

  should_quit: bool,
}

impl App {
  pub fn new(config: Config, site_id: u64) -> Result<Self> {
    let client = CachedHostingClient::new(&config)?;
    let root: Box<dyn View> = Box::new(ScheduleListView::new(site_id, client.clone()));

    Ok(Self {
      view_stack: vec![root],
      command: Prompt::new(":"),
      notice: None,
      config,
      site_id,
      client,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    info!(site_id = self.site_id, "tui started");

    let mut events = EventHandler::new(Duration::from_millis(100));
    let result = self.event_loop(&mut terminal, &mut events).await;

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(Event::Key(key)) => self.handle_key(key),
        Some(Event::Tick) => self.tick(),
        Some(Event::Resize) => {}
        None => break,
      }
    }
    Ok(())
  }

  fn tick(&mut self) {
    // Every view polls, so mutations started in a view behind the
    // current one still settle and report
    for view in self.view_stack.iter_mut() {
      view.tick();
      if let Some(notice) = view.take_notice() {
        self.notice = Some(notice);
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    match self.command.handle_key(key) {
      KeyResult::Event(PromptEvent::Submitted(input)) => {
        self.execute_command(&input);
        return;
      }
      KeyResult::Event(PromptEvent::Cancelled) | KeyResult::Handled => return,
      KeyResult::NotHandled => {}
    }

    let editing = self.current_view().is_some_and(|v| v.is_editing());
    if key.code == KeyCode::Char(':') && !editing {
      self.command.activate();
      return;
    }

    let action = match self.view_stack.last_mut() {
      Some(view) => view.handle_key(key),
      None => ViewAction::None,
    };
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  fn execute_command(&mut self, input: &str) {
    let Some(kind) = commands::resolve(input) else {
      self.notice = Some(Notice::Error(format!("Unknown command: {}", input)));
      return;
    };
    debug!(?kind, "command");

    let root: Box<dyn View> = match kind {
      CommandKind::Schedules => Box::new(ScheduleListView::new(self.site_id, self.client.clone())),
      CommandKind::Domains => Box::new(DomainListView::new(self.client.clone())),
      CommandKind::Owner => Box::new(SiteOwnerView::new(self.site_id, self.client.clone())),
      CommandKind::Quit => {
        self.should_quit = true;
        return;
      }
    };
    self.view_stack.clear();
    self.view_stack.push(root);
  }

  // Accessors for UI rendering
  pub fn current_view(&self) -> Option<&dyn View> {
    self.view_stack.last().map(|v| v.as_ref())
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn command_prompt(&self) -> &Prompt {
    &self.command
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }

  pub fn api_url(&self) -> &str {
    &self.config.api.url
  }

  /// Site of the current view, else the configured one
  pub fn site_id(&self) -> u64 {
    self
      .current_view()
      .and_then(|v| v.site_id())
      .unwrap_or(self.site_id)
  }

  pub fn shortcuts(&self) -> Vec<ShortcutInfo> {
    self
      .current_view()
      .map(|v| v.shortcuts())
      .unwrap_or_default()
  }

  pub fn view_breadcrumb(&self) -> Vec<String> {
    self
      .view_stack
      .iter()
      .map(|v| v.breadcrumb_label())
      .collect()
  }
}
