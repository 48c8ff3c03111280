mod app;
mod commands;
mod event;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use w9s::config::Config;
use w9s::hosting::{CachedHostingClient, Domain, Schedule};
use w9s::logging::{self, LogTarget};

#[derive(Parser, Debug)]
#[command(name = "w9s")]
#[command(about = "A terminal client for WordPress.com-style hosting, with optimistic updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/w9s/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Site ID to operate on (default: default_site from config)
  #[arg(short, long, global = true)]
  site: Option<u64>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Interactive terminal UI (default)
  Tui,
  /// List update schedules of the site
  Schedules,
  /// Activate or pause an update schedule
  Toggle { schedule_id: String },
  /// Start transferring the site to another user
  TransferOwner { email: String },
  /// List all domains
  Domains,
  /// Turn auto-renew on or off for domains
  AutoRenew {
    state: Switch,
    #[arg(required = true)]
    domains: Vec<String>,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
  On,
  Off,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let command = args.command.unwrap_or(Cmd::Tui);

  let target = match command {
    Cmd::Tui => LogTarget::File,
    _ => LogTarget::Stderr,
  };
  let _guard = logging::init(&config.log, target)?;

  match command {
    Cmd::Tui => {
      let site_id = config.site(args.site)?;
      let mut app = app::App::new(config, site_id)?;
      app.run().await?;
    }
    Cmd::Schedules => {
      let site_id = config.site(args.site)?;
      let client = CachedHostingClient::new(&config)?;
      print_schedules(&client.schedules(site_id).await?);
    }
    Cmd::Toggle { schedule_id } => {
      let site_id = config.site(args.site)?;
      let client = CachedHostingClient::new(&config)?;
      let schedule = client.toggle_schedule_active(site_id, &schedule_id).await?;
      println!(
        "{} is now {}",
        schedule.id,
        if schedule.active { "active" } else { "paused" }
      );
    }
    Cmd::TransferOwner { email } => {
      let site_id = config.site(args.site)?;
      let client = CachedHostingClient::new(&config)?;
      let response = client.transfer_site_owner(site_id, &email).await?;
      if response.email_sent {
        println!("Transfer to {} started; a confirmation email was sent", email);
      } else {
        println!("Transfer to {} started", email);
      }
    }
    Cmd::Domains => {
      let client = CachedHostingClient::new(&config)?;
      let domains = match args.site {
        Some(site_id) => client.site_domains(site_id).await?,
        None => client.domains().await?,
      };
      print_domains(&domains);
    }
    Cmd::AutoRenew { state, domains } => {
      let client = CachedHostingClient::new(&config)?;
      // Load the list so the per-site caches get the change too
      client.domains().await?;
      let enabled = matches!(state, Switch::On);
      client.set_domains_auto_renew(&domains, enabled).await?;
      println!(
        "Auto-renew {} for {} domain(s)",
        if enabled { "on" } else { "off" },
        domains.len()
      );
    }
  }

  Ok(())
}

fn print_schedules(schedules: &[Schedule]) {
  for s in schedules {
    println!(
      "{:<24} {:<7} {:<7} {:>3} plugins",
      s.id,
      if s.active { "active" } else { "paused" },
      s.interval,
      s.plugins.len()
    );
  }
}

fn print_domains(domains: &[Domain]) {
  for d in domains {
    println!(
      "{:<40} {:<7} {}",
      d.domain,
      if d.auto_renew { "renew" } else { "expire" },
      d.expiry.as_deref().unwrap_or("-")
    );
  }
}
