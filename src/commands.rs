/// `:` commands of the TUI and their autocomplete

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
  Schedules,
  Domains,
  Owner,
  Quit,
}

#[derive(Debug, Clone)]
pub struct Command {
  pub kind: CommandKind,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    kind: CommandKind::Schedules,
    name: "schedules",
    aliases: &["s", "updates"],
    description: "Plugin update schedules of the site",
  },
  Command {
    kind: CommandKind::Domains,
    name: "domains",
    aliases: &["d", "dom"],
    description: "All domains, with auto-renew",
  },
  Command {
    kind: CommandKind::Owner,
    name: "owner",
    aliases: &["o", "transfer"],
    description: "Site owner and owner transfer",
  },
  Command {
    kind: CommandKind::Quit,
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit w9s",
  },
];

/// How well `input` matches a command; lower is better
fn rank(cmd: &Command, input: &str) -> Option<u32> {
  let aliases = || cmd.aliases.iter();
  if cmd.name == input {
    Some(0)
  } else if aliases().any(|a| *a == input) {
    Some(1)
  } else if cmd.name.starts_with(input) {
    Some(2)
  } else if aliases().any(|a| a.starts_with(input)) {
    Some(3)
  } else if cmd.name.contains(input) || aliases().any(|a| a.contains(input)) {
    Some(4)
  } else {
    None
  }
}

/// Commands matching `input`, best first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input = input.trim().to_lowercase();
  let mut matches: Vec<(&'static Command, u32)> = COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd, &input).map(|r| (cmd, r)))
    .collect();
  matches.sort_by_key(|(_, r)| *r);
  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve typed input to a command, if anything matches
pub fn resolve(input: &str) -> Option<CommandKind> {
  if input.trim().is_empty() {
    return None;
  }
  get_suggestions(input).first().map(|cmd| cmd.kind)
}
