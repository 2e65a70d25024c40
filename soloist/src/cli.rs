//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::ipc::ResolutionScheme;

/// Soloist - keep exactly one instance of an application running
#[derive(Debug, Parser)]
#[command(
    name = "soloist",
    about = "Single-instance coordination over a shared-memory segment and a local socket",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Coordination key (overrides the config file)
    #[arg(short, long, global = true)]
    pub key: Option<String>,

    /// Stop the running instance, then exit instead of staying resident
    #[arg(short, long)]
    pub quit: bool,

    /// Announce this version instead of the build version
    #[arg(long = "as-version", hide = true)]
    pub as_version: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Resolution scheme selected by the flags
    pub fn scheme(&self) -> ResolutionScheme {
        if self.quit {
            ResolutionScheme::ThisInstanceWins
        } else {
            ResolutionScheme::HighestVersionWins
        }
    }
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the running instance's version without disturbing it
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_version_based() {
        let cli = Cli::parse_from(["soloist"]);
        assert!(!cli.quit);
        assert_eq!(cli.scheme(), ResolutionScheme::HighestVersionWins);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_quit_flag_selects_takeover() {
        let cli = Cli::parse_from(["soloist", "--quit"]);
        assert_eq!(cli.scheme(), ResolutionScheme::ThisInstanceWins);
    }

    #[test]
    fn test_status_with_global_key() {
        let cli = Cli::parse_from(["soloist", "status", "--key", "demo"]);
        assert!(matches!(cli.command, Some(Command::Status)));
        assert_eq!(cli.key.as_deref(), Some("demo"));
    }

    #[test]
    fn test_hidden_version_override() {
        let cli = Cli::parse_from(["soloist", "--as-version", "9.9.9", "-l", "debug"]);
        assert_eq!(cli.as_version.as_deref(), Some("9.9.9"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
