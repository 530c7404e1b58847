//! Clap derive structures for the `barsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// barsync -- keep BARS stop-bar state in sync with the relay
#[derive(Debug, Parser)]
#[command(
    name = "barsync",
    version,
    about = "Keep BARS stop-bar state in sync with the relay",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "BARSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to one or more airports and print state changes until Ctrl-C
    Watch(WatchArgs),

    /// Print the config file location
    ConfigPath(ConfigPathArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// ICAO codes to connect (defaults to `airports` from the config file)
    pub airports: Vec<String>,

    /// Controller identifier sent with this client's updates
    #[arg(long, env = "BARSYNC_CONTROLLER_ID")]
    pub controller_id: Option<String>,

    /// Relay API key (overrides the config file)
    #[arg(long, env = "BARSYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Relay WebSocket URL (overrides the config file)
    #[arg(long, env = "BARSYNC_RELAY_URL")]
    pub relay_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigPathArgs {
    /// Write a default config file there if none exists
    #[arg(long)]
    pub init: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_watch() {
        let cli = Cli::try_parse_from([
            "barsync",
            "-vv",
            "watch",
            "EGLL",
            "KJFK",
            "--controller-id",
            "ctl-1",
        ])
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(cli.global.verbose, 2);
        let Command::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.airports, vec!["EGLL".to_owned(), "KJFK".to_owned()]);
        assert_eq!(args.controller_id.as_deref(), Some("ctl-1"));
    }
}
