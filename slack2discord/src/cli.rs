use std::{fmt, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

pub const DEFAULT_EXPORT_PATH: &str = "resources";
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Discord bot token
    #[arg(long, env = "DISCORD_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Root directory of the Slack export
    #[arg(long, env = "SLACK_EXPORT_PATH", global = true)]
    pub path: Option<PathBuf>,

    /// Channels to replay, defaults to every directory of the export
    #[arg(long, env = "SLACK_CHANNELS", value_delimiter = ',', global = true)]
    pub channels: Vec<String>,

    /// Discord servers (id or name) to write to, defaults to every server the bot joined
    #[arg(long, env = "DISCORD_SERVERS", value_delimiter = ',', global = true)]
    pub servers: Vec<String>,

    /// Image sent between two replayed messages
    #[arg(long, global = true)]
    pub divider_image: Option<PathBuf>,

    /// Settings file (toml or ini)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Discord REST API base URL
    #[arg(long, env = "DISCORD_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Log every Discord action instead of performing it
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log verbosity
    #[arg(short, long, value_name = "LEVEL", default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replay the export into Discord (default)
    Replay,
    /// Delete every text channel of the selected servers
    Purge {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Replay)
    }

    pub fn export_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_PATH))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_replay() {
        let args = Args::try_parse_from(["slack2discord"]).unwrap();
        assert_eq!(args.command(), Command::Replay);
        assert_eq!(args.export_path(), PathBuf::from("resources"));
        assert_eq!(args.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn parses_comma_separated_lists() {
        let args = Args::try_parse_from([
            "slack2discord",
            "--channels",
            "general,random",
            "--servers",
            "1234",
        ])
        .unwrap();
        assert_eq!(args.channels, vec!["general", "random"]);
        assert_eq!(args.servers, vec!["1234"]);
    }

    #[test]
    fn parses_purge_with_global_options() {
        let args =
            Args::try_parse_from(["slack2discord", "purge", "--yes", "--token", "abc"]).unwrap();
        assert_eq!(args.command(), Command::Purge { yes: true });
        assert_eq!(args.token.as_deref(), Some("abc"));
    }
}
