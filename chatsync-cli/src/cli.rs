//! Command-Line Interface and Logging
//!
//! Argument parsing for the `chatsync` binary and the tracing subscriber
//! setup driven by its flags. Logs go to stderr so command output on stdout
//! stays clean.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// chatsync command-line interface
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(about = "Two-party chat client with a live chat list", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub timestamps: bool,

    /// Config file (default: <config dir>/chatsync/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data file, overriding the one in the config
    #[arg(long, value_name = "FILE")]
    pub data_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Account to act as
#[derive(Args, Debug, Clone)]
pub struct Credentials {
    /// Account email
    #[arg(long)]
    pub email: String,

    /// Account password
    #[arg(long)]
    pub password: String,
}

/// chatsync commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and its profile
    Register {
        #[command(flatten)]
        credentials: Credentials,

        /// Username shown to other users
        #[arg(long)]
        username: String,
    },

    /// Show the signed-in user's profile
    Whoami {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Print the chat list, most recent first
    Chats {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Keep the chat list on screen, reprinting it on every change
    Watch {
        #[command(flatten)]
        credentials: Credentials,

        /// Stop after this many updates (default: until Ctrl-C)
        #[arg(long)]
        updates: Option<usize>,
    },

    /// Find users by username or email
    Search {
        #[command(flatten)]
        credentials: Credentials,

        /// Text to look for
        query: String,
    },

    /// Open (or create) the chat with another user and print its ID
    Open {
        #[command(flatten)]
        credentials: Credentials,

        /// Username of the other participant
        username: String,
    },

    /// Send a message to a chat
    Send {
        #[command(flatten)]
        credentials: Credentials,

        /// Chat ID (see `open`)
        chat_id: String,

        /// Message text
        text: String,
    },

    /// Print the messages of a chat, oldest first
    Messages {
        #[command(flatten)]
        credentials: Credentials,

        /// Chat ID (see `open`)
        chat_id: String,
    },

    /// Show the configuration in use
    Config,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    debug!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "chatsync",
            "--log-level",
            "debug",
            "send",
            "--email",
            "ann@example.com",
            "--password",
            "secret1",
            "c1",
            "hello there",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert!(cli.timestamps);
        match cli.command {
            Command::Send {
                credentials,
                chat_id,
                text,
            } => {
                assert_eq!(credentials.email, "ann@example.com");
                assert_eq!(chat_id, "c1");
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_options() {
        let cli = Cli::try_parse_from([
            "chatsync",
            "--timestamps",
            "false",
            "--data-file",
            "/tmp/chat.json",
            "config",
        ])
        .unwrap();

        assert!(!cli.timestamps);
        assert_eq!(cli.data_file, Some(PathBuf::from("/tmp/chat.json")));
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn test_register_requires_username() {
        let result = Cli::try_parse_from([
            "chatsync",
            "register",
            "--email",
            "ann@example.com",
            "--password",
            "secret1",
        ]);
        assert!(result.is_err());
    }
}
