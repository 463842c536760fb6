use clap::{Parser, Subcommand};

/// Join a collaborative listening session from the terminal.
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
pub struct Args {
    /// Coordination server WebSocket URL. Overrides the config file.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Session to join.
    #[arg(short, long)]
    pub session: String,

    /// Join as the host. The role cannot change after joining.
    #[arg(long)]
    pub host: bool,

    /// Stable user id. A fresh one is generated when omitted.
    #[arg(long)]
    pub user_id: Option<String>,

    /// Config file path override.
    #[arg(long)]
    pub config: Option<String>,

    /// Log level override (debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print roster and queue changes until Ctrl-C.
    Watch,
    /// Propose a track for the shared queue.
    Add {
        /// "spotify" or "youtube".
        source: String,
        uri: String,
        title: String,
        artist: String,
    },
    /// Remove a queue entry by id.
    Remove { entry_id: String },
    /// Print the current queue.
    Queue,
}

pub fn parse() -> Args {
    Args::parse()
}
