//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Broker endpoint, overriding the configuration file
    #[arg(short, long)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a live-chat session and talk from stdin
    Chat {
        /// Chat session id
        #[arg(short, long)]
        session: String,
        /// Guest id to announce (generated when absent)
        #[arg(short, long)]
        guest_id: Option<String>,
        /// Bearer token of a signed-in user or staff member
        #[arg(short, long)]
        token: Option<String>,
        /// Join as staff rather than as the customer
        #[arg(long)]
        staff: bool,
    },
    /// Watch admin notifications and online status
    Admin {
        /// Staff bearer token
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Follow a support ticket thread and reply from stdin
    Ticket {
        /// Ticket id
        #[arg(short, long)]
        id: String,
        /// Bearer token
        #[arg(short, long)]
        token: Option<String>,
        /// Reply as staff
        #[arg(long)]
        staff: bool,
    },
    /// Print an example configuration file
    Config {
        /// Also write it to ~/.petal/config.toml
        #[arg(long)]
        write: bool,
    },
}
