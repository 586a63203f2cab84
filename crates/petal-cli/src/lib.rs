//! Petal CLI library
//!
//! Command-line front end for the Petal realtime client: argument parsing,
//! configuration files and the chat, admin and ticket commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
