//! Petal CLI Configuration Management
//!
//! Configuration is read from a TOML file (`--config`, else
//! `~/.petal/config.toml` when present) layered over defaults. The
//! `--endpoint` flag overrides the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use petal_core::RealtimeConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Petal CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Broker connection settings
    pub realtime: RealtimeConfig,

    /// Terminal presentation
    pub cli: CliConfig,

    /// Who the CLI connects as
    pub identity: IdentityConfig,
}

/// Terminal presentation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt shown before stdin input
    pub prompt: String,

    /// Name attached to outgoing chat messages
    pub display_name: Option<String>,

    /// Whether to use ANSI colours
    pub colored_output: bool,
}

/// Credentials used when none are given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable guest id; generated per run when absent
    pub guest_id: Option<String>,

    /// Bearer token of a signed-in user or staff member
    pub token: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "petal> ".to_string(),
            display_name: None,
            colored_output: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from an explicit path, the default path, or fall back to defaults
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading configuration from: {}", path);
            return Self::load_from_file(path);
        }
        match Self::default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)
            }
            _ => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        debug!("Configuration loaded: endpoint {}", config.realtime.endpoint);
        Ok(config)
    }

    /// `~/.petal/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".petal").join("config.toml"))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.realtime
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        if self.cli.prompt.is_empty() {
            return Err(CliError::Config("Prompt must not be empty".to_string()));
        }
        if let Some(token) = &self.identity.token {
            if token.trim().is_empty() {
                return Err(CliError::Config("Token must not be blank".to_string()));
            }
        }
        Ok(())
    }

    /// Apply command line overrides
    pub fn with_endpoint_override(mut self, endpoint: Option<&str>) -> Result<Self> {
        if let Some(endpoint) = endpoint {
            self.realtime.endpoint = endpoint.to_string();
            // A ws:// endpoint is a raw STOMP socket, not a SockJS one
            if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
                self.realtime.sockjs = false;
            }
            self.validate()?;
        }
        Ok(self)
    }

    /// Configured guest id, or a fresh one for this run
    pub fn guest_id(&self) -> String {
        self.identity
            .guest_id
            .clone()
            .unwrap_or_else(|| format!("guest-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Configuration written by `petal config --write`
    pub fn example() -> Self {
        AppConfig {
            realtime: RealtimeConfig::local_development(),
            cli: CliConfig {
                display_name: Some("Florist".to_string()),
                ..CliConfig::default()
            },
            identity: IdentityConfig {
                guest_id: Some("guest-0001".to_string()),
                token: None,
            },
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::example())
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_creation() {
        let config = AppConfig::default();
        assert_eq!(config.cli.prompt, "petal> ");
        assert!(config.cli.colored_output);
        assert!(config.identity.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.identity.token = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.realtime.endpoint = "ftp://broker".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_generation() {
        let example = AppConfig::example_config();
        assert!(example.contains("[realtime]"));
        assert!(example.contains("[cli]"));
        assert!(example.contains("[identity]"));

        let parsed: AppConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed.realtime, RealtimeConfig::local_development());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[realtime]\nendpoint = \"wss://shop.example/ws/chat\"\nsockjs = false\nreconnect_delay = 750\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.realtime.endpoint, "wss://shop.example/ws/chat");
        assert_eq!(config.realtime.reconnect_delay, Duration::from_millis(750));
        assert_eq!(config.realtime.max_retries, RealtimeConfig::default().max_retries);
        assert_eq!(config.cli, CliConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.identity.guest_id = Some("guest-7".to_string());

        config.save_to_file(&path).unwrap();
        assert_eq!(AppConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_endpoint_override() {
        let config = AppConfig::default()
            .with_endpoint_override(Some("ws://127.0.0.1:9000/stomp"))
            .unwrap();
        assert_eq!(config.realtime.endpoint, "ws://127.0.0.1:9000/stomp");
        assert!(!config.realtime.sockjs);

        assert!(AppConfig::default()
            .with_endpoint_override(Some("not a url"))
            .is_err());
    }

    #[test]
    fn test_guest_id_fallback() {
        let mut config = AppConfig::default();
        assert!(config.guest_id().starts_with("guest-"));
        config.identity.guest_id = Some("guest-fixed".to_string());
        assert_eq!(config.guest_id(), "guest-fixed");
    }
}
