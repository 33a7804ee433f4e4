//! Command-line interface parsing for the recipes tool
//!
//! This module handles parsing of CLI arguments using clap, and turns them
//! into the runtime [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::Config;
use crate::data::DEFAULT_ENDPOINT;
use crate::fetcher::MalformedPolicy;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// A timeout of zero would fail every request
    #[error("Invalid timeout: must be at least 1 second")]
    InvalidTimeout,

    /// Zero concurrent downloads would never make progress
    #[error("Invalid concurrency: must be at least 1")]
    InvalidConcurrency,
}

/// Recipes - fetch the recipe list and cache recipe photos locally
#[derive(Parser, Debug)]
#[command(name = "recipes")]
#[command(about = "Fetch recipes and keep their photos cached locally")]
#[command(version)]
pub struct Cli {
    /// Recipe list endpoint
    #[arg(long, env = "RECIPES_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    pub endpoint: String,

    /// Directory for cached images (defaults to the user cache directory)
    #[arg(long, env = "RECIPES_CACHE_DIR", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Timeout for each HTTP request, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30, global = true)]
    pub timeout: u64,

    /// Maximum number of image downloads running at once
    #[arg(long, value_name = "N", default_value_t = 4, global = true)]
    pub concurrency: usize,

    /// Fail the whole fetch if any recipe is missing a uuid, name or cuisine
    ///
    /// By default malformed recipes are dropped and the rest are kept.
    #[arg(long, global = true)]
    pub reject_malformed: bool,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Actions the tool can perform
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the recipe list and cache every thumbnail (default)
    Fetch,
    /// Show the cached image for a recipe
    Show {
        /// Recipe uuid
        uuid: String,
    },
    /// Delete every cached image
    Purge,
}

impl Cli {
    /// Subcommand to run, `fetch` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Fetch)
    }
}

impl Config {
    /// Creates a Config from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Config)` with the requested settings
    /// * `Err(CliError)` if the timeout or concurrency is zero
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.timeout == 0 {
            return Err(CliError::InvalidTimeout);
        }
        if cli.concurrency == 0 {
            return Err(CliError::InvalidConcurrency);
        }

        let malformed_policy = if cli.reject_malformed {
            MalformedPolicy::Reject
        } else {
            MalformedPolicy::Filter
        };

        Ok(Config {
            endpoint: cli.endpoint.clone(),
            cache_dir: cli.cache_dir.clone(),
            request_timeout: Duration::from_secs(cli.timeout),
            malformed_policy,
            max_concurrent_downloads: cli.concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_args_defaults_to_fetch() {
        let cli = Cli::parse_from(["recipes"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.command(), Command::Fetch);
        assert_eq!(cli.timeout, 30);
        assert_eq!(cli.concurrency, 4);
        assert!(!cli.reject_malformed);
    }

    #[test]
    fn test_cli_parse_show() {
        let cli = Cli::parse_from(["recipes", "show", "abc-1"]);
        assert_eq!(
            cli.command(),
            Command::Show {
                uuid: "abc-1".to_string()
            }
        );
    }

    #[test]
    fn test_cli_parse_global_options_after_subcommand() {
        let cli = Cli::parse_from([
            "recipes",
            "fetch",
            "--endpoint",
            "http://localhost/r.json",
            "--reject-malformed",
            "--concurrency",
            "8",
        ]);
        assert_eq!(cli.command(), Command::Fetch);
        assert_eq!(cli.endpoint, "http://localhost/r.json");
        assert!(cli.reject_malformed);
        assert_eq!(cli.concurrency, 8);
    }

    #[test]
    fn test_config_from_cli() {
        let cli = Cli::parse_from([
            "recipes",
            "--cache-dir",
            "/tmp/images",
            "--timeout",
            "5",
            "--reject-malformed",
            "purge",
        ]);

        let config = Config::from_cli(&cli).unwrap();

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/images")));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.malformed_policy, MalformedPolicy::Reject);
        assert_eq!(cli.command(), Command::Purge);
    }

    #[test]
    fn test_config_from_cli_rejects_zero_timeout() {
        let cli = Cli::parse_from(["recipes", "--timeout", "0"]);
        let err = Config::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CliError::InvalidTimeout));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_config_from_cli_rejects_zero_concurrency() {
        let cli = Cli::parse_from(["recipes", "--concurrency", "0"]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(CliError::InvalidConcurrency)
        ));
    }
}
