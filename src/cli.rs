//! Command-line argument parsing for sqlcmdr.

use crate::config::{ConnectionConfig, Settings};
use crate::error::{Result, SqlCmdrError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Run SQL batches and inspect schemas of a PostgreSQL database.
#[derive(Parser, Debug)]
#[command(name = "sqlcmdr")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection string (overrides settings)
    #[arg(long, global = true, value_name = "CONNECTION_STRING")]
    pub url: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to the log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Check that the database is reachable
    Test,

    /// Print the database catalog as JSON
    Schema,

    /// Run a SQL batch and print the results as JSON
    Query {
        /// SQL text to run
        #[arg(value_name = "SQL", required_unless_present = "file")]
        sql: Option<String>,

        /// Read the SQL text from a file
        #[arg(short, long, value_name = "PATH", conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Maximum rows kept per result set
        #[arg(short, long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Manage the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    /// Print the effective settings
    Show,
    /// Write the effective settings to the settings file
    Save,
    /// Remove the settings file
    Delete,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the settings file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Settings::default_path)
    }

    /// Returns the log level used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }

    /// Loads settings, applying `--url` on top.
    pub fn resolve_settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(&self.config_path())?;
        if let Some(url) = &self.url {
            settings.connection = ConnectionConfig::from_connection_string(url)?;
        }
        Ok(settings)
    }
}

/// Reads the SQL text of a `query` invocation.
pub fn read_sql(sql: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (sql, file) {
        (Some(sql), _) => Ok(sql.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            SqlCmdrError::invalid_argument(format!("Failed to read {}: {e}", path.display()))
        }),
        (None, None) => Err(SqlCmdrError::invalid_argument(
            "SQL query cannot be null or empty.",
        )),
    }
}

/// Exit status after a second interrupt, as a shell reports SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Response to a Ctrl-C while a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Cancel the running query and wait for its response.
    CancelQuery,
    /// Stop waiting and exit.
    Exit,
}

/// Picks the response to the `count`-th Ctrl-C, counting from 1.
pub fn interrupt_action(count: usize) -> Interrupt {
    if count <= 1 {
        Interrupt::CancelQuery
    } else {
        Interrupt::Exit
    }
}
