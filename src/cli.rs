//! Command-line interface definition for Chatkeep
//!
//! This module defines the operator CLI using clap's derive API. The CLI
//! inspects and maintains the snapshot store directly; capture and restore
//! need a live host session and are driven through the library.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chatkeep - chat snapshot store maintenance
#[derive(Parser, Debug, Clone)]
#[command(name = "chatkeep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Snapshot database path (overrides config and CHATKEEP_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List stored snapshots, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the messages of one snapshot
    Show {
        /// Chat key, e.g. character:0:main
        chat_key: String,
        /// Snapshot timestamp in milliseconds
        timestamp: i64,
    },

    /// Export one snapshot as JSON
    Export {
        /// Chat key, e.g. character:0:main
        chat_key: String,
        /// Snapshot timestamp in milliseconds
        timestamp: i64,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete one snapshot
    Delete {
        /// Chat key, e.g. character:0:main
        chat_key: String,
        /// Snapshot timestamp in milliseconds
        timestamp: i64,
    },

    /// Evict the oldest snapshots down to the retention cap
    Prune {
        /// Cap to enforce (defaults to backup.max_total_backups)
        #[arg(long)]
        max: Option<usize>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            db: None,
            command: Commands::List { json: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(cli.db.is_none());
        assert!(matches!(cli.command, Commands::List { json: false }));
    }

    #[test]
    fn test_cli_parse_list_json() {
        let cli = Cli::try_parse_from(["chatkeep", "list", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::List { json: true }));
    }

    #[test]
    fn test_cli_parse_show() {
        let cli = Cli::try_parse_from(["chatkeep", "show", "group:g1:s", "1700000000000"]).unwrap();
        if let Commands::Show {
            chat_key,
            timestamp,
        } = cli.command
        {
            assert_eq!(chat_key, "group:g1:s");
            assert_eq!(timestamp, 1_700_000_000_000);
        } else {
            panic!("Expected Show command");
        }
    }

    #[test]
    fn test_cli_parse_export_with_output() {
        let cli = Cli::try_parse_from([
            "chatkeep",
            "export",
            "character:0:main",
            "5",
            "--output",
            "out.json",
        ])
        .unwrap();
        if let Commands::Export { output, .. } = cli.command {
            assert_eq!(output, Some(PathBuf::from("out.json")));
        } else {
            panic!("Expected Export command");
        }
    }

    #[test]
    fn test_cli_db_is_global() {
        let cli = Cli::try_parse_from(["chatkeep", "prune", "--max", "3", "--db", "/tmp/x.db"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(cli.command, Commands::Prune { max: Some(3) }));
    }

    #[test]
    fn test_cli_rejects_non_numeric_timestamp() {
        assert!(Cli::try_parse_from(["chatkeep", "delete", "character:0:main", "soon"]).is_err());
    }
}
