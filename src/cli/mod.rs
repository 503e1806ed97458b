//! CLI module for ares-rag
//!
//! Command-line parsing for the `ares-rag` binary. Uses clap for argument
//! parsing and owo-colors (through [`output::Output`]) for terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ares-rag - document indexing and semantic memory engine
#[derive(Parser, Debug)]
#[command(
    name = "ares-rag",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "ares-rag - document indexing and semantic memory engine",
    long_about = "Chunks documents into sentence windows, embeds them and keeps the\n\
                  relational store and the vector index in step. Also maintains a\n\
                  per-user semantic memory with expiry.",
    after_help = "EXAMPLES:\n    \
                  ares-rag config --validate                     # Check ares-rag.toml\n    \
                  ares-rag ingest --owner 7 notes.txt            # Index a text file\n    \
                  ares-rag search \"cache eviction\" --top-k 3     # Query indexed documents\n    \
                  ares-rag sweep                                 # Drop expired memories"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "ares-rag.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show configuration information
    Config {
        /// Print the full resolved configuration as TOML
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file and exit
        #[arg(long)]
        validate: bool,
    },

    /// Index a UTF-8 text file as a document
    Ingest {
        /// Owning user id
        #[arg(long)]
        owner: u64,

        /// Document title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// File to read
        file: PathBuf,
    },

    /// Search indexed documents
    Search {
        /// Free-text query
        query: String,

        /// Number of documents to return
        #[arg(long, default_value = "5")]
        top_k: usize,

        /// Drop hits scoring below this value
        #[arg(long, default_value = "0.0")]
        min_score: f32,
    },

    /// Delete a document and its vectors
    Delete {
        /// Owning user id
        #[arg(long)]
        owner: u64,

        /// Document id
        doc_id: u64,
    },

    /// Remove expired memories once
    Sweep,

    /// Re-index documents left in the indexing state
    Reconcile,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_defaults() {
        let cli = Cli::try_parse_from(["ares-rag", "search", "what is lru"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("ares-rag.toml"));
        match cli.command {
            Commands::Search {
                query,
                top_k,
                min_score,
            } => {
                assert_eq!(query, "what is lru");
                assert_eq!(top_k, 5);
                assert_eq!(min_score, 0.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ingest_requires_owner() {
        assert!(Cli::try_parse_from(["ares-rag", "ingest", "notes.txt"]).is_err());

        let cli = Cli::try_parse_from([
            "ares-rag", "--json-logs", "ingest", "--owner", "7", "--title", "Notes", "notes.txt",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert!(matches!(
            cli.command,
            Commands::Ingest { owner: 7, title: Some(ref t), .. } if t == "Notes"
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ares-rag", "sweep", "--config", "other.toml", "--no-color"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(cli.no_color);
        assert!(matches!(cli.command, Commands::Sweep));
    }
}
