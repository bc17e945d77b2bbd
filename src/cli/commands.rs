//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Incremental extractor for WMS REST APIs
#[derive(Parser, Debug)]
#[command(name = "wms-extract")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML or JSON) or inline JSON
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// State file (JSON); created on first flush
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Inline state JSON; persisted to --state when both are given
    #[arg(long, global = true)]
    pub state_json: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Test that the entity list endpoint is reachable
    Check,

    /// Discover entities and print the catalog with schemas
    Discover {
        /// Entities to describe (comma-separated, empty = configured selection)
        #[arg(long)]
        entities: Option<String>,
    },

    /// Extract records, streaming SCHEMA/RECORD/STATE lines to stdout
    Read {
        /// Entities to extract (comma-separated, empty = configured selection)
        #[arg(long)]
        entities: Option<String>,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON message per line
    Json,
    /// Indented JSON
    Pretty,
}

/// Split a comma-separated entity list
pub(crate) fn parse_entity_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}
