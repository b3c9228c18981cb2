//! # Canteen CLI Module
//!
//! This module implements the CLI interface for Canteen.
//!
//! ## Available Commands
//!
//! - `status` - Show adapter counters and per-kind entity counts
//! - `put` - Store an entity given as JSON
//! - `get` - Fetch an entity by URL-safe key
//! - `delete` - Delete an entity by URL-safe key
//! - `query` - Run an index-backed query on one kind
//! - `allocate` - Reserve ids for a kind
//! - `reindex` - Rebuild every index from the stored records
//! - `key` - Encode or decode keys

mod commands;

use canteen::CanteenConfig;
use canteen_model::ModelError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Canteen - schema-driven entities over indexed storage
#[derive(Parser, Debug)]
#[command(name = "canteen")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "canteen.toml")]
    pub config: PathBuf,

    /// Log output format (overrides CANTEEN_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show store status
    Status,

    /// Store an entity
    Put {
        /// Kind of the entity
        #[arg(short, long)]
        kind: String,

        /// Property values as a JSON object
        #[arg(short, long)]
        data: String,

        /// Complete URL-safe key; a fresh id is allocated when omitted
        #[arg(long)]
        key: Option<String>,

        /// URL-safe key of the parent entity
        #[arg(long, conflicts_with = "key")]
        parent: Option<String>,
    },

    /// Fetch an entity
    Get {
        /// URL-safe key
        key: String,
    },

    /// Delete an entity
    Delete {
        /// URL-safe key
        key: String,
    },

    /// Query one kind
    Query {
        /// Kind to query
        #[arg(short, long)]
        kind: String,

        /// Filter such as `age>=18` (repeatable, all must match)
        #[arg(short, long)]
        filter: Vec<String>,

        /// Sort such as `-age` (repeatable, first is primary)
        #[arg(short, long)]
        sort: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<i64>,

        /// Matches to skip before the limit applies
        #[arg(short, long)]
        offset: Option<u64>,

        /// Return keys only
        #[arg(long)]
        keys_only: bool,

        /// URL-safe key every result must descend from
        #[arg(long)]
        ancestor: Option<String>,
    },

    /// Reserve ids for a kind
    Allocate {
        /// Kind to allocate for
        #[arg(short, long)]
        kind: String,

        /// Number of ids
        #[arg(short = 'n', long, default_value = "1")]
        count: u64,
    },

    /// Rebuild every index from the stored records
    Reindex,

    /// Encode or decode keys
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyAction {
    /// Encode a `Kind:id[:Kind:id...]` path to its URL-safe form
    Encode { path: String },

    /// Decode a URL-safe key
    Decode { encoded: String },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ModelError> {
    let json_mode = cli.json_mode;

    // Key commands need no store
    if let Some(Commands::Key { action }) = &cli.command {
        return match action {
            KeyAction::Encode { path } => cmd_key_encode(path, json_mode),
            KeyAction::Decode { encoded } => cmd_key_decode(encoded, json_mode),
        };
    }

    let config = CanteenConfig::load(&cli.config)?;
    let store = canteen::Store::open(&config)?;

    match cli.command {
        Some(Commands::Put {
            kind,
            data,
            key,
            parent,
        }) => cmd_put(&store, json_mode, &kind, &data, key.as_deref(), parent.as_deref()),
        Some(Commands::Get { key }) => cmd_get(&store, json_mode, &key),
        Some(Commands::Delete { key }) => cmd_delete(&store, json_mode, &key),
        Some(Commands::Query {
            kind,
            filter,
            sort,
            limit,
            offset,
            keys_only,
            ancestor,
        }) => cmd_query(
            &store,
            json_mode,
            &QueryArgs {
                kind,
                filters: filter,
                sorts: sort,
                limit,
                offset,
                keys_only,
                ancestor,
            },
        ),
        Some(Commands::Allocate { kind, count }) => cmd_allocate(&store, json_mode, &kind, count),
        Some(Commands::Reindex) => cmd_reindex(&store, json_mode),
        Some(Commands::Status) | Some(Commands::Key { .. }) | None => {
            cmd_status(&store, &config, json_mode)
        }
    }
}
