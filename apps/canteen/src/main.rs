//! # Canteen - Store CLI
//!
//! The operator binary for a Canteen store.
//!
//! This application provides:
//! - Schema definitions loaded from `canteen.toml`
//! - Entity put/get/delete with JSON payloads
//! - Index-backed queries, id allocation and reindexing
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/canteen (THE BINARY)         │
//! │                                              │
//! │  ┌─────────────┐        ┌────────────────┐   │
//! │  │    CLI      │        │ canteen.toml   │   │
//! │  │   (clap)    │        │ (toml + serde) │   │
//! │  └──────┬──────┘        └───────┬────────┘   │
//! │         └───────────┬───────────┘            │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │ canteen-model │                │
//! │             │  (THE MODEL)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! canteen status
//! canteen put -k Person -d '{"name": "Ada", "age": 36}'
//! canteen query -k Person -f 'age>=18' -s -age --limit 10
//! canteen key encode Org:acme:User:bob
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // CANTEEN_LOG_FORMAT=json enables machine-parseable output; the flag wins.
    let log_format = match cli.log_format {
        Some(format) => format,
        None => match std::env::var("CANTEEN_LOG_FORMAT").as_deref() {
            Ok("json") => cli::LogFormat::Json,
            _ => cli::LogFormat::Text,
        },
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "canteen=info,canteen_model=warn".into());

    match log_format {
        cli::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        cli::LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
