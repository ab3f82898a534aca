//! # VTEC
//!
//! The command-line front end of the VTEC engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    apps/vtec (THE BINARY)                │
//! │                                                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   │
//! │  │    CLI      │   │ Record-store │   │ RemoteStore  │   │
//! │  │   (clap)    │   │ service/axum │   │  (reqwest)   │   │
//! │  └──────┬──────┘   └──────┬───────┘   └──────┬───────┘   │
//! │         └─────────────────┼──────────────────┘           │
//! │                           ▼                              │
//! │                   ┌───────────────┐                      │
//! │                   │   vtec-core   │                      │
//! │                   └───────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! vtec issue -f wsw.json
//! vtec records --office KTBW --phensigs WS.W
//! vtec serve --port 8080 --backend redb --store records.redb
//! vtec --backend remote --url http://host:8080 issue -f wsw.json
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vtec::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // VTEC_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("VTEC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "vtec=debug,vtec_core=debug,tower_http=debug"
    } else {
        "vtec=info,vtec_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!(kind = e.kind(), "{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
