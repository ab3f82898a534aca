//! # VTEC CLI Module
//!
//! ## Available Commands
//!
//! - `analyze` - Preview the analyzed records for a request (no write)
//! - `issue` - Analyze and merge a request into the store
//! - `records` - List stored records
//! - `squeeze` - Purge records that can no longer affect analysis
//! - `decode` - Parse VTEC and H-VTEC strings
//! - `clear` - Empty the store
//! - `init` - Create an empty store
//! - `serve` - Run the HTTP record-store service

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vtec_core::VtecError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// VTEC engine
///
/// Assigns action codes and event tracking numbers to hazard products and
/// keeps the record of what has been issued.
#[derive(Parser, Debug)]
#[command(name = "vtec")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the record store
    #[arg(short = 'S', long, global = true, default_value = "vtec-records.json")]
    pub store: PathBuf,

    /// Storage backend: "json", "redb" or "remote"
    #[arg(short = 'B', long, global = true, default_value = "json")]
    pub backend: String,

    /// Record-store service URL (remote backend)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Configuration tables (TOML); overrides LOCALIZATION_DATA_SOURCE
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a request without writing to the store
    Analyze {
        /// Request file (JSON `AnalysisRequest`)
        #[arg(short, long)]
        file: PathBuf,

        /// Override the request's creation time (RFC 3339)
        #[arg(long)]
        creation_time: Option<String>,
    },

    /// Analyze a request and merge the result into the store
    Issue {
        /// Request file (JSON `AnalysisRequest`)
        #[arg(short, long)]
        file: PathBuf,

        /// Override the request's creation time (RFC 3339)
        #[arg(long)]
        creation_time: Option<String>,
    },

    /// List stored records
    Records {
        /// Issuing office, e.g. KTBW
        #[arg(short, long)]
        office: Option<String>,

        /// Phensigs, comma-separated (e.g. WS.W,WW.Y)
        #[arg(short, long)]
        phensigs: Option<String>,

        /// Zones, comma-separated
        #[arg(short, long)]
        zones: Option<String>,

        /// Product class letter (O, T, E, X)
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Purge records that can no longer influence analysis
    Squeeze {
        /// Squeeze as of this time (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<String>,

        /// Report without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Decode VTEC or H-VTEC strings
    Decode {
        /// Strings such as /O.NEW.KTBW.WS.W.0001.240115T1200Z-240116T0000Z/
        strings: Vec<String>,
    },

    /// Remove every record from the store
    Clear,

    /// Create an empty store
    Init {
        /// Reinitialize even if the store exists
        #[arg(short, long)]
        force: bool,
    },

    /// Run the HTTP record-store service
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), VtecError> {
    let ctx = Context::from_cli(&cli);
    match cli.command {
        Commands::Analyze {
            file,
            creation_time,
        } => cmd_analyze(&ctx, &file, creation_time.as_deref()),
        Commands::Issue {
            file,
            creation_time,
        } => cmd_issue(&ctx, &file, creation_time.as_deref()),
        Commands::Records {
            office,
            phensigs,
            zones,
            mode,
        } => cmd_records(&ctx, office, phensigs.as_deref(), zones.as_deref(), mode.as_deref()),
        Commands::Squeeze { now, dry_run } => cmd_squeeze(&ctx, now.as_deref(), dry_run),
        Commands::Decode { strings } => cmd_decode(&ctx, &strings),
        Commands::Clear => cmd_clear(&ctx),
        Commands::Init { force } => cmd_init(&ctx, force),
        Commands::Serve { host, port } => cmd_serve(&ctx, &host, port),
    }
}
