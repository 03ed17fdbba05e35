//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::exchange::{ExportScope, ResolvePolicy};

pub mod commands;

/// Techwatch data exchange - move curated data between instances
#[derive(Parser, Debug)]
#[command(name = "tw", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.techwatch/data/techwatch.db)
    #[arg(long, global = true, env = "TW_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "TW_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database
    Init {
        /// Overwrite existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Show record counts per entity
    Status,

    /// Export, analyze, and reconcile archives
    Exchange {
        #[command(subcommand)]
        command: ExchangeCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Exchange Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ExchangeCommands {
    /// Export the whole store to an archive
    Export {
        /// Leave out sensitive fields (API keys)
        #[arg(long)]
        redacted: bool,

        /// Which data to export (all, technical, functional)
        #[arg(long, default_value = "all")]
        scope: ExportScope,

        /// Output file (default: ./techwatch-<kind>[-<scope>]-<date>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report new items and conflicts without writing
    Analyze {
        /// Archive to analyze
        file: PathBuf,
    },

    /// Import new items; refused while conflicts remain
    Execute {
        /// Archive to import
        file: PathBuf,
    },

    /// Settle one conflict
    Resolve(ResolveArgs),

    /// Package unresolved records into an archive
    ExportConflicts {
        /// JSON file with a list of {entity, key, data} items
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: ./techwatch-conflicts-<date>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Entity kind (tag, link, curation_session, ...)
    #[arg(long)]
    pub entity: String,

    /// Natural key of the stored record
    #[arg(long)]
    pub key: String,

    /// Resolution policy (keep, overwrite, merge)
    #[arg(long, short)]
    pub policy: ResolvePolicy,

    /// Record payload as a JSON object
    #[arg(long, conflicts_with = "data_file")]
    pub data: Option<String>,

    /// Read the record payload from a JSON file
    #[arg(long)]
    pub data_file: Option<PathBuf>,

    /// Fingerprint reported by analyze (required for overwrite and merge)
    #[arg(long)]
    pub expect: Option<String>,
}
