use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::TabId;
use crate::output::OutputFormat;

/// Command-line interface definition.
/// Records IPv4 addresses seen on pages per tab and enriches them with
/// geolocation and abuse-reputation data.
///
/// Verbosity levels:
/// 0 - silent (only final output)
/// 1 - errors (default)
/// 2 - warnings + errors
/// 5 - trace/debug
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Track public IPv4 addresses seen per browser tab and enrich them with geolocation and abuse reputation"
)]
pub struct Cli {
    /// TOML configuration file (defaults to the per-user config file if present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// JSON state file holding sightings and the API key
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "memory")]
    pub state: Option<PathBuf>,

    /// Keep state in memory only (nothing survives the process)
    #[arg(long, global = true)]
    pub memory: bool,

    /// Output format
    #[arg(long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// Disable colors in styled output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Verbosity level (0,1,2,5)
    #[arg(long, global = true, default_value_t = 1)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract public IPv4 addresses from page content and record them
    Scan {
        #[arg(long)]
        tab: TabId,
        /// URL the content was loaded from
        #[arg(long)]
        url: String,
        /// HTML or text file; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Show a tab's recorded addresses
    List {
        #[arg(long)]
        tab: TabId,
        /// Filter by address, country, city or ISP
        #[arg(long)]
        search: Option<String>,
    },
    /// Enrich one recorded address, or every address still missing data
    Enrich {
        #[arg(long)]
        tab: TabId,
        ip: Option<String>,
    },
    /// Enrich an address without recording it
    Lookup { ip: String },
    /// Remove a tab's data
    Clear {
        #[arg(long)]
        tab: TabId,
    },
    /// Signal that a tab was closed
    CloseTab {
        #[arg(long)]
        tab: TabId,
    },
    /// Store the AbuseIPDB API key (an empty key removes it)
    SetKey { key: String },
    /// Print the JSON schema of structured tab reports
    Schema,
}

impl Cli {
    /// Parse CLI arguments from process args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Convenience: are we in very verbose/debug mode?
    pub fn is_trace(&self) -> bool {
        self.verbose >= 5
    }

    /// Are warning-level messages enabled?
    pub fn warn_enabled(&self) -> bool {
        self.verbose >= 2
    }

    /// Are error-level messages enabled?
    pub fn error_enabled(&self) -> bool {
        self.verbose >= 1
    }

    /// Default `tracing` directive for the verbosity level.
    pub fn log_directive(&self) -> &'static str {
        if self.is_trace() {
            "trace"
        } else if self.verbose >= 3 {
            "info"
        } else if self.warn_enabled() {
            "warn"
        } else if self.error_enabled() {
            "error"
        } else {
            "off"
        }
    }
}
