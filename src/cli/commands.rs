//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - render: submit ZPL files to the scheduler and write the rendered labels
//! - config: print the effective configuration
//! - classify: show the priority class of a plan

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// labelq - tier-aware ZPL label rendering queue
#[derive(Parser, Debug)]
#[command(name = "labelq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render ZPL files through the scheduler
    Render {
        /// Files or glob patterns, e.g. "labels/*.zpl"
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Subscription plan used for prioritisation (free, pro, enterprise)
        #[arg(short, long, default_value = "free")]
        plan: String,

        /// User the jobs are submitted for
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Label size in inches, WIDTHxHEIGHT
        #[arg(short, long, default_value = "4x6")]
        size: String,

        /// Number of labels per document, used for ETA reporting
        #[arg(short, long, default_value_t = 1)]
        labels: u32,

        /// Directory rendered labels are written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Print queue statistics as JSON once all jobs finish
        #[arg(long)]
        stats: bool,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Show the priority class assigned to a plan
    Classify {
        /// Plan name
        plan: String,
    },
}
