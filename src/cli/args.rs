//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// fontdepot - Self-hosted web font subsets
///
/// Serves Google-Fonts-compatible CSS and per-script WOFF2 subsets built
/// from a local font directory.
#[derive(Parser, Debug)]
#[command(name = "fontdepot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "FONTDEPOT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered fonts
    List(ListArgs),

    /// Print @font-face CSS for one or more families
    Css(CssArgs),

    /// Write a cached subset by fingerprint
    Fetch(FetchArgs),

    /// Build every subset of every font ahead of time
    Warm(WarmArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Manage the subset cache
    Cache(CacheArgs),
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the css command
#[derive(Parser, Debug)]
pub struct CssArgs {
    /// Family selectors, e.g. `Open+Sans:400,700italic` or
    /// `Example:ital,wght@0,400;1,700`. `|` separates several families.
    #[arg(required = true)]
    pub families: Vec<String>,

    /// Comma-separated subset names (default: every subset the font covers)
    #[arg(short, long)]
    pub subset: Option<String>,

    /// Custom unicode-range instead of named subsets
    #[arg(short, long, conflicts_with = "subset")]
    pub unicode_range: Option<String>,

    /// font-display value (default: from config)
    #[arg(short, long)]
    pub display: Option<String>,

    /// Write CSS to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Fingerprint or file name (`<fingerprint>.woff2`)
    pub fingerprint: String,

    /// Output file (defaults to the file name in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the warm command
#[derive(Parser, Debug)]
pub struct WarmArgs {
    /// Rebuild subsets that are already cached
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached subsets
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show cache directories and totals
    Info,

    /// Remove stale and old subsets
    Gc {
        /// Remove subsets built more than N days ago (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every cached subset
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
