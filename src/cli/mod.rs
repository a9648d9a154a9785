//! CLI command definitions and parsing
use crate::retrieval::{FusionStrategy, SearchMethod};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "regsearch",
    version,
    author = "neur0map",
    about = "Hybrid passage retrieval over regulatory documents",
    long_about = "Regsearch builds TF-IDF, BM25 and dense embedding indices over a chunked \
                  document corpus and answers queries by fusing the three rankings, with \
                  pattern-based boosting for amounts and regulatory clauses."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/regsearch/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build all three indices from the corpus and write the artifacts
    Build {
        /// Corpus file (overrides corpus.path)
        #[arg(long, value_name = "FILE")]
        corpus: Option<PathBuf>,
    },

    /// Search the indexed corpus
    Query {
        /// Search query text
        query: String,

        /// Retrieval method
        #[arg(short, long, default_value = "hybrid", value_parser = parse_method)]
        method: SearchMethod,

        /// Maximum number of results (defaults to retrieval.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Fusion strategy (defaults to fusion.strategy)
        #[arg(short, long, value_parser = parse_fusion)]
        fusion: Option<FusionStrategy>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the headers of the persisted index artifacts
    Inspect,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the default configuration path
    Path,
}

fn parse_method(s: &str) -> Result<SearchMethod, String> {
    s.parse()
}

fn parse_fusion(s: &str) -> Result<FusionStrategy, String> {
    s.parse()
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
