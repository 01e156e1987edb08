use crate::extractor::MinerSpec;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::fmt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Mine labeled patterns out of byte streams with pluggable miners", long_about = None)]
pub struct Cli {
    #[clap(long, global = true, value_parser, default_value_t = false)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[clap(long, global = true, value_parser)]
    pub log: Option<PathBuf>,

    /// Use this config file instead of the discovered one
    #[clap(long, global = true, value_parser)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract occurrences from a file, a string or stdin
    Scan {
        #[clap(long, value_parser, conflicts_with = "text")]
        file: Option<PathBuf>,

        #[clap(long, value_parser)]
        text: Option<String>,

        /// LIBRARY::SYMBOL[=CONFIG], repeatable
        #[clap(short, long = "miner", value_parser)]
        miners: Vec<MinerSpec>,

        #[clap(short, long, value_parser)]
        threads: Option<usize>,

        /// Occurrences requested per engine call
        #[clap(short, long, value_parser)]
        batch: Option<usize>,

        #[clap(long, value_parser)]
        slice_size: Option<usize>,

        #[clap(long, value_parser)]
        max_span: Option<usize>,

        /// Drop occurrences enclosed by a larger one
        #[clap(long, value_parser, default_value_t = false)]
        no_enclosed: bool,

        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[clap(long, value_parser, default_value_t = false)]
        progress: bool,

        /// Print engine counters when done
        #[clap(long, value_parser, default_value_t = false)]
        metrics: bool,
    },
    /// List the miners a library declares
    Meta {
        library: String,

        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate shell completions
    Completions {
        #[clap(value_enum)]
        shell: Shell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Ndjson,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}
