use std::path::PathBuf;

use clap::{Parser, Subcommand};

use usyn_cli::commands::decode_ops::{self, DecodeOptions};
use usyn_cli::commands::tune_ops::{self, TuneOptions};
use usyn_cli::commands::{cache_ops, config_ops, import_ops, stats_ops};
use usyn_cli::trace_init::init_tracing;

#[derive(Parser)]
#[command(name = "usyn", about = "CRF unit-selection tuning harness")]
struct Cli {
    /// Write JSON logs into this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search feature coefficients against the bundle's test corpus
    Tune {
        /// Corpus bundle file
        bundle_file: String,
        /// Tuning configuration (default: built-in)
        #[arg(long)]
        config: Option<String>,
        /// Value cache file (overrides cache.path)
        #[arg(long)]
        cache: Option<String>,
        /// CSV trace file (overrides cache.trace)
        #[arg(long)]
        trace: Option<String>,
        /// Worker threads (overrides search.threads)
        #[arg(long)]
        threads: Option<usize>,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Decode test items and show the selected units
    Decode {
        /// Corpus bundle file
        bundle_file: String,
        /// Tuning configuration (default: built-in)
        #[arg(long)]
        config: Option<String>,
        /// Start from the best point in the configured value cache
        #[arg(long)]
        from_cache: bool,
        /// Set a coefficient, e.g. --set trans-ctx=12 (repeatable)
        #[arg(long = "set", value_parser = decode_ops::parse_assignment)]
        assignments: Vec<(String, f64)>,
        /// Decode only this test item
        #[arg(long)]
        item: Option<usize>,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Build a corpus bundle from a JSON source file
    Import {
        /// JSON file with "train" and "test" recordings
        source_file: String,
        /// Output bundle file
        output_file: String,
    },
    /// Per-column mean and standard deviation of a CSV trace
    Stats {
        /// Trace file written by `tune`
        trace_file: String,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the entries of a value cache
    CacheDump {
        /// Value cache file
        cache_file: String,
        /// Configuration whose ranges match the cache (default: built-in)
        #[arg(long)]
        config: Option<String>,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Export default tuning configuration as TOML
    ConfigExport,
    /// Validate a tuning configuration TOML file
    ConfigValidate {
        /// Path to the TOML file
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    match cli.command {
        Command::Tune {
            bundle_file,
            config,
            cache,
            trace,
            threads,
            json,
        } => {
            let opts = TuneOptions {
                config: config.as_deref(),
                cache: cache.as_deref(),
                trace: trace.as_deref(),
                threads,
                json,
            };
            tune_ops::tune(&bundle_file, &opts);
        }
        Command::Decode {
            bundle_file,
            config,
            from_cache,
            assignments,
            item,
            json,
        } => {
            let opts = DecodeOptions {
                config: config.as_deref(),
                from_cache,
                assignments: &assignments,
                item,
                json,
            };
            decode_ops::decode(&bundle_file, &opts);
        }
        Command::Import {
            source_file,
            output_file,
        } => import_ops::import(&source_file, &output_file),
        Command::Stats { trace_file, json } => stats_ops::stats(&trace_file, json),
        Command::CacheDump {
            cache_file,
            config,
            json,
        } => cache_ops::cache_dump(&cache_file, config.as_deref(), json),
        Command::ConfigExport => config_ops::config_export(),
        Command::ConfigValidate { file } => config_ops::config_validate(&file),
    }
}
