//! CLI argument definitions for Ferroscreen.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fundamentals` | Fetch fundamental metrics for stocks |
//! | `fs` | Fetch financial statement metrics for stocks |
//! | `filter` | Screen every listed stock against metric ranges |
//! | `filter-config` | Show or replace the filterable field list |
//! | `cache` | Manage the local dataset cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, ndjson) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--token` | env | Upstream API token |
//! | `--cache-dir` | `~/.ferroscreen/cache` | Cache directory |
//!
//! # Examples
//!
//! ```bash
//! # Fundamentals for two stocks
//! ferroscreen fundamentals --codes 00700,00005 --metrics pe_ttm,mc
//!
//! # Cheap large caps with growing profit
//! ferroscreen filter --filter pe_ttm=5:15 --filter mc=1e11: \
//!     --fs-filter q.ps.np.t=0: --fs-date 2024-12-31 --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ferroscreen_core::{DatasetKind, MetricRange};

/// Ferroscreen - caching screener for a rate-limited market data API
#[derive(Debug, Parser)]
#[command(
    name = "ferroscreen",
    author,
    version,
    about = "Caching stock screener for a rate-limited market data API",
    long_about = "Ferroscreen fetches fundamental and financial statement data in batches, \
caches each dataset per date on disk, and screens the whole market against metric ranges.\n\
\n\
Use 'ferroscreen <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    ///
    /// - json: Single JSON document (default)
    /// - ndjson: One record per line
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Upstream API token. Overrides FERROSCREEN_TOKEN.
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Cache directory. Overrides FERROSCREEN_CACHE_DIR.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON document.
    Json,
    /// Newline-delimited JSON, one record per line.
    Ndjson,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch fundamental metrics for stocks on one date.
    ///
    /// Always goes to the upstream API.
    ///
    /// # Examples
    ///
    ///   ferroscreen fundamentals --codes 00700 --metrics pe_ttm,pb
    Fundamentals(LookupArgs),

    /// Fetch financial statement metrics for stocks.
    ///
    /// Metrics are dotted paths such as q.ps.np.t; each is also returned as a
    /// top-level field.
    ///
    /// # Examples
    ///
    ///   ferroscreen fs --codes 00700 --metrics q.ps.np.t --date 2024-12-31
    Fs(LookupArgs),

    /// Screen every listed stock against metric ranges.
    ///
    /// Ranges are written key=min:max; leave a side empty for no bound.
    ///
    /// # Examples
    ///
    ///   ferroscreen filter --filter pe_ttm=10:20 --filter mc=1e9:
    ///   ferroscreen filter --request screen.json
    Filter(FilterArgs),

    /// Show or replace the list of filterable fields.
    #[command(subcommand)]
    FilterConfig(FilterConfigCommand),

    /// Manage the local dataset cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Clone, Args)]
pub struct LookupArgs {
    /// Stock codes, comma separated or repeated.
    #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
    pub codes: Vec<String>,

    /// Metric names, comma separated or repeated.
    #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
    pub metrics: Vec<String>,

    /// Date as YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Fundamental range filter, key=min:max. Repeatable.
    #[arg(long = "filter", value_parser = parse_range_filter)]
    pub filters: Vec<RangeFilter>,

    /// Fundamental metrics to fetch. Defaults to the filtered keys.
    #[arg(long, value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Fundamental date as YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    pub date: Option<String>,

    /// Financial statement range filter, path=min:max. Repeatable.
    #[arg(long = "fs-filter", value_parser = parse_range_filter)]
    pub fs_filters: Vec<RangeFilter>,

    /// Financial statement metrics to fetch. Defaults to the filtered paths.
    #[arg(long, value_delimiter = ',')]
    pub fs_metrics: Vec<String>,

    /// Financial statement date. Required with statement metrics.
    #[arg(long)]
    pub fs_date: Option<String>,

    /// Read the whole request from a JSON file instead of flags.
    #[arg(
        long,
        conflicts_with_all = ["filters", "metrics", "date", "fs_filters", "fs_metrics", "fs_date"]
    )]
    pub request: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum FilterConfigCommand {
    /// Print the stored filter fields.
    Show,
    /// Replace the stored filter fields with a JSON array from a file.
    Save {
        /// Path to a JSON array of {key, label, type?} objects.
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove expired entries.
    Prune {
        /// Only prune this dataset.
        #[arg(long, value_enum)]
        dataset: Option<DatasetArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Fundamental,
    FinancialStatement,
}

impl From<DatasetArg> for DatasetKind {
    fn from(value: DatasetArg) -> Self {
        match value {
            DatasetArg::Fundamental => Self::Fundamental,
            DatasetArg::FinancialStatement => Self::FinancialStatement,
        }
    }
}

/// One `key=min:max` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub metric: String,
    pub range: MetricRange,
}

pub fn parse_range_filter(raw: &str) -> Result<RangeFilter, String> {
    let (metric, bounds) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=min:max, got '{raw}'"))?;
    let metric = metric.trim();
    if metric.is_empty() {
        return Err(format!("missing metric name in '{raw}'"));
    }
    let (min, max) = bounds
        .split_once(':')
        .ok_or_else(|| format!("expected min:max after '=', got '{bounds}'"))?;

    Ok(RangeFilter {
        metric: metric.to_owned(),
        range: MetricRange::new(parse_bound(min)?, parse_bound(max)?),
    })
}

fn parse_bound(raw: &str) -> Result<Option<f64>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("'{raw}' is not a number"))
}
