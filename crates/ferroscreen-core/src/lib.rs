//! # Ferroscreen Core
//!
//! Read-through caching engine for a rate-limited market data API.
//!
//! ## Overview
//!
//! The crate answers three questions for a stock screening client:
//!
//! - **Fundamentals** for a list of stocks on a date
//! - **Financial statement** metrics, addressed by dotted paths into nested data
//! - **Screening**: every stock in the market whose metrics fall inside the
//!   requested ranges, across both datasets
//!
//! Screening touches thousands of stocks, so codes are fetched in batches by a
//! bounded worker pool and the results are cached per date on disk.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Batched fetch with bounded concurrency and ordered reassembly |
//! | [`cache`] | Date-keyed JSON cache with expiry and metric coverage |
//! | [`config`] | Runtime configuration from the environment |
//! | [`dataset`] | Dataset kinds, stock records and filter specs |
//! | [`directory`] | Market-wide stock listing with a daily cache |
//! | [`error`] | Validation and top-level error types |
//! | [`filter_config`] | Persisted list of filterable fields |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`pipeline`] | Extraction, merge and range filtering of records |
//! | [`retry`] | Attempt budget and doubling backoff |
//! | [`service`] | The public screening operations |
//! | [`throttling`] | Optional client-side request pacing |
//! | [`upstream`] | Retrying upstream client and response classification |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferroscreen_core::{FilterRequest, MetricFilterSpec, ScreenerConfig, ScreenerService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScreenerConfig::from_env()?;
//!     config.ensure_dirs()?;
//!     let service = ScreenerService::from_config(&config);
//!
//!     let request = FilterRequest {
//!         metrics_filter: MetricFilterSpec::new().with_range("pe_ttm", Some(5.0), Some(15.0)),
//!         ..FilterRequest::default()
//!     };
//!     let result = service.filter_stocks(&request).await?;
//!     println!("{} stocks matched", result.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ScreenerService  │
//! └───┬─────────┬────┘
//!     │         │
//!     ▼         ▼
//! ┌────────┐ ┌──────────────┐     ┌──────────────────┐
//! │ Cache  │ │ BatchFetcher │────▶│ UpstreamClient   │
//! └────────┘ └──────────────┘     │ retry / throttle │
//!                                 └────────┬─────────┘
//!                                          ▼
//!                                 ┌──────────────────┐
//!                                 │ HttpClient       │
//!                                 └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Upstream rejections carry the upstream's own message so callers can show it:
//!
//! ```rust
//! use ferroscreen_core::ScreenError;
//!
//! fn describe(error: &ScreenError) -> String {
//!     match error.forwardable_message() {
//!         Some(message) => format!("upstream said: {message}"),
//!         None => error.to_string(),
//!     }
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod directory;
pub mod error;
pub mod filter_config;
pub mod http_client;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod throttling;
pub mod upstream;

// Batch fetching
pub use batch::{BatchError, BatchFetcher, BatchResult, FetchError};

// Caching
pub use cache::{CacheEntry, CacheError, CacheStore};

// Configuration
pub use config::{ConfigError, ScreenerConfig};

// Records and filters
pub use dataset::{today, DatasetKind, MetricFilterSpec, MetricRange, RecordSet, StockRecord};

// Stock directory
pub use directory::{name_map, stock_codes, DirectoryError, StockDirectory, StockInfo, UpstreamDirectory};

// Error types
pub use error::{ScreenError, ValidationError};

// Filter field configuration
pub use filter_config::{FilterConfigError, FilterConfigStore, FilterField};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
};

// Merge and filter engine
pub use pipeline::{
    annotate_names, coerce_f64, extract_nested, filter_records, flatten_metric_paths,
    merge_by_code, record_matches,
};

// Retry logic
pub use retry::{Backoff, RetryConfig, MAX_BACKOFF_DELAY, RATE_LIMITED_STATUS};

// Screening operations
pub use service::{FilterRequest, FsPlan, ScreenPlan, ScreenerService};

// Throttling
pub use throttling::RequestThrottle;

// Upstream client
pub use upstream::{extract_error_message, records_from_response, UpstreamClient, UpstreamError};
