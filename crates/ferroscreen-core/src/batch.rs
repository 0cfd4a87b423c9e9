//! Batched, bounded-concurrency fetching of one dataset.
//!
//! Stock codes are split into fixed-size batches. Each batch runs as its own
//! task behind a semaphore holding `max_workers` permits, and results are
//! reassembled in batch order no matter which task finished first.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{ScreenerConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS};
use crate::dataset::{RecordSet, StockRecord};
use crate::upstream::{records_from_response, UpstreamClient, UpstreamError};

/// Why a single batch produced no records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("batch task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("all {batch_count} batches failed; first failure: {source}")]
    AllBatchesFailed {
        batch_count: usize,
        #[source]
        source: BatchError,
    },
}

impl FetchError {
    pub fn upstream_message(&self) -> Option<&str> {
        match self {
            Self::AllBatchesFailed {
                source: BatchError::Upstream(error),
                ..
            } => error.upstream_message(),
            Self::AllBatchesFailed { .. } => None,
        }
    }
}

/// Outcome of one batch. A failed batch has no records and no missing codes.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_index: usize,
    pub codes: Vec<String>,
    pub records: Vec<StockRecord>,
    pub missing: Vec<String>,
    pub error: Option<BatchError>,
}

impl BatchResult {
    fn failed(batch_index: usize, codes: Vec<String>, error: BatchError) -> Self {
        Self {
            batch_index,
            codes,
            records: Vec::new(),
            missing: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct BatchFetcher {
    client: UpstreamClient,
    token: String,
    batch_size: usize,
    max_workers: usize,
}

impl BatchFetcher {
    pub fn new(client: UpstreamClient, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    pub fn from_config(client: UpstreamClient, config: &ScreenerConfig) -> Self {
        Self::new(client, config.token.clone())
            .with_batch_size(config.batch_size)
            .with_max_workers(config.max_workers)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Fetches `metrics` for every code at `date`, one upstream call per batch.
    ///
    /// Succeeds when at least one batch succeeds. Records from successful batches
    /// appear in batch order; failed batches are logged and contribute nothing.
    pub async fn fetch_all(
        &self,
        codes: &[String],
        date: &str,
        metrics: &[String],
        endpoint: &str,
    ) -> Result<RecordSet, FetchError> {
        if codes.is_empty() {
            return Ok(RecordSet::empty());
        }

        let batches: Vec<Vec<String>> = codes
            .chunks(self.batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        let batch_count = batches.len();
        let workers = self.max_workers.clamp(1, batch_count);

        info!(
            endpoint,
            date,
            codes = codes.len(),
            batches = batch_count,
            workers,
            "starting batch fetch"
        );

        let permits = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(batch_count);
        for (batch_index, batch_codes) in batches.iter().enumerate() {
            let permits = Arc::clone(&permits);
            let client = self.client.clone();
            let endpoint = endpoint.to_owned();
            let batch_codes = batch_codes.clone();
            let payload = json!({
                "token": self.token,
                "stockCodes": batch_codes,
                "date": date,
                "metricsList": metrics,
            });

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                fetch_batch(&client, &endpoint, batch_index, batch_count, batch_codes, payload).await
            }));
        }

        let mut results: Vec<BatchResult> = join_all(handles)
            .await
            .into_iter()
            .zip(batches)
            .enumerate()
            .map(|(batch_index, (outcome, batch_codes))| {
                outcome.unwrap_or_else(|join_error| {
                    warn!(batch = batch_index + 1, error = %join_error, "batch task did not complete");
                    BatchResult::failed(
                        batch_index,
                        batch_codes,
                        BatchError::Aborted(join_error.to_string()),
                    )
                })
            })
            .collect();
        results.sort_by_key(|result| result.batch_index);

        reassemble(results, batch_count)
    }
}

async fn fetch_batch(
    client: &UpstreamClient,
    endpoint: &str,
    batch_index: usize,
    batch_count: usize,
    codes: Vec<String>,
    payload: Value,
) -> BatchResult {
    info!(
        batch = batch_index + 1,
        batches = batch_count,
        codes = codes.len(),
        "fetching batch"
    );

    let records = match client.request_json(endpoint, &payload).await {
        Ok(body) => records_from_response(body),
        Err(error) => Err(error),
    };

    match records {
        Ok(records) => {
            let missing = missing_codes(&codes, &records);
            if !missing.is_empty() {
                warn!(
                    batch = batch_index + 1,
                    missing = missing.len(),
                    codes = ?missing,
                    "batch returned fewer records than requested"
                );
            }
            info!(batch = batch_index + 1, records = records.len(), "batch complete");
            BatchResult {
                batch_index,
                codes,
                records,
                missing,
                error: None,
            }
        }
        Err(error) => {
            warn!(batch = batch_index + 1, error = %error, "batch failed");
            BatchResult::failed(batch_index, codes, BatchError::Upstream(error))
        }
    }
}

/// Requested codes absent from `records`, in request order.
fn missing_codes(requested: &[String], records: &[StockRecord]) -> Vec<String> {
    let received: HashSet<&str> = records.iter().filter_map(StockRecord::stock_code).collect();
    requested
        .iter()
        .filter(|code| !received.contains(code.as_str()))
        .cloned()
        .collect()
}

fn reassemble(results: Vec<BatchResult>, batch_count: usize) -> Result<RecordSet, FetchError> {
    let failed: Vec<&BatchResult> = results.iter().filter(|result| result.is_failed()).collect();

    if failed.len() == batch_count {
        let source = failed
            .first()
            .and_then(|result| result.error.clone())
            .unwrap_or_else(|| BatchError::Aborted(String::from("no batch results")));
        return Err(FetchError::AllBatchesFailed {
            batch_count,
            source,
        });
    }

    if !failed.is_empty() {
        let failed_batches: Vec<usize> = failed.iter().map(|result| result.batch_index + 1).collect();
        let failed_codes: Vec<&str> = failed
            .iter()
            .flat_map(|result| result.codes.iter().map(String::as_str))
            .collect();
        warn!(
            failed = failed.len(),
            batches = batch_count,
            failed_batches = ?failed_batches,
            failed_codes = ?failed_codes,
            "some batches failed"
        );
    }

    let mut data = Vec::new();
    let mut missing = Vec::new();
    for result in results {
        data.extend(result.records);
        missing.extend(result.missing);
    }

    if !missing.is_empty() {
        warn!(missing = missing.len(), codes = ?missing, "codes missing from upstream response");
    }
    info!(records = data.len(), batches = batch_count, "batch fetch complete");

    Ok(RecordSet::from_records(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(code: &str) -> StockRecord {
        StockRecord::from_value(json!({ "stockCode": code })).expect("object")
    }

    fn success(batch_index: usize, codes: &[&str], returned: &[&str]) -> BatchResult {
        let codes: Vec<String> = codes.iter().map(|code| (*code).to_owned()).collect();
        let records: Vec<StockRecord> = returned.iter().map(|code| record(code)).collect();
        let missing = missing_codes(&codes, &records);
        BatchResult {
            batch_index,
            codes,
            records,
            missing,
            error: None,
        }
    }

    fn failure(batch_index: usize, message: &str) -> BatchResult {
        BatchResult::failed(
            batch_index,
            vec![format!("code-{batch_index}")],
            BatchError::Upstream(UpstreamError::Rejected {
                status: 400,
                message: message.to_owned(),
            }),
        )
    }

    #[test]
    fn missing_codes_preserve_request_order() {
        let requested: Vec<String> = ["a", "b", "c", "d"].iter().map(|c| (*c).to_owned()).collect();
        let missing = missing_codes(&requested, &[record("c"), record("a")]);

        assert_eq!(missing, vec!["b", "d"]);
    }

    #[test]
    fn reassembly_skips_failed_batches() {
        let results = vec![
            success(0, &["a", "b"], &["a", "b"]),
            failure(1, "bad batch"),
            success(2, &["e"], &["e"]),
        ];

        let set = reassemble(results, 3).expect("partial success");
        let codes: Vec<_> = set.data.iter().filter_map(StockRecord::stock_code).collect();
        assert_eq!(codes, vec!["a", "b", "e"]);
        assert_eq!(set.total, 3);
    }

    #[test]
    fn reassembly_reports_first_failure_when_everything_failed() {
        let error = reassemble(vec![failure(0, "first"), failure(1, "second")], 2)
            .expect_err("all failed");

        assert_eq!(error.upstream_message(), Some("first"));
    }
}
