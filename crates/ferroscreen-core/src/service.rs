//! Public operations: direct dataset lookups and cross-dataset screening.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::{info, warn};

use crate::batch::BatchFetcher;
use crate::cache::CacheStore;
use crate::config::ScreenerConfig;
use crate::dataset::{today, DatasetKind, MetricFilterSpec, RecordSet, StockRecord};
use crate::directory::{name_map, stock_codes, DirectoryError, StockDirectory, UpstreamDirectory};
use crate::error::{ScreenError, ValidationError};
use crate::pipeline::{annotate_names, filter_records, flatten_metric_paths, merge_by_code};
use crate::upstream::{records_from_response, UpstreamClient};

/// Screening request, deserializable from the camelCase JSON request body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    #[serde(default)]
    pub metrics_filter: MetricFilterSpec,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub metrics_list: Option<Vec<String>>,
    #[serde(default)]
    pub fs_metrics_filter: MetricFilterSpec,
    #[serde(default)]
    pub fs_date: Option<String>,
    #[serde(default)]
    pub fs_metrics_list: Option<Vec<String>>,
}

/// What a validated request will fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenPlan {
    pub date: String,
    pub metrics: Vec<String>,
    pub fs: Option<FsPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsPlan {
    pub date: String,
    pub metrics: Vec<String>,
}

impl FilterRequest {
    /// Resolves metric lists and dates. An explicit non-empty list wins over
    /// the keys implied by the matching filter.
    pub fn plan(&self) -> Result<ScreenPlan, ValidationError> {
        let metrics = requested_metrics(self.metrics_list.as_deref(), &self.metrics_filter);
        let fs_metrics = requested_metrics(self.fs_metrics_list.as_deref(), &self.fs_metrics_filter);

        if metrics.is_empty() && fs_metrics.is_empty() {
            return Err(ValidationError::NoMetricsRequested);
        }

        let fs = if fs_metrics.is_empty() {
            None
        } else {
            let date = non_blank(self.fs_date.as_deref()).ok_or(ValidationError::MissingFsDate)?;
            Some(FsPlan {
                date: date.to_owned(),
                metrics: fs_metrics,
            })
        };

        let date = non_blank(self.date.as_deref()).map_or_else(today, str::to_owned);

        Ok(ScreenPlan { date, metrics, fs })
    }
}

fn requested_metrics(explicit: Option<&[String]>, filter: &MetricFilterSpec) -> Vec<String> {
    match explicit {
        Some(list) if !list.is_empty() => list.to_vec(),
        _ => filter.metric_keys(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub struct ScreenerService {
    client: UpstreamClient,
    fetcher: BatchFetcher,
    cache: Arc<CacheStore>,
    directory: Arc<dyn StockDirectory>,
    token: String,
    fundamental_url: String,
    fs_url: String,
    expire_days: u32,
}

impl ScreenerService {
    pub fn new(
        config: &ScreenerConfig,
        client: UpstreamClient,
        directory: Arc<dyn StockDirectory>,
    ) -> Self {
        Self {
            fetcher: BatchFetcher::from_config(client.clone(), config),
            client,
            cache: Arc::new(CacheStore::new(config.cache_dir.clone())),
            directory,
            token: config.token.clone(),
            fundamental_url: config.endpoint(DatasetKind::Fundamental).to_owned(),
            fs_url: config.endpoint(DatasetKind::FinancialStatement).to_owned(),
            expire_days: config.cache_expire_days,
        }
    }

    /// Production wiring: reqwest transport and the upstream company directory.
    pub fn from_config(config: &ScreenerConfig) -> Self {
        let client = UpstreamClient::from_config(config);
        let directory = Arc::new(UpstreamDirectory::from_config(client.clone(), config));
        Self::new(config, client, directory)
    }

    pub fn cache(&self) -> &CacheStore {
        self.cache.as_ref()
    }

    fn endpoint(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Fundamental => &self.fundamental_url,
            DatasetKind::FinancialStatement => &self.fs_url,
        }
    }

    /// Fundamental metrics for the given stocks on one date. Bypasses the cache.
    pub async fn get_stock_fundamentals(
        &self,
        codes: &[String],
        metrics: &[String],
        date: &str,
    ) -> Result<RecordSet, ScreenError> {
        let records = self
            .direct_fetch(DatasetKind::Fundamental, codes, metrics, date)
            .await?;
        Ok(RecordSet::from_records(records))
    }

    /// Financial statement metrics, with each dotted path also set at top level.
    pub async fn get_stock_fs_data(
        &self,
        codes: &[String],
        metrics: &[String],
        date: &str,
    ) -> Result<RecordSet, ScreenError> {
        let mut records = self
            .direct_fetch(DatasetKind::FinancialStatement, codes, metrics, date)
            .await?;
        flatten_metric_paths(&mut records, metrics);
        Ok(RecordSet::from_records(records))
    }

    async fn direct_fetch(
        &self,
        kind: DatasetKind,
        codes: &[String],
        metrics: &[String],
        date: &str,
    ) -> Result<Vec<StockRecord>, ScreenError> {
        if codes.is_empty() {
            return Err(ValidationError::EmptyList { field: "stockCodes" }.into());
        }
        if metrics.is_empty() {
            return Err(ValidationError::EmptyList { field: "metricsList" }.into());
        }
        if date.trim().is_empty() {
            return Err(ValidationError::EmptyValue { field: "date" }.into());
        }

        let payload = json!({
            "token": self.token,
            "stockCodes": codes,
            "metricsList": metrics,
            "date": date,
        });
        let response = self.client.request_json(self.endpoint(kind), &payload).await?;
        let mut records = records_from_response(response)?;
        info!(dataset = %kind, date, records = records.len(), "direct fetch complete");

        let names = match self.directory.stocks().await {
            Ok(stocks) => name_map(&stocks),
            Err(error) => {
                warn!(error = %error, "stock directory unavailable, names fall back to codes");
                HashMap::new()
            }
        };
        annotate_names(&mut records, &names);
        Ok(records)
    }

    /// Screens the whole directory against fundamental and financial
    /// statement filters, serving each dataset from cache when possible.
    pub async fn filter_stocks(&self, request: &FilterRequest) -> Result<RecordSet, ScreenError> {
        let plan = request.plan()?;

        let stocks = self.directory.stocks().await?;
        if stocks.is_empty() {
            return Err(DirectoryError::Empty.into());
        }
        let codes = stock_codes(&stocks);
        info!(
            stocks = codes.len(),
            date = %plan.date,
            metrics = plan.metrics.len(),
            fs_metrics = plan.fs.as_ref().map_or(0, |fs| fs.metrics.len()),
            "screening stocks"
        );

        let fundamental = async {
            if plan.metrics.is_empty() {
                return Ok(Vec::new());
            }
            self.load_dataset(DatasetKind::Fundamental, &codes, &plan.date, &plan.metrics)
                .await
        };
        let financial_statement = async {
            let Some(fs) = &plan.fs else {
                return Ok(Vec::new());
            };
            let mut records = self
                .load_dataset(DatasetKind::FinancialStatement, &codes, &fs.date, &fs.metrics)
                .await?;
            flatten_metric_paths(&mut records, &fs.metrics);
            Ok::<_, ScreenError>(records)
        };

        let (fundamental, financial_statement) = tokio::join!(fundamental, financial_statement);
        let merged = merge_by_code(fundamental?, financial_statement?);

        let filtered = filter_records(merged, &request.metrics_filter);
        let mut filtered = filter_records(filtered, &request.fs_metrics_filter);
        annotate_names(&mut filtered, &name_map(&stocks));

        info!(matched = filtered.len(), "screening complete");
        Ok(RecordSet::from_records(filtered))
    }

    /// Cache-first load of one dataset for every code.
    ///
    /// Cache file I/O runs on the blocking pool so both datasets can load at once.
    async fn load_dataset(
        &self,
        kind: DatasetKind,
        codes: &[String],
        date: &str,
        metrics: &[String],
    ) -> Result<Vec<StockRecord>, ScreenError> {
        let cache = Arc::clone(&self.cache);
        let (lookup_date, lookup_metrics) = (date.to_owned(), metrics.to_vec());
        match task::spawn_blocking(move || cache.get(kind, &lookup_date, &lookup_metrics)).await {
            Ok(Some(records)) => return Ok(records),
            Ok(None) => {}
            Err(error) => warn!(dataset = %kind, error = %error, "cache lookup task failed"),
        }

        info!(dataset = %kind, date, "cache miss, fetching from upstream");
        let fetched = self
            .fetcher
            .fetch_all(codes, date, metrics, self.endpoint(kind))
            .await?;

        if !fetched.is_empty() {
            let cache = Arc::clone(&self.cache);
            let (date, metrics, records) = (date.to_owned(), metrics.to_vec(), fetched.data.clone());
            let expire_days = self.expire_days;
            let stored = task::spawn_blocking(move || {
                cache.put(kind, &date, &records, &metrics, expire_days)
            })
            .await;
            match stored {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(dataset = %kind, error = %error, "failed to update cache"),
                Err(error) => warn!(dataset = %kind, error = %error, "cache update task failed"),
            }
        }
        Ok(fetched.data)
    }
}

impl std::fmt::Debug for ScreenerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenerService")
            .field("cache", &self.cache)
            .field("fundamental_url", &self.fundamental_url)
            .field("fs_url", &self.fs_url)
            .field("expire_days", &self.expire_days)
            .finish_non_exhaustive()
    }
}
