//! Listing of the stocks in the market, with a once-per-day file cache.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ScreenerConfig;
use crate::dataset::today;
use crate::upstream::{UpstreamClient, UpstreamError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("stock directory unavailable: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("stock directory is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockInfo {
    pub stock_code: String,
    pub stock_name: String,
}

impl StockInfo {
    pub fn new(stock_code: impl Into<String>, stock_name: impl Into<String>) -> Self {
        Self {
            stock_code: stock_code.into(),
            stock_name: stock_name.into(),
        }
    }
}

/// Source of the full stock universe for screening.
pub trait StockDirectory: Send + Sync {
    fn stocks<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StockInfo>, DirectoryError>> + Send + 'a>>;
}

pub fn stock_codes(stocks: &[StockInfo]) -> Vec<String> {
    stocks.iter().map(|stock| stock.stock_code.clone()).collect()
}

pub fn name_map(stocks: &[StockInfo]) -> HashMap<String, String> {
    stocks
        .iter()
        .map(|stock| (stock.stock_code.clone(), stock.stock_name.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DirectorySnapshot {
    date: String,
    data: Vec<StockInfo>,
}

/// Directory backed by the upstream company endpoint.
#[derive(Debug)]
pub struct UpstreamDirectory {
    client: UpstreamClient,
    token: String,
    endpoint: String,
    cache_file: PathBuf,
    snapshot: RwLock<Option<DirectorySnapshot>>,
}

impl UpstreamDirectory {
    pub fn new(
        client: UpstreamClient,
        token: impl Into<String>,
        endpoint: impl Into<String>,
        cache_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            token: token.into(),
            endpoint: endpoint.into(),
            cache_file: cache_file.into(),
            snapshot: RwLock::new(None),
        }
    }

    pub fn from_config(client: UpstreamClient, config: &ScreenerConfig) -> Self {
        Self::new(
            client,
            config.token.clone(),
            config.company_url.clone(),
            config.directory_cache_file(),
        )
    }

    async fn load(&self) -> Result<Vec<StockInfo>, DirectoryError> {
        let date = today();

        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            if snapshot.date == date {
                return Ok(snapshot.data.clone());
            }
        }

        let mut guard = self.snapshot.write().await;
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.date == date {
                return Ok(snapshot.data.clone());
            }
        }

        let snapshot = match self.read_cache_file(&date) {
            Some(snapshot) => snapshot,
            None => {
                let stocks = self.fetch().await?;
                let snapshot = DirectorySnapshot { date, data: stocks };
                self.write_cache_file(&snapshot);
                snapshot
            }
        };

        let stocks = snapshot.data.clone();
        *guard = Some(snapshot);
        Ok(stocks)
    }

    async fn fetch(&self) -> Result<Vec<StockInfo>, DirectoryError> {
        let payload = json!({
            "token": self.token,
            "fsTableType": "non_financial",
        });
        let response = self.client.request_json(&self.endpoint, &payload).await?;

        let items = match response.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        };
        let stocks: Vec<StockInfo> = items.iter().filter_map(stock_info).collect();

        info!(
            total = response.get("total").and_then(serde_json::Value::as_u64),
            stocks = stocks.len(),
            "fetched stock directory"
        );
        Ok(stocks)
    }

    fn read_cache_file(&self, date: &str) -> Option<DirectorySnapshot> {
        let contents = match fs::read_to_string(&self.cache_file) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %self.cache_file.display(), error = %error, "failed to read directory cache");
                return None;
            }
        };

        match serde_json::from_str::<DirectorySnapshot>(&contents) {
            Ok(snapshot) if snapshot.date == date => {
                debug!(stocks = snapshot.data.len(), "using cached stock directory");
                Some(snapshot)
            }
            Ok(_) => None,
            Err(error) => {
                warn!(path = %self.cache_file.display(), error = %error, "directory cache is malformed");
                None
            }
        }
    }

    fn write_cache_file(&self, snapshot: &DirectorySnapshot) {
        let result = serde_json::to_vec_pretty(snapshot)
            .map_err(std::io::Error::from)
            .and_then(|bytes| {
                if let Some(parent) = self.cache_file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.cache_file, bytes)
            });
        if let Err(error) = result {
            warn!(path = %self.cache_file.display(), error = %error, "failed to write directory cache");
        }
    }
}

impl StockDirectory for UpstreamDirectory {
    fn stocks<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StockInfo>, DirectoryError>> + Send + 'a>> {
        Box::pin(self.load())
    }
}

/// Display name is the first non-empty of `name`, `nameCn`, `stockName`, else the code.
fn stock_info(item: &Value) -> Option<StockInfo> {
    let code = item.get("stockCode")?.as_str()?;
    let name = ["name", "nameCn", "stockName"]
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .unwrap_or(code);
    Some(StockInfo::new(code, name))
}
