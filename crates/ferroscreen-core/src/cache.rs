//! Date-keyed, TTL and coverage aware cache with one JSON file per dataset.
//!
//! An entry is served only while it is unexpired and its stored metric list is
//! a superset of the requested one. Every read-modify-write of a namespace file
//! holds that namespace's lock, and files are replaced atomically through a
//! temporary sibling and a rename.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::dataset::{DatasetKind, StockRecord};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {namespace} cache: {source}")]
    Serialize {
        namespace: DatasetKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Vec<StockRecord>,
    pub metrics_list: Vec<String>,
    /// Unix seconds.
    pub expire_at: f64,
    pub saved_at: String,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: f64) -> bool {
        now >= self.expire_at
    }

    /// Whether every requested metric was part of the original fetch.
    pub fn covers(&self, metrics: &[String]) -> bool {
        let stored: HashSet<&str> = self.metrics_list.iter().map(String::as_str).collect();
        metrics.iter().all(|metric| stored.contains(metric.as_str()))
    }
}

type Namespace = BTreeMap<String, CacheEntry>;

#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    fundamental_lock: Mutex<()>,
    fs_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fundamental_lock: Mutex::new(()),
            fs_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: DatasetKind) -> PathBuf {
        self.dir.join(kind.cache_file_name())
    }

    /// Cached records for `date`, or `None` on any kind of miss.
    ///
    /// Expired entries of the namespace are swept and the file rewritten before
    /// the lookup. A failed rewrite is logged and does not affect the result.
    pub fn get(&self, kind: DatasetKind, date: &str, metrics: &[String]) -> Option<Vec<StockRecord>> {
        self.get_at(kind, date, metrics, OffsetDateTime::now_utc())
    }

    pub fn get_at(
        &self,
        kind: DatasetKind,
        date: &str,
        metrics: &[String],
        now: OffsetDateTime,
    ) -> Option<Vec<StockRecord>> {
        let _guard = self.lock(kind);
        let mut namespace = self.load(kind);

        let swept = sweep(&mut namespace, unix_seconds(now));
        if swept > 0 {
            info!(namespace = %kind, swept, "removed expired cache entries");
            if let Err(error) = self.persist(kind, &namespace) {
                warn!(namespace = %kind, error = %error, "failed to persist swept cache");
            }
        }

        let Some(entry) = namespace.get(date) else {
            debug!(namespace = %kind, date, "cache miss: no live entry");
            return None;
        };
        if entry.metrics_list.is_empty() || !entry.covers(metrics) {
            debug!(namespace = %kind, date, "cache miss: metrics not covered");
            return None;
        }

        info!(namespace = %kind, date, records = entry.data.len(), "cache hit");
        Some(entry.data.clone())
    }

    /// Stores `records` under `date`, sweeping expired entries first.
    pub fn put(
        &self,
        kind: DatasetKind,
        date: &str,
        records: &[StockRecord],
        metrics: &[String],
        expire_days: u32,
    ) -> Result<(), CacheError> {
        self.put_at(kind, date, records, metrics, expire_days, OffsetDateTime::now_utc())
    }

    pub fn put_at(
        &self,
        kind: DatasetKind,
        date: &str,
        records: &[StockRecord],
        metrics: &[String],
        expire_days: u32,
        now: OffsetDateTime,
    ) -> Result<(), CacheError> {
        let _guard = self.lock(kind);
        let mut namespace = self.load(kind);

        let now_seconds = unix_seconds(now);
        let swept = sweep(&mut namespace, now_seconds);
        if swept > 0 {
            info!(namespace = %kind, swept, "removed expired cache entries");
        }

        namespace.insert(
            date.to_owned(),
            CacheEntry {
                data: records.to_vec(),
                metrics_list: metrics.to_vec(),
                expire_at: now_seconds + f64::from(expire_days) * SECONDS_PER_DAY,
                saved_at: saved_at_label(now),
            },
        );

        self.persist(kind, &namespace)?;
        info!(namespace = %kind, date, records = records.len(), "cache entry saved");
        Ok(())
    }

    /// Drops every expired entry of `kind` and returns how many were removed.
    pub fn prune(&self, kind: DatasetKind) -> Result<usize, CacheError> {
        self.prune_at(kind, OffsetDateTime::now_utc())
    }

    pub fn prune_at(&self, kind: DatasetKind, now: OffsetDateTime) -> Result<usize, CacheError> {
        let _guard = self.lock(kind);
        let mut namespace = self.load(kind);

        let swept = sweep(&mut namespace, unix_seconds(now));
        if swept > 0 {
            self.persist(kind, &namespace)?;
        }
        Ok(swept)
    }

    /// Every entry of `kind` after migration, keyed by date.
    pub fn entries(&self, kind: DatasetKind) -> BTreeMap<String, CacheEntry> {
        let _guard = self.lock(kind);
        self.load(kind)
    }

    fn lock(&self, kind: DatasetKind) -> MutexGuard<'_, ()> {
        let lock = match kind {
            DatasetKind::Fundamental => &self.fundamental_lock,
            DatasetKind::FinancialStatement => &self.fs_lock,
        };
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads and migrates a namespace file. Unreadable files read as empty.
    fn load(&self, kind: DatasetKind) -> Namespace {
        let path = self.path_for(kind);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Namespace::new(),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read cache file");
                return Namespace::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(document) => migrate_document(kind, document),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "cache file is not valid JSON");
                Namespace::new()
            }
        }
    }

    fn persist(&self, kind: DatasetKind, namespace: &Namespace) -> Result<(), CacheError> {
        let path = self.path_for(kind);
        let serialized = serde_json::to_vec_pretty(namespace).map_err(|source| {
            CacheError::Serialize {
                namespace: kind,
                source,
            }
        })?;

        let write_error = |source| CacheError::Write {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_error)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(write_error)?;
        fs::rename(&temp_path, &path).map_err(write_error)
    }
}

fn sweep(namespace: &mut Namespace, now: f64) -> usize {
    let before = namespace.len();
    namespace.retain(|_, entry| !entry.is_expired_at(now));
    before - namespace.len()
}

/// Brings any stored shape up to the current entry format.
///
/// Entries lacking `expireAt` or `metricsList` become expired entries with no
/// coverage, and `{total, data}` envelopes are unwrapped to their record list.
fn migrate_document(kind: DatasetKind, document: Value) -> Namespace {
    let Value::Object(entries) = document else {
        warn!(namespace = %kind, "cache document is not an object, ignoring it");
        return Namespace::new();
    };

    let mut migrated = 0_usize;
    let namespace: Namespace = entries
        .into_iter()
        .map(|(date, raw)| {
            let (entry, legacy) = migrate_entry(raw);
            if legacy {
                migrated += 1;
            }
            (date, entry)
        })
        .collect();

    if migrated > 0 {
        debug!(namespace = %kind, migrated, "migrated legacy cache entries");
    }
    namespace
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    metrics_list: Option<Vec<String>>,
    #[serde(default)]
    expire_at: Option<f64>,
    #[serde(default)]
    saved_at: Option<String>,
}

fn migrate_entry(raw: Value) -> (CacheEntry, bool) {
    let stored = match raw {
        Value::Object(_) => serde_json::from_value::<StoredEntry>(raw).ok(),
        Value::Array(_) => Some(StoredEntry {
            data: raw,
            metrics_list: None,
            expire_at: None,
            saved_at: None,
        }),
        _ => None,
    };

    let Some(stored) = stored else {
        return (expired_entry(Vec::new(), String::new()), true);
    };

    let data = stored_records(stored.data);
    let saved_at = stored.saved_at.unwrap_or_default();
    match (stored.expire_at, stored.metrics_list) {
        (Some(expire_at), Some(metrics_list)) if !metrics_list.is_empty() => (
            CacheEntry {
                data,
                metrics_list,
                expire_at,
                saved_at,
            },
            false,
        ),
        _ => (expired_entry(data, saved_at), true),
    }
}

fn expired_entry(data: Vec<StockRecord>, saved_at: String) -> CacheEntry {
    CacheEntry {
        data,
        metrics_list: Vec::new(),
        expire_at: 0.0,
        saved_at,
    }
}

fn stored_records(data: Value) -> Vec<StockRecord> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items.into_iter().filter_map(StockRecord::from_value).collect()
}

fn unix_seconds(now: OffsetDateTime) -> f64 {
    now.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

fn saved_at_label(now: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    now.format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn metrics(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn coverage_is_a_subset_check() {
        let entry = CacheEntry {
            data: Vec::new(),
            metrics_list: metrics(&["pe_ttm", "pb", "mc"]),
            expire_at: 10.0,
            saved_at: String::new(),
        };

        assert!(entry.covers(&metrics(&["pb", "pe_ttm"])));
        assert!(entry.covers(&[]));
        assert!(!entry.covers(&metrics(&["pe_ttm", "dyr"])));
    }

    #[test]
    fn current_entries_survive_migration() {
        let (entry, legacy) = migrate_entry(json!({
            "data": [{"stockCode": "00700"}],
            "metricsList": ["pe_ttm"],
            "expireAt": 1_900_000_000.5,
            "savedAt": "2030-03-17 08:00:00",
        }));

        assert!(!legacy);
        assert_eq!(entry.expire_at, 1_900_000_000.5);
        assert_eq!(entry.data.len(), 1);
    }

    #[test]
    fn envelopes_are_unwrapped_and_keep_their_metadata() {
        let (entry, legacy) = migrate_entry(json!({
            "data": {"total": 2, "data": [{"stockCode": "00700"}, {"stockCode": "00005"}]},
            "metricsList": ["pe_ttm"],
            "expireAt": 1_900_000_000.0,
        }));

        assert!(!legacy);
        assert_eq!(entry.data.len(), 2);
    }

    #[test]
    fn legacy_entries_become_expired_without_coverage() {
        let (entry, legacy) = migrate_entry(json!({"data": [{"stockCode": "00700"}]}));
        assert!(legacy);
        assert!(entry.metrics_list.is_empty());
        assert!(entry.is_expired_at(0.0));

        let (entry, legacy) = migrate_entry(json!([{"stockCode": "00700"}]));
        assert!(legacy);
        assert_eq!(entry.data.len(), 1);

        let (entry, legacy) = migrate_entry(json!("garbage"));
        assert!(legacy);
        assert!(entry.data.is_empty());
    }

    #[test]
    fn saved_at_uses_a_second_resolution_label() {
        assert_eq!(
            saved_at_label(datetime!(2030-03-17 08:05:09 UTC)),
            "2030-03-17 08:05:09"
        );
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let mut namespace = Namespace::new();
        for (date, expire_at) in [("2030-01-01", 5.0), ("2030-01-02", 50.0)] {
            namespace.insert(
                date.to_owned(),
                CacheEntry {
                    data: Vec::new(),
                    metrics_list: metrics(&["pe_ttm"]),
                    expire_at,
                    saved_at: String::new(),
                },
            );
        }

        assert_eq!(sweep(&mut namespace, 10.0), 1);
        assert!(namespace.contains_key("2030-01-02"));
    }
}
