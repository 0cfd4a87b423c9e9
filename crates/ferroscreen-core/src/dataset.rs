//! Dataset kinds, stock records and filter specifications.
//!
//! Records are schemaless: every field is a [`serde_json::Value`], so nested
//! financial statement structures survive untouched until a dotted path is
//! extracted from them.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ValidationError;

/// Today's date as `YYYY-MM-DD`, in local time when the offset is known.
pub fn today() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.date()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

/// The two upstream datasets. Each has its own endpoint and cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Fundamental,
    FinancialStatement,
}

impl DatasetKind {
    pub const ALL: [Self; 2] = [Self::Fundamental, Self::FinancialStatement];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fundamental => "fundamental",
            Self::FinancialStatement => "financial_statement",
        }
    }

    pub const fn cache_file_name(self) -> &'static str {
        match self {
            Self::Fundamental => "fundamental_cache.json",
            Self::FinancialStatement => "fs_cache.json",
        }
    }
}

impl Display for DatasetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stock's fields, keyed by metric name plus `stockCode`/`stockName`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecord(Map<String, Value>);

impl StockRecord {
    pub const CODE_FIELD: &'static str = "stockCode";
    pub const NAME_FIELD: &'static str = "stockName";

    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object; any other value is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn stock_code(&self) -> Option<&str> {
        self.0.get(Self::CODE_FIELD).and_then(Value::as_str)
    }

    pub fn stock_name(&self) -> Option<&str> {
        self.0.get(Self::NAME_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Copies every field of `other` onto this record; `other` wins on collisions.
    pub fn overlay(&mut self, other: &StockRecord) {
        for (field, value) in &other.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for StockRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// `{total, data}` result shape returned by every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub total: usize,
    pub data: Vec<StockRecord>,
}

impl RecordSet {
    pub fn from_records(data: Vec<StockRecord>) -> Self {
        Self {
            total: data.len(),
            data,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Inclusive numeric range; a `None` bound is open on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricRange {
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Parses a JSON `[min, max]` pair. Anything else is not a range.
    pub fn from_json(value: &Value) -> Option<Self> {
        let [min, max] = value.as_array()?.as_slice() else {
            return None;
        };
        Some(Self::new(json_bound(min)?, json_bound(max)?))
    }
}

fn json_bound(value: &Value) -> Option<Option<f64>> {
    match value {
        Value::Null => Some(None),
        Value::Number(number) => number.as_f64().map(Some),
        _ => None,
    }
}

/// Metric key → range map. Malformed ranges are kept so their keys still count
/// as requested metrics, but they never reject a record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct MetricFilterSpec {
    entries: BTreeMap<String, Option<MetricRange>>,
}

impl MetricFilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, metric: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.insert(metric, MetricRange::new(min, max));
        self
    }

    pub fn insert(&mut self, metric: impl Into<String>, range: MetricRange) {
        self.entries.insert(metric.into(), Some(range));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every filtered key, including keys whose range was malformed.
    pub fn metric_keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Well-formed ranges only.
    pub fn ranges(&self) -> impl Iterator<Item = (&str, &MetricRange)> {
        self.entries
            .iter()
            .filter_map(|(metric, range)| range.as_ref().map(|range| (metric.as_str(), range)))
    }
}

impl TryFrom<Value> for MetricFilterSpec {
    type Error = ValidationError;

    /// `null` reads as an empty spec; anything but an object is rejected.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self::from(map)),
            _ => Err(ValidationError::NotAnObject { field: "metrics filter" }),
        }
    }
}

impl From<Map<String, Value>> for MetricFilterSpec {
    fn from(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .map(|(metric, raw)| {
                let range = MetricRange::from_json(&raw);
                if range.is_none() {
                    debug!(metric = %metric, range = %raw, "ignoring malformed filter range");
                }
                (metric, range)
            })
            .collect();
        Self { entries }
    }
}
