//! Persisted list of filterable fields shown to screening clients.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::DatasetKind;

pub const FILTER_CONFIG_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("filter field #{index} is invalid: {reason}")]
    InvalidField { index: usize, reason: String },

    #[error("failed to write filter config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize filter config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One filterable field. Extra keys (units, formatting hints) are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: DatasetKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct FilterConfigDocument<'a> {
    version: u32,
    data: &'a [FilterField],
}

#[derive(Debug, Clone)]
pub struct FilterConfigStore {
    path: PathBuf,
}

impl FilterConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored fields; a missing or unreadable file reads as an empty list.
    pub fn load(&self) -> Vec<FilterField> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to read filter config");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(document) => migrate(document),
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "filter config is not valid JSON");
                Vec::new()
            }
        }
    }

    /// Validates and writes `fields`, replacing the stored list.
    pub fn save(&self, fields: &[Value]) -> Result<Vec<FilterField>, FilterConfigError> {
        let fields = fields
            .iter()
            .enumerate()
            .map(|(index, raw)| parse_field(index, raw.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let document = FilterConfigDocument {
            version: FILTER_CONFIG_VERSION,
            data: &fields,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let write_error = |source| FilterConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&self.path, bytes).map_err(write_error)?;

        info!(path = %self.path.display(), fields = fields.len(), "saved filter config");
        Ok(fields)
    }
}

fn parse_field(index: usize, raw: Value) -> Result<FilterField, FilterConfigError> {
    let invalid = |reason: &str| FilterConfigError::InvalidField {
        index,
        reason: reason.to_owned(),
    };

    let Value::Object(mut fields) = raw else {
        return Err(invalid("expected an object"));
    };
    if !fields.get("key").is_some_and(Value::is_string) {
        return Err(invalid("`key` must be a string"));
    }
    if !fields.get("label").is_some_and(Value::is_string) {
        return Err(invalid("`label` must be a string"));
    }
    fields
        .entry("type")
        .or_insert_with(|| Value::String(DatasetKind::Fundamental.as_str().to_owned()));

    serde_json::from_value(Value::Object(fields)).map_err(|error| invalid(&error.to_string()))
}

/// Upgrades a stored document. Version 1 had no `type`; its fields are fundamental.
fn migrate(document: Value) -> Vec<FilterField> {
    let (version, items) = match document {
        Value::Object(mut map) => {
            let version = map.get("version").and_then(Value::as_u64).unwrap_or(1);
            match map.remove("data") {
                Some(Value::Array(items)) => (version, items),
                _ => (version, Vec::new()),
            }
        }
        Value::Array(items) => (1, items),
        _ => (1, Vec::new()),
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut item)| {
            if version < u64::from(FILTER_CONFIG_VERSION) {
                if let Value::Object(fields) = &mut item {
                    fields
                        .entry("type")
                        .or_insert_with(|| Value::String(DatasetKind::Fundamental.as_str().to_owned()));
                }
            }
            match serde_json::from_value::<FilterField>(item) {
                Ok(field) => Some(field),
                Err(error) => {
                    warn!(index, error = %error, "skipping invalid filter field");
                    None
                }
            }
        })
        .collect()
}
