//! Merge and filter engine: pure transformations over stock records.

use std::collections::HashMap;

use serde_json::Value;

use crate::dataset::{MetricFilterSpec, StockRecord};

/// Walks a dotted path (`q.ps.np.t`) through nested objects.
pub fn extract_nested<'a>(record: &'a StockRecord, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next().filter(|segment| !segment.is_empty())?;
    segments.try_fold(record.get(first)?, |current, segment| {
        current.as_object()?.get(segment)
    })
}

/// Adds each dotted path as a top-level field holding the extracted value.
///
/// Paths that do not resolve add no key. Original nested fields stay.
pub fn flatten_metric_paths(records: &mut [StockRecord], paths: &[String]) {
    for record in records.iter_mut() {
        for path in paths {
            if let Some(value) = extract_nested(record, path).cloned() {
                record.insert(path.clone(), value);
            }
        }
    }
}

/// Left join of `secondary` onto `primary` by stock code.
///
/// Output order follows `primary`; a primary record without a partner passes
/// through unchanged. When `primary` is empty the secondary records are returned
/// as they are.
pub fn merge_by_code(primary: Vec<StockRecord>, secondary: Vec<StockRecord>) -> Vec<StockRecord> {
    if primary.is_empty() {
        return secondary;
    }

    let by_code: HashMap<String, StockRecord> = secondary
        .into_iter()
        .filter_map(|record| Some((record.stock_code()?.to_owned(), record)))
        .collect();

    primary
        .into_iter()
        .map(|mut record| {
            if let Some(partner) = record.stock_code().and_then(|code| by_code.get(code)) {
                record.overlay(partner);
            }
            record
        })
        .collect()
}

/// Numeric view of a field value: numbers, booleans and numeric strings.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Whether `record` satisfies every well-formed range of `spec`.
pub fn record_matches(record: &StockRecord, spec: &MetricFilterSpec) -> bool {
    spec.ranges().all(|(metric, range)| {
        record
            .get(metric)
            .and_then(coerce_f64)
            .is_some_and(|value| range.contains(value))
    })
}

/// Keeps the records matching `spec`, preserving order. An empty spec keeps all.
pub fn filter_records(records: Vec<StockRecord>, spec: &MetricFilterSpec) -> Vec<StockRecord> {
    if spec.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| record_matches(record, spec))
        .collect()
}

/// Sets `stockName` from the directory, keeping an existing non-empty name and
/// falling back to the stock code.
pub fn annotate_names(records: &mut [StockRecord], names: &HashMap<String, String>) {
    for record in records.iter_mut() {
        let code = record.stock_code().unwrap_or_default().to_owned();
        let name = match names.get(&code) {
            Some(name) => name.clone(),
            None => match record.stock_name() {
                Some(existing) if !existing.is_empty() => continue,
                _ => code,
            },
        };
        record.insert(StockRecord::NAME_FIELD, Value::String(name));
    }
}
