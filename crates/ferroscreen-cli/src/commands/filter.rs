use std::fs;
use std::path::Path;

use ferroscreen_core::{FilterRequest, MetricFilterSpec, ScreenerService};
use serde_json::Value;

use crate::cli::{FilterArgs, RangeFilter};
use crate::error::CliError;

pub async fn run(args: &FilterArgs, service: &ScreenerService) -> Result<Value, CliError> {
    let request = match &args.request {
        Some(path) => read_request(path)?,
        None => request_from_flags(args),
    };
    let result = service.filter_stocks(&request).await?;
    Ok(serde_json::to_value(result)?)
}

fn read_request(path: &Path) -> Result<FilterRequest, CliError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|error| CliError::InvalidRequest(format!("{}: {error}", path.display())))
}

fn request_from_flags(args: &FilterArgs) -> FilterRequest {
    FilterRequest {
        metrics_filter: spec_from(&args.filters),
        date: args.date.clone(),
        metrics_list: non_empty(&args.metrics),
        fs_metrics_filter: spec_from(&args.fs_filters),
        fs_date: args.fs_date.clone(),
        fs_metrics_list: non_empty(&args.fs_metrics),
    }
}

fn spec_from(filters: &[RangeFilter]) -> MetricFilterSpec {
    let mut spec = MetricFilterSpec::new();
    for filter in filters {
        spec.insert(filter.metric.clone(), filter.range);
    }
    spec
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}
