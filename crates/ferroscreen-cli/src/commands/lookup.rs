use ferroscreen_core::{today, ScreenerService};
use serde_json::Value;

use crate::cli::LookupArgs;
use crate::error::CliError;

pub async fn fundamentals(args: &LookupArgs, service: &ScreenerService) -> Result<Value, CliError> {
    let date = args.date.clone().unwrap_or_else(today);
    let result = service
        .get_stock_fundamentals(&args.codes, &args.metrics, &date)
        .await?;
    Ok(serde_json::to_value(result)?)
}

pub async fn financial_statements(
    args: &LookupArgs,
    service: &ScreenerService,
) -> Result<Value, CliError> {
    let date = args.date.clone().unwrap_or_else(today);
    let result = service
        .get_stock_fs_data(&args.codes, &args.metrics, &date)
        .await?;
    Ok(serde_json::to_value(result)?)
}
