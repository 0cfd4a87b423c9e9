use std::fs;

use ferroscreen_core::{FilterConfigStore, ScreenerConfig};
use serde_json::{json, Value};

use crate::cli::FilterConfigCommand;
use crate::error::CliError;

pub fn run(command: &FilterConfigCommand, config: &ScreenerConfig) -> Result<Value, CliError> {
    let store = FilterConfigStore::new(config.filter_config_file());

    match command {
        FilterConfigCommand::Show => Ok(json!({ "data": store.load() })),
        FilterConfigCommand::Save { file } => {
            let raw: Value = serde_json::from_str(&fs::read_to_string(file)?)?;
            let fields = match raw {
                Value::Array(fields) => fields,
                Value::Object(mut document) => match document.remove("data") {
                    Some(Value::Array(fields)) => fields,
                    _ => {
                        return Err(CliError::InvalidRequest(String::from(
                            "expected a JSON array of filter fields",
                        )))
                    }
                },
                _ => {
                    return Err(CliError::InvalidRequest(String::from(
                        "expected a JSON array of filter fields",
                    )))
                }
            };
            let saved = store.save(&fields)?;
            Ok(json!({ "saved": saved.len(), "data": saved }))
        }
    }
}
