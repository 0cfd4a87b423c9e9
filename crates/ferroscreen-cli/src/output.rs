use std::io::{self, Write};

use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render(value: &Value, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_value(&mut out, value, format, pretty)?;
    out.flush()?;
    Ok(())
}

/// NDJSON prints each element of a `data` array on its own line; anything
/// without one is printed as a single line.
pub fn write_value<W: Write>(
    out: &mut W,
    value: &Value,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(value)?
            } else {
                serde_json::to_string(value)?
            };
            writeln!(out, "{payload}")?;
        }
        OutputFormat::Ndjson => match value.get("data").and_then(Value::as_array) {
            Some(records) => {
                for record in records {
                    writeln!(out, "{}", serde_json::to_string(record)?)?;
                }
            }
            None => writeln!(out, "{}", serde_json::to_string(value)?)?,
        },
    }
    Ok(())
}
