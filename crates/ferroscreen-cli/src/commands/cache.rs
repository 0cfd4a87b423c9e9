use ferroscreen_core::{CacheStore, DatasetKind, ScreenerConfig};
use serde_json::{Map, Value};
use tracing::info;

use crate::cli::CacheCommand;
use crate::error::CliError;

pub fn run(command: &CacheCommand, config: &ScreenerConfig) -> Result<Value, CliError> {
    let store = CacheStore::new(config.cache_dir.clone());

    match command {
        CacheCommand::Prune { dataset } => {
            let kinds: Vec<DatasetKind> = match dataset {
                Some(dataset) => vec![(*dataset).into()],
                None => DatasetKind::ALL.to_vec(),
            };

            let mut pruned = Map::new();
            for kind in kinds {
                let removed = store.prune(kind)?;
                info!(dataset = %kind, removed, "pruned cache");
                pruned.insert(kind.as_str().to_owned(), Value::from(removed));
            }
            Ok(Value::Object(Map::from_iter([(
                String::from("pruned"),
                Value::Object(pruned),
            )])))
        }
    }
}
