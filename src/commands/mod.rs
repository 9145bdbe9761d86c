mod catalog;
mod config_cmd;
mod favorite;
mod image;
mod profile;
mod queue;
mod sync_cmd;

use clap::ValueEnum;

pub use catalog::{PointCommand, SymptomCommand};
pub use config_cmd::ConfigCommand;
pub use favorite::{FavoriteCommand, FavoriteSubcommand};
pub use image::{ImageCommand, ImageSubcommand};
pub use profile::ProfileCommand;
pub use queue::{QueueCommand, QueueSubcommand};
pub use sync_cmd::SyncCommand;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parses a `--data` argument. Request bodies are always JSON objects.
fn parse_data(data: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| format!("Invalid --data JSON: {}", e))?;
    if !value.is_object() {
        return Err("--data must be a JSON object".into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data() {
        let value = parse_data(r#"{"name": "Hegu", "code": "LI4"}"#).unwrap();
        assert_eq!(value["code"], "LI4");

        let err = parse_data("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));

        let err = parse_data("{not json").unwrap_err();
        assert!(err.to_string().contains("Invalid --data JSON"));
    }
}
