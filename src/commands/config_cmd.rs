use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# appunture configuration

# Path to SQLite database (default: platform data dir, appunture/appunture.db)
# database_path: appunture.db

api:
  base_url: http://localhost:3000/api
  # token: <bearer token>

sync:
  auto_sync: true
  max_attempts: 5
  image_max_attempts: 8
  initial_backoff_ms: 1000
  max_backoff_ms: 60000
  concurrency: 4
  request_timeout_secs: 20
  tick_interval_secs: 60
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&redacted(config))?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'appunture config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

/// The token never leaves the machine through `config show`.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(token) = config.api.token.as_mut() {
        token.value = "********".to_string();
    }
    config
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!("api.base_url: {}", config.api.base_url.value);
    println!("  source: {}", config.api.base_url.source);
    println!();

    match &config.api.token {
        Some(token) => {
            println!("api.token: ********");
            println!("  source: {}", token.source);
        }
        None => println!("api.token: (not set)"),
    }
    println!();

    let sync = &config.sync;
    println!("sync.auto_sync: {}", sync.auto_sync);
    println!("sync.max_attempts: {}", sync.max_attempts);
    println!("sync.image_max_attempts: {}", sync.image_max_attempts);
    println!("sync.initial_backoff_ms: {}", sync.initial_backoff_ms);
    println!("sync.max_backoff_ms: {}", sync.max_backoff_ms);
    println!("sync.concurrency: {}", sync.concurrency);
    println!("sync.request_timeout_secs: {}", sync.request_timeout_secs);
    println!("sync.tick_interval_secs: {}", sync.tick_interval_secs);
}
