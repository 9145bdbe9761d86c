use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod db;
mod sync;

use commands::{
    ConfigCommand, FavoriteCommand, FavoriteSubcommand, ImageCommand, ImageSubcommand,
    PointCommand, ProfileCommand, QueueCommand, QueueSubcommand, SymptomCommand, SyncCommand,
};
use config::Config;
use sync::{try_auto_sync, SessionMode, Workspace};

#[derive(Parser)]
#[command(name = "appunture")]
#[command(version)]
#[command(about = "Appunture client with an offline change queue", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage favorite points
    Favorite(FavoriteCommand),

    /// Queue changes to acupuncture points
    Point(PointCommand),

    /// Queue changes to symptoms
    Symptom(SymptomCommand),

    /// Queue profile changes
    Profile(ProfileCommand),

    /// Queue image uploads
    Image(ImageCommand),

    /// Inspect and manage the offline queue
    Queue(QueueCommand),

    /// Sync queued changes with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout stays parseable with `--format json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("appunture=info,appunture_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config, cli_config_path),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let mode = match &command {
        Commands::Sync(cmd) => cmd.session_mode(),
        _ => SessionMode::OneShot,
    };
    let workspace = Workspace::open(&config, mode).await?;

    let result = execute_command(&command, &workspace, &config).await;

    // Auto-sync AFTER write commands (only if command succeeded)
    if result.is_ok() && is_write_command(&command) {
        try_auto_sync(&workspace, &config).await;
    }

    let closed = workspace.close().await;
    result?;
    closed?;
    Ok(())
}

async fn execute_command(
    command: &Commands,
    workspace: &Workspace,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Favorite(cmd) => cmd.run(workspace).await,
        Commands::Point(cmd) => cmd.run(workspace).await,
        Commands::Symptom(cmd) => cmd.run(workspace).await,
        Commands::Profile(cmd) => cmd.run(workspace).await,
        Commands::Image(cmd) => cmd.run(workspace).await,
        Commands::Queue(cmd) => cmd.run(workspace).await,
        Commands::Sync(cmd) => cmd.run(workspace, config).await,
        Commands::Config(_) => Ok(()),
    }
}

/// Returns true if the command queued something that should go out right away.
fn is_write_command(cmd: &Commands) -> bool {
    match cmd {
        Commands::Favorite(f) => !matches!(f.command, FavoriteSubcommand::List { .. }),
        Commands::Image(i) => !matches!(i.command, ImageSubcommand::Show { .. }),
        Commands::Point(_) | Commands::Symptom(_) | Commands::Profile(_) => true,
        Commands::Queue(q) => matches!(q.command, QueueSubcommand::Retry { .. }),
        Commands::Sync(_) | Commands::Config(_) => false,
    }
}
