//! Sync CLI commands for replaying the offline queue against the server.

use clap::{Args, Subcommand};
use serde::Serialize;

use appunture_core::{PassOutcome, SyncError, SyncReport, SyncStatus};

use super::OutputFormat;
use crate::config::Config;
use crate::sync::{FavoritesRefresh, SessionMode, Workspace};

#[derive(Serialize)]
struct SyncOutput<'a> {
    sync: &'a PassOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    favorites: Option<FavoritesRefresh>,
}

/// Sync queued changes with the server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub command: Option<SyncSubcommand>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
pub enum SyncSubcommand {
    /// Show connectivity and queue status
    Status,

    /// Keep syncing in the foreground until Ctrl-C
    Watch,
}

impl SyncCommand {
    pub fn session_mode(&self) -> SessionMode {
        match self.command {
            Some(SyncSubcommand::Watch) => SessionMode::Watch,
            _ => SessionMode::OneShot,
        }
    }

    pub async fn run(
        &self,
        workspace: &Workspace,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(workspace, config).await,
            Some(SyncSubcommand::Status) => self.status(workspace, config).await,
            Some(SyncSubcommand::Watch) => self.watch(workspace, config).await,
        }
    }

    async fn sync(
        &self,
        workspace: &Workspace,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (outcome, favorites) = match workspace.sync_all().await {
            Ok(result) => result,
            Err(SyncError::Offline) => {
                let queued = workspace.session.status();
                return Err(format!(
                    "Server unreachable at {}; {} change(s) stay queued",
                    config.api.base_url.value,
                    queued.pending_operations + queued.pending_images
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        match self.format {
            OutputFormat::Json => {
                let output = SyncOutput {
                    sync: &outcome,
                    favorites,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => match &outcome {
                PassOutcome::Completed(report) => {
                    print_report(report, &workspace.session.status());
                    if let Some(refresh) = favorites {
                        print_favorites(&refresh);
                    }
                    workspace.session.acknowledge_notification();
                }
                PassOutcome::Skipped { reason } => println!("Sync skipped: {}", reason),
            },
        }
        Ok(())
    }

    async fn status(
        &self,
        workspace: &Workspace,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        workspace.session.check_connection().await;
        let status = workspace.session.status();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                println!("Server:    {}", config.api.base_url.value);
                println!(
                    "Status:    {}",
                    if status.is_online { "online" } else { "offline" }
                );
                println!(
                    "Auto-sync: {}",
                    if config.sync.auto_sync {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
                match status.last_sync {
                    Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("Last sync: never"),
                }
                println!();
                println!("Pending changes: {}", status.pending_operations);
                println!("Pending images:  {}", status.pending_images);
                println!("Failed:          {}", status.failed_count());

                for op in &status.failed_operations {
                    println!(
                        "  ✗ {} - {}",
                        op,
                        op.last_error().unwrap_or("unknown error")
                    );
                }
                for image in &status.failed_images {
                    println!(
                        "  ✗ {} - {}",
                        image,
                        image.delivery.last_error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        Ok(())
    }

    async fn watch(
        &self,
        workspace: &Workspace,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let session = &workspace.session;
        let mut updates = session.subscribe();

        eprintln!(
            "Watching {} (Ctrl-C to stop)",
            config.api.base_url.value
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut last_line = String::new();
        loop {
            let status = updates.borrow_and_update().clone();

            let line = status_line(&status);
            if line != last_line {
                match self.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string(&status)?),
                    OutputFormat::Text => println!("{}", line),
                }
                last_line = line;
            }
            if let Some(message) = &status.notification_message {
                if matches!(self.format, OutputFormat::Text) {
                    println!("{}", message);
                }
                session.acknowledge_notification();
            }

            tokio::select! {
                result = &mut ctrl_c => {
                    result?;
                    break;
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        eprintln!("Stopping...");
        Ok(())
    }
}

fn print_report(report: &SyncReport, status: &SyncStatus) {
    println!("Syncing with server...");
    println!();

    if report.dispatched == 0 {
        println!("Nothing to sync.");
        return;
    }

    println!("  ✓ {} change(s) synced", report.succeeded);
    if report.images_uploaded > 0 {
        println!("  ✓ {} image(s) uploaded", report.images_uploaded);
    }
    if report.retries > 0 {
        println!("  ↻ {} attempt(s) retried", report.retries);
    }
    if !report.failed.is_empty() {
        println!("  ✗ {} failed", report.failed.len());
    }
    println!();

    if report.interrupted {
        println!("Connection lost; remaining changes stay queued.");
    } else if let Some(message) = &status.notification_message {
        println!("{}", message);
    } else if status.failed_count() > 0 {
        println!("Some changes failed. See 'appunture queue list --failed'.");
    } else {
        println!("Sync incomplete; run 'appunture sync' again.");
    }
}

fn print_favorites(refresh: &FavoritesRefresh) {
    if refresh.added + refresh.removed > 0 {
        println!(
            "Favorites updated from server: {} added, {} removed ({} total)",
            refresh.added, refresh.removed, refresh.total
        );
    }
}

fn status_line(status: &SyncStatus) -> String {
    let mut line = format!(
        "[{}] {} pending, {} image(s), {} failed",
        if status.is_online { "online" } else { "offline" },
        status.pending_operations,
        status.pending_images,
        status.failed_count()
    );
    if status.sync_in_progress {
        line.push_str(" (syncing)");
    }
    for upload in &status.uploads {
        line.push_str(&format!(" upload {}%", upload.percent));
    }
    line
}
