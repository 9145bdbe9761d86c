use clap::{Args, Subcommand};
use serde::Serialize;

use appunture_core::{OperationId, PendingImage, PendingOperation, QueueFilter};

use super::OutputFormat;
use crate::sync::Workspace;

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List queued changes
    List {
        /// Only show failed changes
        #[arg(long)]
        failed: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Put failed changes back in the queue
    Retry {
        /// Change ID
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Retry every failed change
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Drop failed changes
    Discard {
        /// Change ID
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Discard every failed change
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

#[derive(Serialize)]
struct QueueListing {
    operations: Vec<PendingOperation>,
    images: Vec<PendingImage>,
}

impl QueueCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        let session = &workspace.session;
        match &self.command {
            QueueSubcommand::List { failed, format } => {
                let filter = if *failed {
                    QueueFilter::failed()
                } else {
                    QueueFilter::all()
                };
                let listing = QueueListing {
                    operations: session.operations().list(&filter).await,
                    images: session.images().list(&filter).await,
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&listing)?);
                    }
                    OutputFormat::Text => print_listing(&listing),
                }
                Ok(())
            }

            QueueSubcommand::Retry { id, all } => {
                if *all {
                    let count = session.retry_all_failed().await;
                    println!("Requeued {} failed change(s)", count);
                } else {
                    let id = parse_id(id.as_deref())?;
                    session.retry_failed(id).await?;
                    println!("Requeued {}", id);
                }
                Ok(())
            }

            QueueSubcommand::Discard { id, all } => {
                if *all {
                    let count = session.clear_failed().await;
                    println!("Discarded {} failed change(s)", count);
                } else {
                    let id = parse_id(id.as_deref())?;
                    session.discard_failed(id).await?;
                    println!("Discarded {}", id);
                }
                Ok(())
            }
        }
    }
}

fn parse_id(id: Option<&str>) -> Result<OperationId, Box<dyn std::error::Error>> {
    let id = id.ok_or("Provide a change ID or --all")?;
    id.trim()
        .parse()
        .map_err(|_| format!("Invalid change ID: {}", id).into())
}

fn print_listing(listing: &QueueListing) {
    if listing.operations.is_empty() && listing.images.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!("{:<36}  {:<9}  {:>8}  CHANGE", "ID", "STATUS", "ATTEMPTS");
    println!("{}", "-".repeat(90));
    for op in &listing.operations {
        println!(
            "{:<36}  {:<9}  {:>8}  {} {} {}",
            op.id,
            op.status().to_string(),
            op.attempt_count(),
            op.kind,
            op.entity_type,
            op.target_id
        );
        if let Some(error) = op.last_error() {
            println!("{:>38}last error: {}", "", error);
        }
    }
    for image in &listing.images {
        println!(
            "{:<36}  {:<9}  {:>8}  upload {} {} ({})",
            image.id,
            image.status().to_string(),
            image.delivery.attempt_count,
            image.entity_type,
            image.target_id,
            image.file_name()
        );
        if let Some(error) = &image.delivery.last_error {
            println!("{:>38}last error: {}", "", error);
        }
    }
    println!(
        "\nTotal: {} change(s), {} image(s)",
        listing.operations.len(),
        listing.images.len()
    );
}
