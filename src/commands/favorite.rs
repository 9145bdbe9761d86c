use clap::{Args, Subcommand};

use appunture_core::{EntityType, NewOperation, QueueFilter};

use super::OutputFormat;
use crate::sync::Workspace;

#[derive(Args)]
pub struct FavoriteCommand {
    #[command(subcommand)]
    pub command: FavoriteSubcommand,
}

#[derive(Subcommand)]
pub enum FavoriteSubcommand {
    /// Mark a point as favorite
    Add {
        /// Point ID
        point_id: String,
    },

    /// Remove a point from favorites
    Remove {
        /// Point ID
        point_id: String,
    },

    /// List favorite points
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl FavoriteCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            FavoriteSubcommand::Add { point_id } => {
                let point_id = non_empty(point_id)?;
                if workspace.favorites.contains(point_id).await? {
                    println!("Point {} is already a favorite", point_id);
                    return Ok(());
                }
                workspace.favorites.add(point_id).await?;

                let op = workspace
                    .session
                    .enqueue(NewOperation::add_favorite(point_id))
                    .await;
                println!("Added point {} to favorites", point_id);
                println!("Queued: {}", op);
                Ok(())
            }

            FavoriteSubcommand::Remove { point_id } => {
                let point_id = non_empty(point_id)?;
                if !workspace.favorites.remove(point_id).await? {
                    println!("Point {} is not a favorite", point_id);
                    return Ok(());
                }

                let op = workspace
                    .session
                    .enqueue(NewOperation::remove_favorite(point_id))
                    .await;
                println!("Removed point {} from favorites", point_id);
                println!("Queued: {}", op);
                Ok(())
            }

            FavoriteSubcommand::List { format } => {
                let favorites = workspace.favorites.list().await?;
                let unsynced: Vec<String> = workspace
                    .session
                    .operations()
                    .list(&QueueFilter::active().entity(EntityType::Favorite))
                    .await
                    .into_iter()
                    .map(|op| op.target_id)
                    .collect();

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&favorites)?);
                    }
                    OutputFormat::Text => {
                        if favorites.is_empty() {
                            println!("No favorites");
                            return Ok(());
                        }
                        for favorite in &favorites {
                            let marker = if unsynced.contains(&favorite.point_id) {
                                "  (not synced)"
                            } else {
                                ""
                            };
                            println!("{}{}", favorite.point_id, marker);
                        }
                        println!("\nTotal: {} favorite(s)", favorites.len());
                    }
                }
                Ok(())
            }
        }
    }
}

fn non_empty(point_id: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let point_id = point_id.trim();
    if point_id.is_empty() {
        return Err("Point ID cannot be empty".into());
    }
    Ok(point_id)
}
