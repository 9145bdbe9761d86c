use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use appunture_core::{ImageTarget, NewImageUpload, QueueFilter};

use crate::sync::Workspace;

#[derive(Args)]
pub struct ImageCommand {
    #[command(subcommand)]
    pub command: ImageSubcommand,
}

#[derive(Subcommand)]
pub enum ImageSubcommand {
    /// Queue a new profile picture
    Profile {
        /// Image file
        file: PathBuf,
    },

    /// Queue an image for a point
    Point {
        /// Point ID
        point_id: String,

        /// Image file
        file: PathBuf,
    },

    /// Show the last confirmed image URL
    Show {
        /// Point ID; the profile picture when omitted
        #[arg(long)]
        point: Option<String>,
    },
}

impl ImageCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        let (target, file) = match &self.command {
            ImageSubcommand::Profile { file } => (ImageTarget::Profile, file),
            ImageSubcommand::Point { point_id, file } => {
                if point_id.trim().is_empty() {
                    return Err("Point ID cannot be empty".into());
                }
                (ImageTarget::Point(point_id.trim().to_string()), file)
            }
            ImageSubcommand::Show { point } => {
                let target = match point {
                    Some(point_id) => ImageTarget::Point(point_id.trim().to_string()),
                    None => ImageTarget::Profile,
                };
                return show(workspace, &target).await;
            }
        };

        let upload = NewImageUpload::new(target, resolve_file(file)?);
        let image = workspace.session.enqueue_image(upload).await;
        println!("Queued: {}", image);
        Ok(())
    }
}

async fn show(
    workspace: &Workspace,
    target: &ImageTarget,
) -> Result<(), Box<dyn std::error::Error>> {
    let cached = workspace
        .images
        .get(target.entity_type(), target.target_id())
        .await?;
    match cached {
        Some(url) => println!("{}", url),
        None => println!("No synced image for {}", target.entity_type()),
    }

    let queued = workspace
        .session
        .images()
        .list(&QueueFilter::active().entity(target.entity_type()))
        .await
        .into_iter()
        .filter(|image| image.target_id == target.target_id())
        .count();
    if queued > 0 {
        println!("{} upload(s) still queued", queued);
    }
    Ok(())
}

/// The upload may run from another directory later, so store an absolute path.
fn resolve_file(file: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = std::fs::canonicalize(file)
        .map_err(|e| format!("Cannot read image '{}': {}", file.display(), e))?;
    if !path.is_file() {
        return Err(format!("Not a file: {}", file.display()).into());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_file() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("li4.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let resolved = resolve_file(&file).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("li4.jpg"));

        assert!(resolve_file(&temp_dir.path().join("missing.jpg")).is_err());
        assert!(resolve_file(temp_dir.path()).is_err());
    }
}
