use clap::{Args, Subcommand};

use appunture_core::NewOperation;

use super::parse_data;
use crate::sync::Workspace;

#[derive(Args)]
pub struct ProfileCommand {
    #[command(subcommand)]
    pub command: ProfileSubcommand,
}

#[derive(Subcommand)]
pub enum ProfileSubcommand {
    /// Queue a profile update
    Update {
        /// Fields to change as a JSON object
        #[arg(long)]
        data: String,
    },
}

impl ProfileCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ProfileSubcommand::Update { data } => {
                let op = workspace
                    .session
                    .enqueue(NewOperation::update_profile(parse_data(data)?))
                    .await;
                println!("Queued: {}", op);
                Ok(())
            }
        }
    }
}
