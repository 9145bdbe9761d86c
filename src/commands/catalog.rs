//! Point and symptom mutations. Both share the same REST shape.

use clap::{Args, Subcommand};
use uuid::Uuid;

use appunture_core::{EntityType, NewOperation, OperationKind};

use super::parse_data;
use crate::sync::Workspace;

#[derive(Subcommand)]
pub enum MutationSubcommand {
    /// Queue a create request
    Create {
        /// Request body as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Queue an update request
    Update {
        /// Remote ID
        id: String,

        /// Fields to change as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Queue a delete request
    Delete {
        /// Remote ID
        id: String,
    },
}

#[derive(Args)]
pub struct PointCommand {
    #[command(subcommand)]
    pub command: MutationSubcommand,
}

#[derive(Args)]
pub struct SymptomCommand {
    #[command(subcommand)]
    pub command: MutationSubcommand,
}

impl PointCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        enqueue(workspace, EntityType::Point, &self.command).await
    }
}

impl SymptomCommand {
    pub async fn run(&self, workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
        enqueue(workspace, EntityType::Symptom, &self.command).await
    }
}

async fn enqueue(
    workspace: &Workspace,
    entity_type: EntityType,
    command: &MutationSubcommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let operation = build_operation(entity_type, command)?;
    let queued = workspace.session.enqueue(operation).await;
    println!("Queued: {}", queued);
    println!("ID: {}", queued.id);
    Ok(())
}

fn build_operation(
    entity_type: EntityType,
    command: &MutationSubcommand,
) -> Result<NewOperation, Box<dyn std::error::Error>> {
    let operation = match command {
        // Creates have no remote id yet; a local one keeps them in their own lane.
        MutationSubcommand::Create { data } => NewOperation::new(
            entity_type,
            OperationKind::Create,
            format!("local-{}", Uuid::new_v4()),
            parse_data(data)?,
        ),
        MutationSubcommand::Update { id, data } => NewOperation::new(
            entity_type,
            OperationKind::Update,
            required_id(id)?,
            parse_data(data)?,
        ),
        MutationSubcommand::Delete { id } => NewOperation::new(
            entity_type,
            OperationKind::Delete,
            required_id(id)?,
            serde_json::json!({}),
        ),
    };
    Ok(operation)
}

fn required_id(id: &str) -> Result<String, Box<dyn std::error::Error>> {
    let id = id.trim();
    if id.is_empty() {
        return Err("ID cannot be empty".into());
    }
    Ok(id.to_string())
}
