use chrono::{DateTime, Utc};

use crate::models::{
    Delivery, NewImageUpload, NewOperation, OperationId, PendingImage, PendingOperation, TargetKey,
};

/// A record that can live in a [`Queue`](super::Queue).
pub trait QueueRecord: Clone + Send + Sync + 'static {
    /// What the caller appends; the queue assigns identity and ordering.
    type Draft: Send;

    fn from_draft(
        draft: Self::Draft,
        id: OperationId,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self;
    fn id(&self) -> OperationId;
    fn sequence(&self) -> u64;
    fn created_at(&self) -> DateTime<Utc>;
    fn target(&self) -> TargetKey;
    fn delivery(&self) -> &Delivery;
    fn delivery_mut(&mut self) -> &mut Delivery;
}

impl QueueRecord for PendingOperation {
    type Draft = NewOperation;

    fn from_draft(
        draft: NewOperation,
        id: OperationId,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            entity_type: draft.entity_type,
            kind: draft.kind,
            target_id: draft.target_id,
            payload: draft.payload,
            created_at,
            delivery: Delivery::new(),
        }
    }

    fn id(&self) -> OperationId {
        self.id
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn target(&self) -> TargetKey {
        PendingOperation::target(self)
    }

    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    fn delivery_mut(&mut self) -> &mut Delivery {
        &mut self.delivery
    }
}

impl QueueRecord for PendingImage {
    type Draft = NewImageUpload;

    fn from_draft(
        draft: NewImageUpload,
        id: OperationId,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            entity_type: draft.target.entity_type(),
            target_id: draft.target.target_id().to_string(),
            file_path: draft.file_path,
            content_type: draft.content_type,
            uploaded_url: None,
            created_at,
            delivery: Delivery::new(),
        }
    }

    fn id(&self) -> OperationId {
        self.id
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn target(&self) -> TargetKey {
        PendingImage::target(self)
    }

    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    fn delivery_mut(&mut self) -> &mut Delivery {
        &mut self.delivery
    }
}
