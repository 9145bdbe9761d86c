//! Pulling the server's favorite list after the queue has drained.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// The server's favorites plus the points whose local change is still queued.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FavoritesSnapshot {
    pub remote: BTreeSet<String>,
    /// Points with a favorite toggle not yet confirmed.
    pub pending: BTreeSet<String>,
}

impl FavoritesSnapshot {
    /// The set to store locally.
    ///
    /// Last write wins per point: a queued toggle is newer than anything the
    /// server reported, so those points keep their local state. Every other
    /// point follows the server.
    pub fn merge(&self, local: &HashSet<String>) -> BTreeSet<String> {
        let from_server = self
            .remote
            .iter()
            .filter(|point| !self.pending.contains(*point));
        let from_local = local.iter().filter(|point| self.pending.contains(*point));
        from_server.chain(from_local).cloned().collect()
    }
}
