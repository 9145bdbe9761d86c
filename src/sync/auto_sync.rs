//! Auto-sync after write commands.

use appunture_core::{PassOutcome, SyncError};

use super::Workspace;
use crate::config::Config;

/// Runs a pass if `auto_sync` is enabled and the server is reachable, then
/// refreshes the local favorites.
///
/// Failures never fail the command: the changes stay queued and go out on a
/// later `appunture sync`.
pub async fn try_auto_sync(workspace: &Workspace, config: &Config) {
    if !config.sync.auto_sync {
        return;
    }

    match workspace.sync_all().await {
        Ok((PassOutcome::Completed(report), _)) => {
            if !report.failed.is_empty() {
                eprintln!(
                    "Auto-sync: {} change(s) failed, see 'appunture queue list --failed'",
                    report.failed.len()
                );
            } else if report.interrupted {
                eprintln!("Auto-sync: connection lost, remaining changes stay queued");
            }
        }
        Ok((PassOutcome::Skipped { reason }, _)) => {
            tracing::debug!("Auto-sync skipped: {}", reason);
        }
        Err(SyncError::Offline) => {
            eprintln!("Auto-sync: server unreachable, changes queued");
        }
        Err(e) => {
            eprintln!("Auto-sync: {}", e);
        }
    }
}
