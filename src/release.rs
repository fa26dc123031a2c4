//! Delayed score release.
//!
//! `release_score` is the single transition COMPLETED/unscored → SCORED. Both the
//! timer and the admin override go through it, and it is a no-op for a session
//! that is already released, so a late timer after an override changes nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::{SessionStore, SharedStore};

/// Flip a completed session to scored. Returns `false` if it was already released.
#[instrument(level = "info", skip(store), fields(%session_id))]
pub async fn release_score(store: &SharedStore, session_id: &str) -> EngineResult<bool> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| EngineError::not_found("session", session_id))?;
    let Some(completed_at) = session.completed_at.filter(|_| session.is_completed) else {
        return Err(EngineError::state("cannot release the score of a session that is not completed"));
    };
    if session.is_scored {
        return Ok(false);
    }

    // Release time never precedes completion, even with clock skew between instances.
    let released_at = Utc::now().max(completed_at);
    let flipped = store.release_session(session_id, released_at).await?;
    if flipped {
        info!(target: "release", %session_id, %released_at, "Score released");
    }
    Ok(flipped)
}

/// Delay scheduler collaborator: fire one release for `session_id` after `delay`.
#[async_trait]
pub trait ScoreReleaseScheduler: Send + Sync {
    async fn schedule(&self, session_id: &str, delay: Duration);
}

/// In-process scheduler on tokio timers. A session scheduled twice fires once.
///
/// Timers do not survive a restart; sessions left unscored by one are released
/// through the admin override.
#[derive(Clone)]
pub struct TokioReleaseScheduler {
    store: SharedStore,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl TokioReleaseScheduler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of releases waiting on a timer.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl ScoreReleaseScheduler for TokioReleaseScheduler {
    async fn schedule(&self, session_id: &str, delay: Duration) {
        if !self.pending.lock().await.insert(session_id.to_string()) {
            warn!(target: "release", %session_id, "Release already scheduled; ignoring");
            return;
        }
        info!(target: "release", %session_id, delay_secs = delay.as_secs(), "Release scheduled");

        let store = self.store.clone();
        let pending = self.pending.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match release_score(&store, &session_id).await {
                Ok(true) => {}
                Ok(false) => info!(target: "release", %session_id, "Already released; timer is a no-op"),
                Err(e) => error!(target: "release", %session_id, error = %e, "Scheduled release failed"),
            }
            pending.lock().await.remove(&session_id);
        });
    }
}
