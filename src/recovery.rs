//! # Recovery Store
//!
//! Durable mirror of the in-progress walk, kept in a single storage slot so
//! tracking can resume after the process is killed mid-walk.
//!
//! Finished walks whose history write failed live under a second key until
//! a retry succeeds, so starting a new walk never pushes them out.
//!
//! The store is a cache of the session store's state. It never originates
//! mutations, and every failure is logged instead of returned: a broken disk
//! must not interrupt the walk the user is on right now.

use std::sync::Arc;

use log::{info, warn};

use crate::error::WalkError;
use crate::storage::KeyValueStore;
use crate::WalkSession;

/// Storage key of the single active-walk slot.
pub const ACTIVE_WALK_KEY: &str = "active_walk";

/// Storage key of finished walks still waiting for history.
pub const PENDING_WALKS_KEY: &str = "pending_walks";

pub struct RecoveryStore {
    storage: Arc<dyn KeyValueStore>,
}

impl RecoveryStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Overwrite the slot with `session`. Best-effort.
    ///
    /// Returns whether the write reached storage, for callers that want to
    /// report it; the in-memory state is authoritative either way.
    pub fn save(&self, session: &WalkSession) -> bool {
        let blob = match rmp_serde::to_vec_named(session) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(
                    "[Recovery] Failed to encode snapshot for {}: {}",
                    session.session_id, e
                );
                return false;
            }
        };

        match self.storage.set(ACTIVE_WALK_KEY, &blob) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[Recovery] Failed to save snapshot for {}: {}",
                    session.session_id, e
                );
                false
            }
        }
    }

    /// Last saved snapshot. Missing, unreadable and corrupt slots all read as
    /// `None`.
    pub fn load(&self) -> Option<WalkSession> {
        let blob = match self.storage.get(ACTIVE_WALK_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!("[Recovery] Failed to read snapshot: {}", e);
                return None;
            }
        };

        match rmp_serde::from_slice::<WalkSession>(&blob) {
            Ok(session) => {
                info!(
                    "[Recovery] Loaded snapshot {} ({} fixes)",
                    session.session_id,
                    session.route.len()
                );
                Some(session)
            }
            Err(e) => {
                warn!("[Recovery] Ignoring corrupt snapshot: {}", e);
                None
            }
        }
    }

    /// Empty the slot. Idempotent.
    pub fn clear(&self) -> bool {
        match self.storage.remove(ACTIVE_WALK_KEY) {
            Ok(()) => true,
            Err(e) => {
                warn!("[Recovery] Failed to clear snapshot: {}", e);
                false
            }
        }
    }

    /// Replace the list of walks waiting for history. An empty list removes
    /// the key.
    pub fn save_pending(&self, sessions: &[WalkSession]) -> bool {
        let result = if sessions.is_empty() {
            self.storage.remove(PENDING_WALKS_KEY)
        } else {
            rmp_serde::to_vec_named(sessions)
                .map_err(WalkError::from)
                .and_then(|blob| self.storage.set(PENDING_WALKS_KEY, &blob))
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[Recovery] Failed to save {} pending walks: {}",
                    sessions.len(),
                    e
                );
                false
            }
        }
    }

    /// Walks waiting for history. Unreadable data reads as empty.
    pub fn load_pending(&self) -> Vec<WalkSession> {
        let blob = match self.storage.get(PENDING_WALKS_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("[Recovery] Failed to read pending walks: {}", e);
                return Vec::new();
            }
        };

        match rmp_serde::from_slice::<Vec<WalkSession>>(&blob) {
            Ok(sessions) => {
                if !sessions.is_empty() {
                    info!("[Recovery] {} walks waiting for history", sessions.len());
                }
                sessions
            }
            Err(e) => {
                warn!("[Recovery] Ignoring corrupt pending walks: {}", e);
                Vec::new()
            }
        }
    }
}
