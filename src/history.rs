//! # Walk History Repository
//!
//! Append-only local store of completed walks.
//!
//! The whole collection lives under one storage key so every mutation is a
//! single crash-consistent write. Identifiers increase monotonically and are
//! never reused, even after deletion.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalkError};
use crate::storage::KeyValueStore;
use crate::{CompletedWalk, WalkSession};

/// Storage key of the completed-walk collection.
pub const HISTORY_KEY: &str = "walk_history";

/// On-disk shape of the collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryLog {
    next_id: u64,
    records: Vec<CompletedWalk>,
}

/// Aggregate numbers for one pet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PetWalkStats {
    pub pet_id: String,
    pub walk_count: u32,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub auto_completed_count: u32,
}

pub struct WalkHistoryRepository {
    storage: Arc<dyn KeyValueStore>,
    log: HistoryLog,
    /// Set while the stored collection could not be read. Writes are refused
    /// so an empty in-memory log never replaces the real one.
    unreadable: bool,
}

impl WalkHistoryRepository {
    /// Open the repository, loading existing records.
    ///
    /// Unreadable history opens empty rather than failing the app, but the
    /// repository stays read-only until a later load succeeds.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let (log, unreadable) = match Self::load(storage.as_ref()) {
            Ok(log) => (log, false),
            Err(e) => {
                warn!("[History] Walk history unavailable, writes disabled: {}", e);
                (HistoryLog::default(), true)
            }
        };

        info!("[History] Loaded {} completed walks", log.records.len());
        Self {
            storage,
            log,
            unreadable,
        }
    }

    fn load(storage: &dyn KeyValueStore) -> Result<HistoryLog> {
        match storage.get(HISTORY_KEY)? {
            Some(blob) => Ok(rmp_serde::from_slice::<HistoryLog>(&blob)?),
            None => Ok(HistoryLog::default()),
        }
    }

    /// Retry a load that failed at open. Called before every write.
    fn ensure_loaded(&mut self) -> Result<()> {
        if !self.unreadable {
            return Ok(());
        }
        match Self::load(self.storage.as_ref()) {
            Ok(log) => {
                info!(
                    "[History] Walk history readable again ({} walks)",
                    log.records.len()
                );
                self.log = log;
                self.unreadable = false;
                Ok(())
            }
            Err(e) => Err(WalkError::storage(format!(
                "walk history unreadable, refusing to overwrite: {}",
                e
            ))),
        }
    }

    /// False when the stored collection could not be read.
    pub fn is_readable(&self) -> bool {
        !self.unreadable
    }

    fn persist(&self, log: &HistoryLog) -> Result<()> {
        let blob = rmp_serde::to_vec_named(log)?;
        self.storage.set(HISTORY_KEY, &blob)
    }

    /// Store a finished session and return the record with its new id.
    ///
    /// Saving a session that is already stored returns the existing record.
    /// Memory is only updated once the write succeeded, so a failed save can
    /// be retried with the same session.
    pub fn save(&mut self, session: WalkSession) -> Result<CompletedWalk> {
        self.ensure_loaded()?;
        if let Some(existing) = self.find_by_session_id(&session.session_id) {
            info!(
                "[History] Walk {} already stored as {}",
                session.session_id, existing.id
            );
            return Ok(existing);
        }

        let id = self.log.next_id.max(1);
        let record = CompletedWalk { id, session };

        let mut next = self.log.clone();
        next.next_id = id + 1;
        next.records.push(record.clone());
        self.persist(&next)?;

        self.log = next;
        info!(
            "[History] Saved walk {} for pet {} ({:.0}m)",
            record.id,
            record.pet_id(),
            record.session.distance_meters()
        );
        Ok(record)
    }

    fn sorted(mut records: Vec<CompletedWalk>) -> Vec<CompletedWalk> {
        records.sort_by(|a, b| {
            b.end_time()
                .cmp(&a.end_time())
                .then_with(|| b.id.cmp(&a.id))
        });
        records
    }

    /// All walks, most recent first.
    pub fn list_all(&self) -> Vec<CompletedWalk> {
        Self::sorted(self.log.records.clone())
    }

    /// Walks of one pet, most recent first.
    pub fn list_by_pet(&self, pet_id: &str) -> Vec<CompletedWalk> {
        Self::sorted(
            self.log
                .records
                .iter()
                .filter(|r| r.pet_id() == pet_id)
                .cloned()
                .collect(),
        )
    }

    /// Walks that started within `[from_ms, to_ms]`, most recent first.
    pub fn list_between(&self, from_ms: i64, to_ms: i64) -> Vec<CompletedWalk> {
        Self::sorted(
            self.log
                .records
                .iter()
                .filter(|r| r.session.start_time >= from_ms && r.session.start_time <= to_ms)
                .cloned()
                .collect(),
        )
    }

    pub fn find_by_id(&self, id: u64) -> Option<CompletedWalk> {
        self.log.records.iter().find(|r| r.id == id).cloned()
    }

    pub fn find_by_session_id(&self, session_id: &str) -> Option<CompletedWalk> {
        self.log
            .records
            .iter()
            .find(|r| r.session.session_id == session_id)
            .cloned()
    }

    /// Remove a walk. Unknown ids are a no-op.
    pub fn delete_by_id(&mut self, id: u64) -> Result<()> {
        self.ensure_loaded()?;
        if !self.log.records.iter().any(|r| r.id == id) {
            return Ok(());
        }

        let mut next = self.log.clone();
        next.records.retain(|r| r.id != id);
        self.persist(&next)?;
        self.log = next;
        info!("[History] Deleted walk {}", id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.log.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.records.is_empty()
    }

    pub fn stats_for_pet(&self, pet_id: &str) -> PetWalkStats {
        self.log
            .records
            .iter()
            .filter(|r| r.pet_id() == pet_id)
            .fold(
                PetWalkStats {
                    pet_id: pet_id.to_string(),
                    ..PetWalkStats::default()
                },
                |mut stats, r| {
                    stats.walk_count += 1;
                    stats.total_distance_meters += r.session.distance_meters();
                    stats.total_duration_seconds += r.session.duration_seconds();
                    if r.session.auto_completed {
                        stats.auto_completed_count += 1;
                    }
                    stats
                },
            )
    }

    /// All walks as JSON, most recent first.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.list_all()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{MemoryStore, PetRef, RoutePoint};

    fn finished_session(pet_id: &str, start: i64, end: i64) -> WalkSession {
        let mut session = WalkSession::new(
            format!("walk-{}", start),
            PetRef::new(pet_id, "Rex"),
            start,
        );
        session.route.push(RoutePoint::new(32.0, 34.0, start + 1_000));
        session.route.push(RoutePoint::new(32.001, 34.0, end));
        session.recompute_metrics(end);
        session.end_time = Some(end);
        session
    }

    /// Storage whose writes always fail.
    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key)
        }
        fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
            Err(WalkError::storage("disk full"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(WalkError::storage("disk full"))
        }
    }

    /// Storage whose reads can be switched to fail.
    #[derive(Default)]
    struct UnreadableStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
    }

    impl KeyValueStore for UnreadableStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(WalkError::storage("read failed"));
            }
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_ids_and_ordering() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));

        let first = repo.save(finished_session("pet-1", 0, 60_000)).unwrap();
        let second = repo.save(finished_session("pet-1", 100_000, 160_000)).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let ids: Vec<u64> = repo.list_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));
        repo.save(finished_session("pet-1", 0, 60_000)).unwrap();
        repo.save(finished_session("pet-1", 100_000, 160_000)).unwrap();

        repo.delete_by_id(2).unwrap();
        let third = repo.save(finished_session("pet-1", 200_000, 260_000)).unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn test_list_by_pet_and_range() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));
        repo.save(finished_session("pet-1", 0, 60_000)).unwrap();
        repo.save(finished_session("pet-2", 100_000, 160_000)).unwrap();
        repo.save(finished_session("pet-1", 200_000, 260_000)).unwrap();

        let ids: Vec<u64> = repo.list_by_pet("pet-1").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(repo.list_by_pet("nobody").is_empty());

        let ids: Vec<u64> = repo.list_between(50_000, 200_000).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_find_and_delete() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));
        let saved = repo.save(finished_session("pet-1", 0, 60_000)).unwrap();

        assert_eq!(repo.find_by_id(saved.id), Some(saved.clone()));
        assert!(repo.find_by_id(99).is_none());

        repo.delete_by_id(99).unwrap();
        assert_eq!(repo.len(), 1);

        repo.delete_by_id(saved.id).unwrap();
        assert!(repo.is_empty());
        assert!(repo.find_by_id(saved.id).is_none());
    }

    #[test]
    fn test_reopen_keeps_records_and_counter() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let mut repo = WalkHistoryRepository::open(storage.clone());
            repo.save(finished_session("pet-1", 0, 60_000)).unwrap();
        }

        let mut repo = WalkHistoryRepository::open(storage);
        assert_eq!(repo.len(), 1);
        let next = repo.save(finished_session("pet-1", 100_000, 160_000)).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_failed_save_leaves_memory_untouched() {
        let mut repo = WalkHistoryRepository::open(Arc::new(ReadOnlyStore(MemoryStore::new())));
        let result = repo.save(finished_session("pet-1", 0, 60_000));
        assert!(matches!(result, Err(WalkError::Storage { .. })));
        assert!(repo.is_empty());
    }

    #[test]
    fn test_stats_and_json() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));
        let mut auto = finished_session("pet-1", 0, 60_000);
        auto.auto_completed = true;
        repo.save(auto).unwrap();
        repo.save(finished_session("pet-1", 100_000, 160_000)).unwrap();

        let stats = repo.stats_for_pet("pet-1");
        assert_eq!(stats.walk_count, 2);
        assert_eq!(stats.auto_completed_count, 1);
        assert!(stats.total_distance_meters > 200.0);
        assert_eq!(stats.total_duration_seconds, 120.0);

        let json: serde_json::Value = serde_json::from_str(&repo.to_json()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["id"], 2);
    }

    #[test]
    fn test_failed_read_never_overwrites_history() {
        let storage = Arc::new(UnreadableStore::default());
        {
            let mut repo = WalkHistoryRepository::open(storage.clone());
            repo.save(finished_session("pet-1", 0, 60_000)).unwrap();
            repo.save(finished_session("pet-1", 100_000, 160_000)).unwrap();
        }

        storage.fail_reads.store(true, Ordering::SeqCst);
        let mut repo = WalkHistoryRepository::open(storage.clone());
        assert!(!repo.is_readable());
        assert!(repo.is_empty());

        let third = finished_session("pet-1", 200_000, 260_000);
        assert!(matches!(repo.save(third.clone()), Err(WalkError::Storage { .. })));
        assert!(matches!(repo.delete_by_id(1), Err(WalkError::Storage { .. })));

        // Storage recovers: the next write reloads first
        storage.fail_reads.store(false, Ordering::SeqCst);
        let saved = repo.save(third).unwrap();
        assert_eq!(saved.id, 3);
        assert!(repo.is_readable());

        let reopened = WalkHistoryRepository::open(storage);
        let ids: Vec<u64> = reopened.list_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_corrupt_history_left_in_place() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        storage.set(HISTORY_KEY, b"not msgpack").unwrap();

        let mut repo = WalkHistoryRepository::open(storage.clone());
        assert!(repo.is_empty());
        assert!(repo.save(finished_session("pet-1", 0, 60_000)).is_err());
        assert_eq!(storage.get(HISTORY_KEY).unwrap().unwrap(), b"not msgpack".to_vec());
    }

    #[test]
    fn test_saving_same_session_twice_is_idempotent() {
        let mut repo = WalkHistoryRepository::open(Arc::new(MemoryStore::new()));
        let session = finished_session("pet-1", 0, 60_000);

        let first = repo.save(session.clone()).unwrap();
        let again = repo.save(session).unwrap();
        assert_eq!(again, first);
        assert_eq!(repo.len(), 1);
    }
}
