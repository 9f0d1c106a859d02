//! End-to-end walk scenarios against on-disk SQLite storage.

use std::sync::Arc;

use tempfile::TempDir;
use walk_tracker::{
    KeyValueStore, ManualClock, PetRef, RoutePoint, SqliteStore, TrackerConfig, WalkSessionStore,
};

const T0: i64 = 1_700_000_000_000;
const HOME: (f64, f64) = (32.0853, 34.7818);

fn open_db(dir: &TempDir) -> Arc<dyn KeyValueStore> {
    let path = dir.path().join("walks.db");
    Arc::new(SqliteStore::new(path.to_str().unwrap()).unwrap())
}

fn open_store(dir: &TempDir, clock: &Arc<ManualClock>) -> WalkSessionStore {
    WalkSessionStore::open(open_db(dir), clock.clone(), TrackerConfig::default())
}

fn fix(clock: &ManualClock, store: &mut WalkSessionStore, dlat: f64, secs: i64) {
    let ts = T0 + secs * 1000;
    clock.set(ts);
    store.append_fix(RoutePoint::new(HOME.0 + dlat, HOME.1, ts));
}

#[test]
fn walk_survives_restart_and_lands_in_history() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));

    let session_id = {
        let mut store = open_store(&dir, &clock);
        let id = store.start_walk(PetRef::new("pet-1", "Rex")).unwrap();
        fix(&clock, &mut store, 0.0, 5);
        fix(&clock, &mut store, 0.001, 65);
        id
    };

    // Process restarted
    let mut store = open_store(&dir, &clock);
    let resumed = store.session().unwrap();
    assert_eq!(resumed.session_id, session_id);
    assert_eq!(resumed.route.len(), 2);

    fix(&clock, &mut store, 0.002, 125);
    let record = store.stop_walk().unwrap().completed().unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.session.route.len(), 3);
    assert!(record.session.distance_meters() > 200.0);
    drop(store);

    let store = open_store(&dir, &clock);
    assert!(!store.is_tracking());
    assert_eq!(store.history().list_all(), vec![record]);
}

#[test]
fn loop_walk_auto_completes_and_history_orders_newest_first() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let mut store = open_store(&dir, &clock);

    store.start_walk(PetRef::new("pet-1", "Rex")).unwrap();
    fix(&clock, &mut store, 0.0, 10);
    fix(&clock, &mut store, 0.001, 70);
    let first = store.stop_walk().unwrap().completed().unwrap();

    store
        .start_walk(PetRef::transient("Buddy", T0).with_species("dog"))
        .unwrap();
    let lats = [
        0.0, 0.001, 0.002, 0.003, 0.004, 0.003, 0.002, 0.0015, 0.001, 0.0, 0.0001, 0.0, 0.0001,
        0.0, 0.0001,
    ];
    let mut finished = None;
    for (i, dlat) in lats.iter().enumerate() {
        let ts = T0 + 1_000_000 + i as i64 * 60_000;
        clock.set(ts);
        let outcome = store.append_fix(RoutePoint::new(HOME.0 + dlat, HOME.1, ts));
        if outcome.finished.is_some() {
            finished = outcome.finished;
        }
    }

    let second = finished.unwrap().completed().unwrap();
    assert!(!store.is_tracking());
    assert!(second.session.auto_completed);
    assert!(second.session.pet.is_transient());
    assert_eq!(second.id, 2);

    let ids: Vec<u64> = store.history().list_all().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(store.history().list_by_pet("pet-1"), vec![first]);
}

#[test]
fn cleared_walk_is_not_restored() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    {
        let mut store = open_store(&dir, &clock);
        store.start_walk(PetRef::new("pet-1", "Rex")).unwrap();
        fix(&clock, &mut store, 0.0, 5);
        store.clear_walk();
    }

    let store = open_store(&dir, &clock);
    assert!(!store.is_tracking());
    assert!(store.history().is_empty());
}
