//! # Walk Tracker
//!
//! Walk-session tracking engine for a pet-care companion app.
//!
//! This library provides:
//! - Live walk tracking from a stream of GPS fixes (distance, duration, route)
//! - Point-of-interest visit detection with dwell-based confirmation
//! - Automatic walk completion when the walker returns home and stops
//! - Crash recovery of the in-progress walk and a local walk history
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed key-value storage (default)
//! - **`runtime`** - Async tracker driver on tokio (default)
//! - **`http`** - HTTP places provider for POI lookups
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use walk_tracker::{
//!     ManualClock, MemoryStore, PetRef, RoutePoint, TrackerConfig, WalkSessionStore,
//! };
//!
//! let clock = Arc::new(ManualClock::new(1_700_000_000_000));
//! let mut store = WalkSessionStore::open(
//!     Arc::new(MemoryStore::new()),
//!     clock.clone(),
//!     TrackerConfig::default(),
//! );
//!
//! store.start_walk(PetRef::new("pet-1", "Rex")).unwrap();
//! store.append_fix(RoutePoint::new(32.0000, 34.0000, 1_700_000_005_000));
//! store.append_fix(RoutePoint::new(32.0010, 34.0000, 1_700_000_065_000));
//!
//! let completed = store.stop_walk().unwrap().completed().unwrap();
//! assert_eq!(completed.id, 1);
//! assert!(completed.session.distance_meters() > 100.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, WalkError};

// Tracker configuration (thresholds and cadences)
pub mod config;
pub use config::{AutoCompleteConfig, PoiConfig, TrackerConfig};

// Wall clock abstraction
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Geographic utilities (distance, proximity, route metrics)
pub mod geo_utils;

// Durable key-value storage collaborator
pub mod storage;
#[cfg(feature = "persistence")]
pub use storage::SqliteStore;
pub use storage::{KeyValueStore, MemoryStore};

// Active-walk snapshot for crash recovery
pub mod recovery;
pub use recovery::RecoveryStore;

// Auto-completion heuristics (near start + stationary)
pub mod auto_complete;
pub use auto_complete::should_auto_complete;

// Points of interest: provider boundary and visit confirmation
pub mod poi;
pub use poi::{PlacesProvider, PoiResolver};

// Completed walks
pub mod history;
pub use history::{PetWalkStats, WalkHistoryRepository};

// Walk session state machine
pub mod session;
pub use session::{
    reduce, DispatchOutcome, Outcome, PoiLookup, ReduceContext, SharedWalkStore, StopOutcome,
    Transition, WalkCommand, WalkEffect, WalkSessionStore, WalkState,
};

// Async driver binding location and places providers to the store
#[cfg(feature = "runtime")]
pub mod tracker;
#[cfg(feature = "runtime")]
pub use tracker::{LocationProvider, SubscriptionHandle, WalkTracker};

// HTTP places provider
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpPlacesProvider;

/// Initialize logging for Android hosts.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("WalkTrackerRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}

/// Prefix marking a placeholder pet typed in by the user.
pub const TRANSIENT_PET_PREFIX: &str = "temp_";

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use walk_tracker::GpsPoint;
/// let point = GpsPoint::new(32.0853, 34.7818); // Tel Aviv
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A single location fix accepted into a walk route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Horizontal accuracy in meters, when the device reports it
    pub accuracy: Option<f64>,
}

impl RoutePoint {
    /// Create a fix without accuracy information.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy: None,
        }
    }

    /// Attach a horizontal accuracy (meters).
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// The coordinate part of the fix.
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Check if the fix has usable coordinates.
    pub fn is_valid(&self) -> bool {
        self.point().is_valid()
    }
}

/// Reference to the pet being walked.
///
/// Either a registered pet or a transient placeholder whose id starts with
/// [`TRANSIENT_PET_PREFIX`]. The engine treats both the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetRef {
    pub id: String,
    pub name: String,
    pub species: Option<String>,
}

impl PetRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            species: None,
        }
    }

    /// Placeholder for a pet the user typed in without registering it.
    pub fn transient(name: impl Into<String>, created_at_ms: i64) -> Self {
        Self {
            id: format!("{}{}", TRANSIENT_PET_PREFIX, created_at_ms),
            name: name.into(),
            species: None,
        }
    }

    pub fn with_species(mut self, species: impl Into<String>) -> Self {
        self.species = Some(species.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        self.id.starts_with(TRANSIENT_PET_PREFIX)
    }
}

/// A place returned by a places provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiCandidate {
    pub place_id: String,
    pub name: String,
    /// Place category, e.g. "park" or "veterinary_care"
    pub place_type: String,
    pub location: GpsPoint,
}

/// A point of interest visited during a walk.
///
/// While pending, `confirmed_at` is `None` and `dwell_seconds` is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiVisit {
    pub place_id: String,
    pub name: String,
    pub place_type: String,
    pub location: GpsPoint,
    /// Unix ms when the place was first reported nearby
    pub first_seen_at: i64,
    /// Unix ms when the dwell condition was met
    pub confirmed_at: Option<i64>,
    pub dwell_seconds: f64,
}

impl PoiVisit {
    /// Speculative visit for a freshly reported candidate.
    pub fn pending(candidate: PoiCandidate, first_seen_at: i64) -> Self {
        Self {
            place_id: candidate.place_id,
            name: candidate.name,
            place_type: candidate.place_type,
            location: candidate.location,
            first_seen_at,
            confirmed_at: None,
            dwell_seconds: 0.0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// The aggregate root of a walk.
///
/// `distance_meters` and `duration_seconds` are derived from the route and
/// only recomputed by the session store; they have no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkSession {
    pub session_id: String,
    pub pet: PetRef,
    /// Unix ms
    pub start_time: i64,
    /// Unix ms, set when the walk is finalized
    pub end_time: Option<i64>,
    pub route: Vec<RoutePoint>,
    /// Confirmed visits, in confirmation order
    pub pois: Vec<PoiVisit>,
    /// Candidates still waiting for the dwell condition
    pub pending_pois: Vec<PoiVisit>,
    distance_meters: f64,
    duration_seconds: f64,
    pub auto_completed: bool,
}

impl WalkSession {
    pub(crate) fn new(session_id: String, pet: PetRef, start_time: i64) -> Self {
        Self {
            session_id,
            pet,
            start_time,
            end_time: None,
            route: Vec::new(),
            pois: Vec::new(),
            pending_pois: Vec::new(),
            distance_meters: 0.0,
            duration_seconds: 0.0,
            auto_completed: false,
        }
    }

    /// Total route distance in meters.
    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    /// Elapsed walk time in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Average speed in m/s over the elapsed time.
    pub fn average_speed(&self) -> f64 {
        if self.duration_seconds > 0.0 {
            self.distance_meters / self.duration_seconds
        } else {
            0.0
        }
    }

    pub fn last_fix(&self) -> Option<&RoutePoint> {
        self.route.last()
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// True if the place is already pending or confirmed in this session.
    pub fn knows_place(&self, place_id: &str) -> bool {
        self.pois.iter().any(|p| p.place_id == place_id)
            || self.pending_pois.iter().any(|p| p.place_id == place_id)
    }

    /// Recompute distance and duration from the route.
    ///
    /// While the walk is live, duration never drops below a value already
    /// shown by a timer tick. A finished walk measures to its last fix.
    pub(crate) fn recompute_metrics(&mut self, now: i64) {
        self.distance_meters = geo_utils::total_distance(&self.route);
        let measured = geo_utils::duration_seconds(&self.route, Some(self.start_time), now);
        self.duration_seconds = if self.is_finished() {
            measured
        } else {
            measured.max(self.duration_seconds)
        };
    }

    /// Live elapsed time for timer ticks between fixes. Never decreases
    /// while the walk is live.
    pub(crate) fn refresh_live_duration(&mut self, now: i64) {
        let live = ((now - self.start_time).max(0)) as f64 / 1000.0;
        if live > self.duration_seconds {
            self.duration_seconds = live;
        }
    }
}

/// A finalized walk stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWalk {
    pub id: u64,
    pub session: WalkSession,
}

impl CompletedWalk {
    pub fn pet_id(&self) -> &str {
        &self.session.pet.id
    }

    pub fn end_time(&self) -> i64 {
        self.session.end_time.unwrap_or(self.session.start_time)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(32.0, 34.0).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!RoutePoint::new(0.0, f64::INFINITY, 0).is_valid());
    }

    #[test]
    fn test_transient_pet() {
        let pet = PetRef::transient("Buddy", 1_700_000_000_000);
        assert!(pet.is_transient());
        assert_eq!(pet.id, "temp_1700000000000");
        assert!(!PetRef::new("42", "Rex").with_species("dog").is_transient());
    }

    #[test]
    fn test_session_metrics_recompute() {
        let mut session = WalkSession::new("walk-1".to_string(), PetRef::new("1", "Rex"), 0);
        session.route.push(RoutePoint::new(32.0000, 34.0, 10_000));
        session.route.push(RoutePoint::new(32.0010, 34.0, 70_000));
        session.recompute_metrics(70_000);

        assert!(session.distance_meters() > 108.0 && session.distance_meters() < 114.0);
        assert_eq!(session.duration_seconds(), 70.0);
        assert!(session.average_speed() > 1.5);
    }

    #[test]
    fn test_live_duration_never_decreases() {
        let mut session = WalkSession::new("walk-1".to_string(), PetRef::new("1", "Rex"), 0);
        session.refresh_live_duration(5_000);
        assert_eq!(session.duration_seconds(), 5.0);
        session.refresh_live_duration(3_000);
        assert_eq!(session.duration_seconds(), 5.0);
    }

    #[test]
    fn test_fix_after_tick_keeps_live_duration() {
        let mut session = WalkSession::new("walk-1".to_string(), PetRef::new("1", "Rex"), 0);
        session.refresh_live_duration(30_000);

        // A fix stamped before the tick must not pull the display back
        session.route.push(RoutePoint::new(32.0, 34.0, 10_000));
        session.recompute_metrics(30_000);
        assert_eq!(session.duration_seconds(), 30.0);

        session.route.push(RoutePoint::new(32.001, 34.0, 45_000));
        session.recompute_metrics(45_000);
        assert_eq!(session.duration_seconds(), 45.0);

        // Finalized walks measure to the last fix
        session.end_time = Some(50_000);
        session.refresh_live_duration(50_000);
        session.recompute_metrics(50_000);
        assert_eq!(session.duration_seconds(), 45.0);
    }
}
