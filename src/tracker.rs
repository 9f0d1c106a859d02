//! # Walk Tracker
//!
//! Async glue between the platform and the [`WalkSessionStore`]:
//!
//! - checks location permission before a walk starts
//! - subscribes to the location provider and feeds fixes into the store
//! - runs POI lookups as fire-and-forget tasks so fixes keep flowing
//! - ticks the live duration once per second
//! - re-attaches location delivery after a restart resumed a walk
//!
//! The store lock is never held across an `.await`.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Result, WalkError};
use crate::poi::{PlacesProvider, PoiResolver};
use crate::session::{DispatchOutcome, PoiLookup, SharedWalkStore, StopOutcome, WalkSessionStore};
use crate::{PetRef, RoutePoint, WalkSession};

/// Interval of the live-duration ticker.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Identifies one location subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Callback invoked by the location provider for every new fix.
pub type FixCallback = Arc<dyn Fn(RoutePoint) + Send + Sync>;

/// Device location subsystem.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask for location access. `false` means denied.
    async fn request_permission(&self) -> bool;
    fn subscribe(&self, on_fix: FixCallback) -> SubscriptionHandle;
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

struct TrackerInner {
    store: SharedWalkStore,
    location: Arc<dyn LocationProvider>,
    resolver: Option<PoiResolver>,
    runtime: Handle,
    subscription: Mutex<Option<SubscriptionHandle>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Drives a walk from platform callbacks. Cheap to clone.
#[derive(Clone)]
pub struct WalkTracker {
    inner: Arc<TrackerInner>,
}

impl WalkTracker {
    /// Build a tracker on the current tokio runtime.
    ///
    /// Without a places provider, POI lookups requested by the store are
    /// skipped.
    pub fn new(
        store: WalkSessionStore,
        location: Arc<dyn LocationProvider>,
        places: Option<Arc<dyn PlacesProvider>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| WalkError::Config {
            message: format!("walk tracker needs a tokio runtime: {}", e),
        })?;
        let resolver = places.map(|p| PoiResolver::new(p, &store.config().poi));

        Ok(Self {
            inner: Arc::new(TrackerInner {
                store: store.into_shared(),
                location,
                resolver,
                runtime,
                subscription: Mutex::new(None),
                ticker: Mutex::new(None),
            }),
        })
    }

    /// Shared store, for UI reads and history access.
    pub fn store(&self) -> SharedWalkStore {
        Arc::clone(&self.inner.store)
    }

    /// Copy of the live session, if any.
    pub fn session(&self) -> Option<WalkSession> {
        self.inner.with_store(|s| s.session().cloned()).flatten()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.with_store(|s| s.is_tracking()).unwrap_or(false)
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Check permission, start a walk and begin location delivery.
    pub async fn start_walk(&self, pet: PetRef) -> Result<String> {
        if !self.inner.location.request_permission().await {
            warn!("[Tracker] Location permission denied");
            return Err(WalkError::PermissionDenied);
        }

        let session_id = self
            .inner
            .with_store(|s| s.start_walk(pet))
            .ok_or_else(|| WalkError::storage("walk store unavailable"))??;

        TrackerInner::begin_delivery(&self.inner);
        Ok(session_id)
    }

    /// Re-attach location delivery to a walk restored from the recovery
    /// slot. Returns `false` when there was nothing to resume.
    pub async fn resume(&self) -> Result<bool> {
        if !self.is_tracking() {
            return Ok(false);
        }
        if !self.inner.location.request_permission().await {
            warn!("[Tracker] Cannot resume walk: location permission denied");
            return Err(WalkError::PermissionDenied);
        }

        info!("[Tracker] Resuming location delivery for restored walk");
        TrackerInner::begin_delivery(&self.inner);
        Ok(true)
    }

    /// Stop the walk and location delivery. `None` if nothing was tracked.
    pub fn stop_walk(&self) -> Option<StopOutcome> {
        let outcome = self.inner.with_store(|s| s.stop_walk()).flatten();
        self.inner.end_delivery();
        outcome
    }

    /// Discard the walk and stop location delivery.
    pub fn clear_walk(&self) {
        self.inner.with_store(|s| s.clear_walk());
        self.inner.end_delivery();
    }

    /// Feed a fix directly (same path as the location callback).
    pub fn handle_fix(&self, fix: RoutePoint) {
        TrackerInner::handle_fix(&self.inner, fix);
    }
}

impl TrackerInner {
    fn with_store<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut WalkSessionStore) -> R,
    {
        match self.store.lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(_) => {
                warn!("[Tracker] Walk store lock poisoned");
                None
            }
        }
    }

    fn begin_delivery(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);

        let mut subscription = match this.subscription.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if subscription.is_none() {
            let callback_ref: Weak<Self> = weak.clone();
            let on_fix: FixCallback = Arc::new(move |fix| {
                if let Some(inner) = callback_ref.upgrade() {
                    TrackerInner::handle_fix(&inner, fix);
                }
            });
            *subscription = Some(this.location.subscribe(on_fix));
        }
        drop(subscription);

        if let Ok(mut ticker) = this.ticker.lock() {
            if ticker.is_none() {
                *ticker = Some(this.runtime.spawn(run_ticker(weak)));
            }
        }
    }

    fn end_delivery(&self) {
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(handle) = subscription.take() {
                self.location.unsubscribe(handle);
                debug!("[Tracker] Unsubscribed from location updates");
            }
        }
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(task) = ticker.take() {
                task.abort();
            }
        }
    }

    fn handle_fix(this: &Arc<Self>, fix: RoutePoint) {
        let Some(outcome) = this.with_store(|s| s.append_fix(fix)) else {
            return;
        };
        let DispatchOutcome {
            poi_lookup,
            finished,
            ..
        } = outcome;

        if let Some(finished) = finished {
            info!(
                "[Tracker] Walk {} ended automatically",
                finished.session().session_id
            );
            this.end_delivery();
            return;
        }

        if let Some(lookup) = poi_lookup {
            Self::spawn_lookup(this, lookup);
        }
    }

    /// Run a lookup without blocking further fixes. The result is applied
    /// only if the same walk is still active when it arrives.
    fn spawn_lookup(this: &Arc<Self>, lookup: PoiLookup) {
        let Some(resolver) = this.resolver.clone() else {
            return;
        };
        let weak = Arc::downgrade(this);

        this.runtime.spawn(async move {
            let places = resolver
                .find_nearby(lookup.point, lookup.radius_meters)
                .await;
            if places.is_empty() {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.with_store(|s| s.apply_poi_candidates(&lookup.session_id, places));
            }
        });
    }
}

async fn run_ticker(inner: Weak<TrackerInner>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let tracking = inner
            .with_store(|s| {
                s.tick();
                s.is_tracking()
            })
            .unwrap_or(false);
        if !tracking {
            break;
        }
    }
}
