//! # POI Resolver
//!
//! Boundary to the external places provider plus the local logic that turns
//! "a park is nearby" into "the dog actually spent time at the park".
//!
//! Lookups degrade gracefully: a failing or slow provider yields an empty
//! result and a warning, never an error that could stall tracking.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::auto_complete::dwell_seconds;
use crate::config::PoiConfig;
use crate::error::Result;
use crate::{GpsPoint, PoiCandidate, PoiVisit, RoutePoint};

/// External nearby-places search.
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    async fn search_nearby(&self, point: GpsPoint, radius_meters: f64)
        -> Result<Vec<PoiCandidate>>;
}

/// Wraps a [`PlacesProvider`] so failures never propagate.
#[derive(Clone)]
pub struct PoiResolver {
    provider: Arc<dyn PlacesProvider>,
    timeout_ms: u64,
}

impl PoiResolver {
    pub fn new(provider: Arc<dyn PlacesProvider>, config: &PoiConfig) -> Self {
        Self {
            provider,
            timeout_ms: config.lookup_timeout_ms,
        }
    }

    /// Places near `point`. Empty on provider failure or timeout.
    pub async fn find_nearby(&self, point: GpsPoint, radius_meters: f64) -> Vec<PoiCandidate> {
        match self.search(point, radius_meters).await {
            Ok(places) => {
                debug!(
                    "[PoiResolver] {} places within {:.0}m of ({:.5}, {:.5})",
                    places.len(),
                    radius_meters,
                    point.latitude,
                    point.longitude
                );
                places
            }
            Err(e) => {
                warn!("[PoiResolver] Lookup failed, skipping this cycle: {}", e);
                Vec::new()
            }
        }
    }

    #[cfg(feature = "runtime")]
    async fn search(&self, point: GpsPoint, radius_meters: f64) -> Result<Vec<PoiCandidate>> {
        let timeout = std::time::Duration::from_millis(self.timeout_ms);
        match tokio::time::timeout(timeout, self.provider.search_nearby(point, radius_meters)).await
        {
            Ok(result) => result,
            Err(_) => Err(crate::WalkError::Http {
                message: format!("places lookup timed out after {}ms", self.timeout_ms),
                status_code: None,
            }),
        }
    }

    #[cfg(not(feature = "runtime"))]
    async fn search(&self, point: GpsPoint, radius_meters: f64) -> Result<Vec<PoiCandidate>> {
        self.provider.search_nearby(point, radius_meters).await
    }
}

/// True when the `accepted_fixes`-th fix should trigger a lookup.
pub fn should_query(accepted_fixes: usize, every_n_fixes: usize) -> bool {
    every_n_fixes > 0 && accepted_fixes > 0 && accepted_fixes % every_n_fixes == 0
}

/// Promote a pending visit once the route shows a long enough dwell at the
/// place. Returns the confirmed visit, or `None` if the dwell is not met.
pub fn confirm_visit(route: &[RoutePoint], pending: &PoiVisit, config: &PoiConfig) -> Option<PoiVisit> {
    let dwell = dwell_seconds(route, &pending.location, config.visit_radius_meters)?;
    if dwell < config.dwell_seconds {
        return None;
    }
    let confirmed_at = route.last()?.timestamp;

    Some(PoiVisit {
        confirmed_at: Some(confirmed_at),
        dwell_seconds: dwell,
        ..pending.clone()
    })
}

/// Drop candidates already known to the session and duplicates within the
/// batch itself.
pub fn new_candidates<'a>(
    candidates: &'a [PoiCandidate],
    is_known: impl Fn(&str) -> bool,
) -> Vec<&'a PoiCandidate> {
    let mut fresh: Vec<&'a PoiCandidate> = Vec::new();
    for candidate in candidates {
        if is_known(&candidate.place_id) || fresh.iter().any(|c| c.place_id == candidate.place_id) {
            continue;
        }
        fresh.push(candidate);
    }
    fresh
}
