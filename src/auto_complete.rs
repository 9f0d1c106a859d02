//! Auto-completion heuristics.
//!
//! A walk is considered over when the walker is back near the start point
//! and has stayed there for a while. Both predicates only look at the tail
//! of the route, so they are re-evaluated on every appended fix.

use crate::config::AutoCompleteConfig;
use crate::geo_utils::is_within;
use crate::{GpsPoint, RoutePoint};

/// Latest fix lies within `radius_meters` of the first fix.
pub fn is_near_start(route: &[RoutePoint], radius_meters: f64) -> bool {
    match (route.first(), route.last()) {
        (Some(first), Some(last)) => is_within(&last.point(), &first.point(), radius_meters),
        _ => false,
    }
}

/// How long the walker has been continuously within `radius_meters` of
/// `reference`, in seconds.
///
/// Scans backward from the latest fix and stops at the first fix outside the
/// radius. Returns `None` if the latest fix itself is outside.
pub fn dwell_seconds(route: &[RoutePoint], reference: &GpsPoint, radius_meters: f64) -> Option<f64> {
    let last = route.last()?;
    if !is_within(&last.point(), reference, radius_meters) {
        return None;
    }

    let earliest = route
        .iter()
        .rev()
        .take_while(|p| is_within(&p.point(), reference, radius_meters))
        .last()
        .unwrap_or(last);

    Some((last.timestamp - earliest.timestamp).max(0) as f64 / 1000.0)
}

/// The walker has stayed within the radius of `reference` for at least
/// `threshold_seconds`.
pub fn is_stopped_for(
    route: &[RoutePoint],
    reference: &GpsPoint,
    radius_meters: f64,
    threshold_seconds: f64,
) -> bool {
    dwell_seconds(route, reference, radius_meters).is_some_and(|dwell| dwell >= threshold_seconds)
}

/// Decide whether the walk should end on its own.
pub fn should_auto_complete(route: &[RoutePoint], config: &AutoCompleteConfig) -> bool {
    if !config.enabled || route.len() < config.min_points {
        return false;
    }
    let Some(start) = route.first() else {
        return false;
    };

    is_near_start(route, config.radius_meters)
        && is_stopped_for(
            route,
            &start.point(),
            config.radius_meters,
            config.dwell_seconds,
        )
}
