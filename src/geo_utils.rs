//! Geographic utilities for walk routes.
//!
//! All functions are pure and total. Invalid coordinates are not rejected
//! here; NaN simply propagates into the result. Fixes are validated before
//! they enter a route.

use geo::{Distance, Haversine, Point};

use crate::{GpsPoint, RoutePoint};

/// Calculate haversine distance between two GPS points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Distance between two route fixes in meters.
pub fn fix_distance(a: &RoutePoint, b: &RoutePoint) -> f64 {
    haversine_distance(&a.point(), &b.point())
}

/// Check whether two points are within `radius_meters` of each other.
pub fn is_within(a: &GpsPoint, b: &GpsPoint, radius_meters: f64) -> bool {
    haversine_distance(a, b) <= radius_meters
}

/// Total distance along a route in meters. Zero for routes of length <= 1.
pub fn total_distance(route: &[RoutePoint]) -> f64 {
    route.windows(2).map(|w| fix_distance(&w[0], &w[1])).sum()
}

/// Elapsed time of a route in seconds.
///
/// With an explicit start, measures from it to the last fix, or to `now_ms`
/// when the route is still empty (live display before the first fix).
/// Without one, measures from the first to the last fix.
pub fn duration_seconds(route: &[RoutePoint], explicit_start: Option<i64>, now_ms: i64) -> f64 {
    let elapsed_ms = match (explicit_start, route.first(), route.last()) {
        (Some(start), _, Some(last)) => last.timestamp - start,
        (Some(start), _, None) => now_ms - start,
        (None, Some(first), Some(last)) => last.timestamp - first.timestamp,
        (None, _, _) => 0,
    };
    elapsed_ms.max(0) as f64 / 1000.0
}

/// Average speed over the route in m/s. Zero when no time has elapsed.
pub fn average_speed(route: &[RoutePoint]) -> f64 {
    let duration = duration_seconds(route, None, 0);
    if duration > 0.0 {
        total_distance(route) / duration
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64, ts: i64) -> RoutePoint {
        RoutePoint::new(lat, lng, ts)
    }

    #[test]
    fn test_distance_concrete_example() {
        let route = vec![fix(32.0000, 34.0000, 0), fix(32.0010, 34.0000, 60_000)];
        let d = total_distance(&route);
        assert!(d > 108.0 && d < 114.0, "got {}", d);
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let a = GpsPoint::new(32.0, 34.0);
        let b = GpsPoint::new(32.01, 34.02);
        assert_eq!(haversine_distance(&a, &a), 0.0);
        assert!((haversine_distance(&a, &b) - haversine_distance(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn test_triangle_inequality() {
        let a = GpsPoint::new(32.0, 34.0);
        let b = GpsPoint::new(32.005, 34.003);
        let c = GpsPoint::new(32.002, 34.010);
        let ab = haversine_distance(&a, &b);
        let bc = haversine_distance(&b, &c);
        let ac = haversine_distance(&a, &c);
        assert!(ac <= ab + bc + 1e-6);
    }

    #[test]
    fn test_nan_propagates() {
        let a = GpsPoint::new(f64::NAN, 34.0);
        let b = GpsPoint::new(32.0, 34.0);
        assert!(haversine_distance(&a, &b).is_nan());
        assert!(!is_within(&a, &b, 1000.0));
    }

    #[test]
    fn test_short_routes_have_no_distance() {
        assert_eq!(total_distance(&[]), 0.0);
        assert_eq!(total_distance(&[fix(32.0, 34.0, 0)]), 0.0);
    }

    #[test]
    fn test_duration_variants() {
        let route = vec![fix(32.0, 34.0, 10_000), fix(32.0, 34.0, 40_000)];
        assert_eq!(duration_seconds(&route, None, 0), 30.0);
        assert_eq!(duration_seconds(&route, Some(0), 0), 40.0);
        // Empty route with explicit start counts up to now
        assert_eq!(duration_seconds(&[], Some(1_000), 6_000), 5.0);
        assert_eq!(duration_seconds(&[], None, 6_000), 0.0);
    }

    #[test]
    fn test_average_speed() {
        let route = vec![fix(32.0000, 34.0, 0), fix(32.0010, 34.0, 100_000)];
        let speed = average_speed(&route);
        assert!(speed > 1.0 && speed < 1.2, "got {}", speed);
        assert_eq!(average_speed(&route[..1]), 0.0);
    }

    #[test]
    fn test_is_within() {
        let a = GpsPoint::new(32.0, 34.0);
        let b = GpsPoint::new(32.0002, 34.0); // ~22m
        assert!(is_within(&a, &b, 30.0));
        assert!(!is_within(&a, &b, 10.0));
    }
}
