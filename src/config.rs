//! Tracker configuration.
//!
//! Defaults carry the reference thresholds. Hosts may override any subset
//! from JSON; missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalkError};

/// Thresholds for ending a walk automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCompleteConfig {
    /// Evaluate auto-completion at all.
    /// Default: true
    pub enabled: bool,

    /// Distance from the start point that counts as "back home".
    /// Default: 30.0 meters
    pub radius_meters: f64,

    /// Time the walker must stay within the radius.
    /// Default: 300 seconds
    pub dwell_seconds: f64,

    /// Minimum route length before auto-completion is considered, to avoid
    /// firing right after the walk starts.
    /// Default: 11 points
    pub min_points: usize,
}

impl Default for AutoCompleteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius_meters: 30.0,
            dwell_seconds: 300.0,
            min_points: 11,
        }
    }
}

/// Point-of-interest lookup and visit confirmation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiConfig {
    /// Query the places provider at all.
    /// Default: true
    pub enabled: bool,

    /// Radius passed to the places provider.
    /// Default: 100.0 meters
    pub search_radius_meters: f64,

    /// Distance from a POI that counts as "at the place".
    /// Default: 50.0 meters
    pub visit_radius_meters: f64,

    /// Dwell time required to confirm a visit.
    /// Default: 180 seconds
    pub dwell_seconds: f64,

    /// Issue a lookup on every Nth accepted fix.
    /// Default: 5
    pub query_every_n_fixes: usize,

    /// Give up on a provider call after this long.
    /// Default: 10000 ms
    pub lookup_timeout_ms: u64,
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_radius_meters: 100.0,
            visit_radius_meters: 50.0,
            dwell_seconds: 180.0,
            query_every_n_fixes: 5,
            lookup_timeout_ms: 10_000,
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub auto_complete: AutoCompleteConfig,
    pub poi: PoiConfig,
}

impl TrackerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json).map_err(|e| WalkError::Config {
            message: format!("invalid tracker config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the detectors meaningless.
    pub fn validate(&self) -> Result<()> {
        let ac = &self.auto_complete;
        if !(ac.radius_meters > 0.0) {
            return Err(WalkError::config("auto_complete.radius_meters must be positive"));
        }
        if !(ac.dwell_seconds > 0.0) {
            return Err(WalkError::config("auto_complete.dwell_seconds must be positive"));
        }
        if ac.min_points < 2 {
            return Err(WalkError::config("auto_complete.min_points must be at least 2"));
        }

        let poi = &self.poi;
        if !(poi.search_radius_meters > 0.0) || !(poi.visit_radius_meters > 0.0) {
            return Err(WalkError::config("poi radii must be positive"));
        }
        if !(poi.dwell_seconds > 0.0) {
            return Err(WalkError::config("poi.dwell_seconds must be positive"));
        }
        if poi.query_every_n_fixes == 0 {
            return Err(WalkError::config("poi.query_every_n_fixes must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_complete.radius_meters, 30.0);
        assert_eq!(config.auto_complete.dwell_seconds, 300.0);
        assert_eq!(config.auto_complete.min_points, 11);
        assert_eq!(config.poi.visit_radius_meters, 50.0);
        assert_eq!(config.poi.dwell_seconds, 180.0);
        assert_eq!(config.poi.query_every_n_fixes, 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TrackerConfig::from_json(r#"{"auto_complete": {"radius_meters": 40.0}}"#)
            .unwrap();
        assert_eq!(config.auto_complete.radius_meters, 40.0);
        assert_eq!(config.auto_complete.min_points, 11);
        assert_eq!(config.poi, PoiConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = TrackerConfig::from_json(r#"{"poi": {"query_every_n_fixes": 0}}"#).unwrap_err();
        assert!(matches!(err, WalkError::Config { .. }));

        assert!(TrackerConfig::from_json("not json").is_err());
    }
}
