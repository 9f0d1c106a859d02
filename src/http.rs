//! HTTP places provider backed by a Nearby Search style endpoint.
//!
//! - Single pooled `reqwest` client
//! - Retry with exponential backoff on 429 and transport errors
//! - `ZERO_RESULTS` is an empty list, not an error

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, WalkError};
use crate::poi::PlacesProvider;
use crate::{GpsPoint, PoiCandidate};

/// Default Nearby Search endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct NearbyResponse {
    status: String,
    #[serde(default)]
    results: Vec<NearbyPlace>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearbyPlace {
    place_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    types: Vec<String>,
    geometry: NearbyGeometry,
}

#[derive(Debug, Deserialize)]
struct NearbyGeometry {
    location: NearbyLocation,
}

#[derive(Debug, Deserialize)]
struct NearbyLocation {
    lat: f64,
    lng: f64,
}

/// Parse a Nearby Search response body into candidates.
pub fn parse_places_response(body: &str) -> Result<Vec<PoiCandidate>> {
    let response: NearbyResponse = serde_json::from_str(body)?;

    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Ok(Vec::new()),
        other => {
            return Err(WalkError::Http {
                message: response
                    .error_message
                    .map(|m| format!("{}: {}", other, m))
                    .unwrap_or_else(|| other.to_string()),
                status_code: None,
            })
        }
    }

    Ok(response
        .results
        .into_iter()
        .map(|place| PoiCandidate {
            place_id: place.place_id,
            name: place.name,
            place_type: place
                .types
                .into_iter()
                .next()
                .unwrap_or_else(|| "point_of_interest".to_string()),
            location: GpsPoint::new(place.geometry.location.lat, place.geometry.location.lng),
        })
        .filter(|c| c.location.is_valid())
        .collect())
}

/// Places lookups over HTTP.
pub struct HttpPlacesProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    place_type: Option<String>,
    consecutive_429s: AtomicU32,
}

impl HttpPlacesProvider {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalkError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            place_type: None,
            consecutive_429s: AtomicU32::new(0),
        })
    }

    /// Restrict results to one place type, e.g. "park".
    pub fn with_place_type(mut self, place_type: impl Into<String>) -> Self {
        self.place_type = Some(place_type.into());
        self
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed);
        // 1s, 2s, 4s, 8s, then capped
        Duration::from_millis(1000 * (1 << count.min(3)))
    }

    fn query(&self, point: GpsPoint, radius_meters: f64) -> Vec<(&'static str, String)> {
        let mut query = vec![
            (
                "location",
                format!("{},{}", point.latitude, point.longitude),
            ),
            ("radius", format!("{:.0}", radius_meters)),
            ("key", self.api_key.clone()),
        ];
        if let Some(ref place_type) = self.place_type {
            query.push(("type", place_type.clone()));
        }
        query
    }
}

#[async_trait]
impl PlacesProvider for HttpPlacesProvider {
    async fn search_nearby(&self, point: GpsPoint, radius_meters: f64) -> Result<Vec<PoiCandidate>> {
        let query = self.query(point, radius_meters);
        let mut retries = 0;

        loop {
            let response = self.client.get(&self.endpoint).query(&query).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(WalkError::Http {
                                message: "Max retries exceeded".to_string(),
                                status_code: Some(status.as_u16()),
                            });
                        }
                        let backoff = self.record_429();
                        warn!("[Places] 429, retry {} after {:?}", retries, backoff);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    self.consecutive_429s.store(0, Ordering::Relaxed);

                    if !status.is_success() {
                        return Err(WalkError::Http {
                            message: format!("HTTP {}", status),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    let body = resp.text().await.map_err(|e| WalkError::Http {
                        message: format!("Failed to read body: {}", e),
                        status_code: Some(status.as_u16()),
                    })?;
                    let places = parse_places_response(&body)?;
                    debug!("[Places] {} results", places.len());
                    return Ok(places);
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(WalkError::Http {
                            message: format!("Request error: {}", e),
                            status_code: None,
                        });
                    }
                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!("[Places] Request error: {}, retry {} after {:?}", e, retries, backoff);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
