//! Point-of-interest lookup
//!
//! Typed POIs within a radius of a coordinate, ordered by ascending
//! distance. The provider sometimes omits distances, so they are
//! recomputed client-side with the spherical law of cosines.

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default POI endpoint (category search)
pub const DEFAULT_POI_URL: &str = "https://api.mapbox.com/search/searchbox/v1/category";

/// Default search radius in meters
pub const DEFAULT_RADIUS_M: u32 = 1500;

/// Results requested per category
const LIMIT_PER_CATEGORY: u32 = 2;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// POI category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiCategory {
    /// School or other education facility
    School,
    /// Hospital or clinic
    Hospital,
    /// Grocery store or supermarket
    Grocery,
    /// Restaurant
    Restaurant,
    /// Park or green space
    Park,
    /// Bus, train, or metro station
    TransitStation,
    /// Cafe
    Cafe,
    /// Gym or fitness center
    Gym,
    /// Anything else the provider returns
    Other,
}

impl PoiCategory {
    /// All categories queried by default.
    pub const DEFAULT_SET: &'static [PoiCategory] = &[
        PoiCategory::School,
        PoiCategory::Hospital,
        PoiCategory::Grocery,
        PoiCategory::Restaurant,
        PoiCategory::Park,
        PoiCategory::TransitStation,
        PoiCategory::Cafe,
        PoiCategory::Gym,
    ];

    /// Provider slug for the category endpoint.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            PoiCategory::School => "school",
            PoiCategory::Hospital => "hospital",
            PoiCategory::Grocery => "grocery",
            PoiCategory::Restaurant => "restaurant",
            PoiCategory::Park => "park",
            PoiCategory::TransitStation => "transit_station",
            PoiCategory::Cafe => "cafe",
            PoiCategory::Gym => "gym",
            PoiCategory::Other => "other",
        }
    }
}

/// A point of interest near a property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    /// Display name
    pub name: String,
    /// Category
    pub category: PoiCategory,
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
    /// Distance from the query point in meters
    pub distance_meters: u32,
}

/// POI provider trait implemented by the HTTP client and test stubs.
#[async_trait::async_trait]
pub trait PoiProvider: Send + Sync {
    /// Find POIs within `radius_m` of a coordinate, ascending by
    /// distance. `categories = None` means the default set.
    async fn pois_near(
        &self,
        lat: f64,
        lon: f64,
        radius_m: u32,
        categories: Option<&[PoiCategory]>,
    ) -> Result<Vec<Poi>>;
}

/// POI provider configuration
#[derive(Clone)]
pub struct PoiConfig {
    /// API key
    pub api_key: String,
    /// Endpoint URL
    pub base_url: String,
}

impl fmt::Debug for PoiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl PoiConfig {
    /// Create a configuration with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_POI_URL.to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("POI_PROVIDER_API_KEY")
            .map_err(|_| Error::NotConfigured("POI_PROVIDER_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set the endpoint URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// HTTP POI provider.
pub struct HttpPoiProvider {
    client: Client,
    config: PoiConfig,
}

impl HttpPoiProvider {
    /// Create a new provider.
    pub fn new(config: PoiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(PoiConfig::from_env()?)
    }

    /// Query one category near a coordinate.
    async fn category_near(
        &self,
        category: PoiCategory,
        lat: f64,
        lon: f64,
    ) -> Result<Vec<Poi>> {
        let url = format!("{}/{}", self.config.base_url, category.slug());
        // Proximity is lon,lat on this provider.
        let proximity = format!("{lon},{lat}");
        let limit = LIMIT_PER_CATEGORY.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_token", self.config.api_key.as_str()),
                ("proximity", proximity.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(format!("http {status}")),
                429 | 500..=599 => Error::Transient(format!("http {status}")),
                _ => Error::Fatal(format!("http {status}")),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        Ok(parse_features(&body, category, lat, lon))
    }
}

/// Parse the feature collection for one category.
fn parse_features(body: &Value, category: PoiCategory, origin_lat: f64, origin_lon: f64) -> Vec<Poi> {
    let features = match body.get("features").and_then(Value::as_array) {
        Some(features) => features,
        None => return Vec::new(),
    };

    features
        .iter()
        .filter_map(|feature| {
            let coords = feature.get("geometry")?.get("coordinates")?.as_array()?;
            let longitude = coords.first()?.as_f64()?;
            let latitude = coords.get(1)?.as_f64()?;
            let properties = feature.get("properties")?;
            let name = properties.get("name")?.as_str()?.to_string();
            let distance_meters = properties
                .get("distance")
                .and_then(Value::as_f64)
                .unwrap_or_else(|| distance_m(origin_lat, origin_lon, latitude, longitude))
                .round() as u32;

            Some(Poi {
                name,
                category,
                latitude,
                longitude,
                distance_meters,
            })
        })
        .collect()
}

/// Great-circle distance in meters via the spherical law of cosines.
#[must_use]
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();
    let central = (phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * delta_lambda.cos())
        .clamp(-1.0, 1.0)
        .acos();
    EARTH_RADIUS_M * central
}

#[async_trait::async_trait]
impl PoiProvider for HttpPoiProvider {
    #[instrument(skip(self))]
    async fn pois_near(
        &self,
        lat: f64,
        lon: f64,
        radius_m: u32,
        categories: Option<&[PoiCategory]>,
    ) -> Result<Vec<Poi>> {
        let categories = categories.unwrap_or(PoiCategory::DEFAULT_SET);
        let mut pois = Vec::new();

        for &category in categories {
            match self.category_near(category, lat, lon).await {
                Ok(found) => pois.extend(found),
                // One bad category must not sink the lookup.
                Err(e) => warn!(category = category.slug(), error = %e, "category lookup failed"),
            }
        }

        pois.retain(|poi| poi.distance_meters <= radius_m);
        pois.sort_by_key(|poi| poi.distance_meters);
        debug!(lat, lon, count = pois.len(), "poi lookup complete");
        Ok(pois)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_distance_zero() {
        assert!(distance_m(37.0, -7.9, 37.0, -7.9) < 1e-6);
    }

    #[test]
    fn test_distance_known_pair() {
        // Faro to Olhão is roughly 8 km.
        let d = distance_m(37.0194, -7.9304, 37.0260, -7.8411);
        assert!((7_000.0..10_000.0).contains(&d), "unexpected distance {d}");
    }

    #[test]
    fn test_parse_features_computes_missing_distance() {
        let body = json!({
            "features": [{
                "geometry": { "coordinates": [-7.9310, 37.0200] },
                "properties": { "name": "Escola Secundária" }
            }]
        });
        let pois = parse_features(&body, PoiCategory::School, 37.0194, -7.9304);
        assert_eq!(pois.len(), 1);
        assert!(pois[0].distance_meters < 200);
    }

    #[test]
    fn test_parse_features_prefers_provider_distance() {
        let body = json!({
            "features": [{
                "geometry": { "coordinates": [-7.9310, 37.0200] },
                "properties": { "name": "Cafe Central", "distance": 420.0 }
            }]
        });
        let pois = parse_features(&body, PoiCategory::Cafe, 37.0194, -7.9304);
        assert_eq!(pois[0].distance_meters, 420);
    }

    #[test]
    fn test_parse_skips_nameless_features() {
        let body = json!({
            "features": [{
                "geometry": { "coordinates": [-7.93, 37.02] },
                "properties": {}
            }]
        });
        assert!(parse_features(&body, PoiCategory::Park, 37.0, -7.9).is_empty());
    }

    #[test]
    fn test_category_serde_snake_case() {
        let rendered = serde_json::to_string(&PoiCategory::TransitStation).unwrap();
        assert_eq!(rendered, "\"transit_station\"");
        let parsed: PoiCategory = serde_json::from_str("\"school\"").unwrap();
        assert_eq!(parsed, PoiCategory::School);
    }
}
