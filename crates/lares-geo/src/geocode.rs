//! Forward geocoding
//!
//! Free-text address to coordinate with a confidence score. One
//! transient retry, nothing more: geocoding sits inside a batched
//! pipeline stage that has its own deadline.

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default geocoding endpoint (Mapbox v6 forward)
pub const DEFAULT_GEOCODER_URL: &str = "https://api.mapbox.com/search/geocode/v6/forward";

/// Confidence below this is treated as not found by callers.
pub const MIN_CONFIDENCE: f64 = 0.3;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A geocoding result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geocode {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lon: f64,
    /// Match confidence in [0, 1]
    pub confidence: f64,
    /// Provider-normalized address
    pub normalized_address: String,
}

impl Geocode {
    /// Whether the match is confident enough to use.
    #[must_use]
    pub fn is_confident(&self) -> bool {
        self.confidence >= MIN_CONFIDENCE
    }
}

/// Geocoder trait implemented by the HTTP client and test stubs.
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Forward-geocode free text. `Ok(None)` means no match.
    async fn geocode(&self, query: &str, country_hint: Option<&str>) -> Result<Option<Geocode>>;
}

/// Geocoder configuration
#[derive(Clone)]
pub struct GeocoderConfig {
    /// API key
    pub api_key: String,
    /// Endpoint URL
    pub base_url: String,
}

impl fmt::Debug for GeocoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocoderConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeocoderConfig {
    /// Create a configuration with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_GEOCODER_URL.to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEOCODER_API_KEY")
            .map_err(|_| Error::NotConfigured("GEOCODER_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set the endpoint URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// HTTP geocoder client.
pub struct HttpGeocoder {
    client: Client,
    config: GeocoderConfig,
}

impl HttpGeocoder {
    /// Create a new geocoder.
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GeocoderConfig::from_env()?)
    }

    async fn attempt(&self, query: &str, country_hint: Option<&str>) -> Result<Option<Geocode>> {
        let mut request = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("q", query),
                ("access_token", self.config.api_key.as_str()),
                ("limit", "1"),
            ]);
        if let Some(country) = country_hint {
            request = request.query(&[("country", country)]);
        }

        let response = request
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

        Ok(parse_feature(&body))
    }
}

/// Extract the top feature. GeoJSON coordinates are `[lon, lat]`.
fn parse_feature(body: &Value) -> Option<Geocode> {
    let feature = body.get("features")?.as_array()?.first()?;
    let coords = feature.get("geometry")?.get("coordinates")?.as_array()?;
    let lon = coords.first()?.as_f64()?;
    let lat = coords.get(1)?.as_f64()?;
    let properties = feature.get("properties");
    let normalized_address = properties
        .and_then(|p| p.get("full_address"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let confidence = feature
        .get("relevance")
        .and_then(Value::as_f64)
        .or_else(|| {
            properties
                .and_then(|p| p.get("relevance"))
                .and_then(Value::as_f64)
        })
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);

    Some(Geocode {
        lat,
        lon,
        confidence,
        normalized_address,
    })
}

#[async_trait::async_trait]
impl Geocoder for HttpGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, query: &str, country_hint: Option<&str>) -> Result<Option<Geocode>> {
        match self.attempt(query, country_hint).await {
            Ok(result) => {
                debug!(query, found = result.is_some(), "geocode complete");
                Ok(result)
            }
            Err(Error::Transient(first)) => {
                debug!(query, error = %first, "geocode transient failure, retrying once");
                self.attempt(query, country_hint).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_feature() {
        let body = json!({
            "features": [{
                "geometry": { "coordinates": [-7.9304, 37.0194] },
                "properties": { "full_address": "Faro, Portugal" },
                "relevance": 0.9
            }]
        });
        let geocode = parse_feature(&body).unwrap();
        assert!((geocode.lat - 37.0194).abs() < 1e-9);
        assert!((geocode.lon + 7.9304).abs() < 1e-9);
        assert_eq!(geocode.normalized_address, "Faro, Portugal");
        assert!(geocode.is_confident());
    }

    #[test]
    fn test_parse_no_features() {
        assert!(parse_feature(&json!({ "features": [] })).is_none());
        assert!(parse_feature(&json!({})).is_none());
    }

    #[test]
    fn test_missing_relevance_defaults_confident() {
        let body = json!({
            "features": [{
                "geometry": { "coordinates": [0.0, 0.0] },
                "properties": {}
            }]
        });
        let geocode = parse_feature(&body).unwrap();
        assert!((geocode.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_confidence_not_confident() {
        let geocode = Geocode {
            lat: 0.0,
            lon: 0.0,
            confidence: 0.2,
            normalized_address: String::new(),
        };
        assert!(!geocode.is_confident());
    }
}
