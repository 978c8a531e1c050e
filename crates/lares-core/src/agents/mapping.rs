//! Mapping agent
//!
//! Resolves a coordinate for each candidate, preserving input order
//! and dropping candidates no strategy can place. Resolution tries,
//! in order: coordinates already on the candidate, a geocode of the
//! full address, then a geocode of city + country. The whole batch
//! shares one deadline; entries that miss it count as failed.

use crate::envelope::{Envelope, Payload};
use crate::types::{Candidate, GeoCandidate};
use futures::StreamExt;
use lares_geo::{find_location, find_location_in_text, Geocoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Mapping agent configuration.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    /// Concurrent geocodes
    pub concurrency: usize,
    /// Shared deadline for one batch
    pub batch_deadline: Duration,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            batch_deadline: Duration::from_secs(20),
        }
    }
}

/// The mapping agent.
pub struct MappingAgent {
    geocoder: Option<Arc<dyn Geocoder>>,
    config: MappingConfig,
}

impl MappingAgent {
    /// Create the agent. `geocoder = None` means the key is missing;
    /// only candidates that already carry coordinates survive.
    #[must_use]
    pub fn new(geocoder: Option<Arc<dyn Geocoder>>, config: MappingConfig) -> Self {
        Self { geocoder, config }
    }

    /// Handle one envelope. Accepts `MapBatch`, answers `MapReply`.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::MapBatch {
            candidates,
            location,
        } = envelope.payload
        else {
            return Envelope::failure(
                session_id,
                Payload::MapReply { geocoded: vec![] },
                "mapping agent received a non-mapping payload",
            );
        };

        let total = candidates.len();
        let deadline = Instant::now() + self.config.batch_deadline;

        let resolved: Vec<Option<GeoCandidate>> = futures::stream::iter(candidates)
            .map(|candidate| {
                let geocoder = self.geocoder.clone();
                let location = location.clone();
                async move {
                    match tokio::time::timeout_at(
                        deadline,
                        resolve(geocoder.as_deref(), candidate, &location),
                    )
                    .await
                    {
                        Ok(resolved) => resolved,
                        Err(_) => {
                            warn!("geocode missed the batch deadline");
                            None
                        }
                    }
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let geocoded: Vec<GeoCandidate> = resolved.into_iter().flatten().collect();
        debug!(total, geocoded = geocoded.len(), "mapping batch complete");
        Envelope::response(session_id, Payload::MapReply { geocoded })
    }
}

/// Resolve one candidate through the strategy chain.
async fn resolve(
    geocoder: Option<&dyn Geocoder>,
    candidate: Candidate,
    search_location: &str,
) -> Option<GeoCandidate> {
    if let Some(coords) = candidate.coordinates {
        return Some(GeoCandidate {
            candidate,
            latitude: coords.latitude,
            longitude: coords.longitude,
            geocode_confidence: 1.0,
        });
    }

    let geocoder = geocoder?;
    let country_hint = country_hint_for(&candidate, search_location);

    if !candidate.address.trim().is_empty() {
        match geocoder.geocode(&candidate.address, country_hint).await {
            Ok(Some(geocode)) if geocode.is_confident() => {
                return Some(GeoCandidate {
                    candidate,
                    latitude: geocode.lat,
                    longitude: geocode.lon,
                    geocode_confidence: geocode.confidence,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(address = %candidate.address, error = %e, "address geocode failed"),
        }
    }

    // City + country fallback puts the pin on the town at least.
    let city = candidate
        .city
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| search_location.to_string());
    let country_label = match country_hint {
        Some("PT") => "Portugal",
        Some("US") => "USA",
        _ => "",
    };
    let fallback_query = if country_label.is_empty() {
        city
    } else {
        format!("{city}, {country_label}")
    };

    match geocoder.geocode(&fallback_query, country_hint).await {
        Ok(Some(geocode)) if geocode.is_confident() => Some(GeoCandidate {
            candidate,
            latitude: geocode.lat,
            longitude: geocode.lon,
            geocode_confidence: geocode.confidence,
        }),
        Ok(_) => {
            debug!(query = %fallback_query, "all geocode strategies failed, dropping candidate");
            None
        }
        Err(e) => {
            debug!(query = %fallback_query, error = %e, "fallback geocode failed");
            None
        }
    }
}

/// Country hint from the locations table, via the search location or
/// anything recognizable in the candidate's own text.
fn country_hint_for(candidate: &Candidate, search_location: &str) -> Option<&'static str> {
    find_location(search_location)
        .or_else(|| find_location_in_text(&candidate.address))
        .or_else(|| candidate.city.as_deref().and_then(find_location))
        .map(|entry| entry.country)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinates;
    use lares_geo::{Geocode, Result as GeoResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Geocoder stub mapping query substrings to fixed results.
    struct StubGeocoder {
        answers: HashMap<String, Geocode>,
        calls: Mutex<Vec<String>>,
    }

    impl StubGeocoder {
        fn new(answers: Vec<(&str, f64, f64, f64)>) -> Self {
            let answers = answers
                .into_iter()
                .map(|(key, lat, lon, confidence)| {
                    (
                        key.to_string(),
                        Geocode {
                            lat,
                            lon,
                            confidence,
                            normalized_address: key.to_string(),
                        },
                    )
                })
                .collect();
            Self {
                answers,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode(
            &self,
            query: &str,
            _country_hint: Option<&str>,
        ) -> GeoResult<Option<Geocode>> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self
                .answers
                .iter()
                .find(|(key, _)| query.contains(key.as_str()))
                .map(|(_, geocode)| geocode.clone()))
        }
    }

    fn candidate(url: &str, address: &str) -> Candidate {
        Candidate {
            title: address.to_string(),
            address: address.to_string(),
            url: url.to_string(),
            ..Candidate::default()
        }
    }

    fn map_batch(candidates: Vec<Candidate>) -> Envelope {
        Envelope::request(
            "s1",
            Payload::MapBatch {
                candidates,
                location: "Faro".to_string(),
            },
        )
    }

    fn geocoded_of(envelope: Envelope) -> Vec<GeoCandidate> {
        match envelope.payload {
            Payload::MapReply { geocoded } => geocoded,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_existing_coordinates_skip_geocoding() {
        let stub = Arc::new(StubGeocoder::new(vec![]));
        let agent = MappingAgent::new(Some(stub.clone()), MappingConfig::default());

        let mut listing = candidate("u1", "Rua X");
        listing.coordinates = Some(Coordinates {
            latitude: 37.0,
            longitude: -7.9,
        });

        let geocoded = geocoded_of(agent.handle(map_batch(vec![listing])).await);
        assert_eq!(geocoded.len(), 1);
        assert!((geocoded[0].geocode_confidence - 1.0).abs() < f64::EPSILON);
        assert!(stub.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_preserved_and_failures_dropped() {
        let stub = Arc::new(StubGeocoder::new(vec![
            ("Rua A", 37.01, -7.91, 0.9),
            ("Rua C", 37.03, -7.93, 0.8),
        ]));
        let agent = MappingAgent::new(Some(stub), MappingConfig::default());

        let geocoded = geocoded_of(
            agent
                .handle(map_batch(vec![
                    candidate("u1", "Rua A, Faro"),
                    candidate("u2", "Rua B desconhecida, Lisboa norte"),
                    candidate("u3", "Rua C, Faro"),
                ]))
                .await,
        );
        // Rua B falls back to "Faro, Portugal" which the stub does not
        // answer either, so it drops; order of the rest holds.
        assert_eq!(geocoded.len(), 2);
        assert_eq!(geocoded[0].candidate.url, "u1");
        assert_eq!(geocoded[1].candidate.url, "u3");
    }

    #[tokio::test]
    async fn test_low_confidence_falls_through_to_city() {
        let stub = Arc::new(StubGeocoder::new(vec![
            ("Rua Vaga", 10.0, 10.0, 0.1),
            ("Faro", 37.0194, -7.9304, 0.7),
        ]));
        let agent = MappingAgent::new(Some(stub), MappingConfig::default());

        let geocoded =
            geocoded_of(agent.handle(map_batch(vec![candidate("u1", "Rua Vaga")])).await);
        assert_eq!(geocoded.len(), 1);
        assert!((geocoded[0].latitude - 37.0194).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_geocoder_keeps_only_owned_coordinates() {
        let agent = MappingAgent::new(None, MappingConfig::default());

        let mut with_coords = candidate("u1", "Rua A");
        with_coords.coordinates = Some(Coordinates {
            latitude: 37.0,
            longitude: -7.9,
        });
        let without = candidate("u2", "Rua B");

        let geocoded = geocoded_of(agent.handle(map_batch(vec![with_coords, without])).await);
        assert_eq!(geocoded.len(), 1);
        assert_eq!(geocoded[0].candidate.url, "u1");
    }
}
