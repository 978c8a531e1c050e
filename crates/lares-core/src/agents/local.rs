//! Local discovery agent
//!
//! Attaches nearby points of interest to geocoded candidates. Only the
//! top few candidates get a live lookup; the rest carry an empty list.
//! A provider failure for one candidate degrades that candidate only,
//! so the batch as a whole always succeeds.

use crate::envelope::{Envelope, Payload};
use crate::types::EnrichedCandidate;
use futures::StreamExt;
use lares_geo::{PoiProvider, DEFAULT_RADIUS_M};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Local discovery configuration.
#[derive(Debug, Clone)]
pub struct LocalDiscoveryConfig {
    /// Candidates that get a live POI lookup, from the top
    pub lookup_count: usize,
    /// Concurrent lookups
    pub concurrency: usize,
    /// Search radius in meters
    pub radius_m: u32,
}

impl Default for LocalDiscoveryConfig {
    fn default() -> Self {
        Self {
            lookup_count: 5,
            concurrency: 4,
            radius_m: DEFAULT_RADIUS_M,
        }
    }
}

/// The local discovery agent.
pub struct LocalDiscoveryAgent {
    provider: Option<Arc<dyn PoiProvider>>,
    config: LocalDiscoveryConfig,
}

impl LocalDiscoveryAgent {
    /// Create the agent. `provider = None` means the key is missing;
    /// every candidate then carries an empty POI list.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn PoiProvider>>, config: LocalDiscoveryConfig) -> Self {
        Self { provider, config }
    }

    /// Handle one envelope. Accepts `DiscoverBatch`, answers
    /// `DiscoverReply`.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::DiscoverBatch { candidates } = envelope.payload else {
            return Envelope::failure(
                session_id,
                Payload::DiscoverReply { enriched: vec![] },
                "local discovery agent received a non-discovery payload",
            );
        };

        let lookup_count = self.config.lookup_count;
        let radius_m = self.config.radius_m;

        let enriched: Vec<EnrichedCandidate> = futures::stream::iter(
            candidates.into_iter().enumerate(),
        )
        .map(|(index, geo)| {
            let provider = self.provider.clone();
            async move {
                let pois = if index < lookup_count {
                    match &provider {
                        Some(provider) => match provider
                            .pois_near(geo.latitude, geo.longitude, radius_m, None)
                            .await
                        {
                            Ok(pois) => pois,
                            Err(e) => {
                                warn!(url = %geo.candidate.url, error = %e, "poi lookup failed");
                                Vec::new()
                            }
                        },
                        None => Vec::new(),
                    }
                } else {
                    Vec::new()
                };
                EnrichedCandidate { geo, pois }
            }
        })
        .buffered(self.config.concurrency.max(1))
        .collect()
        .await;

        debug!(count = enriched.len(), "local discovery batch complete");
        Envelope::response(session_id, Payload::DiscoverReply { enriched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, GeoCandidate};
    use lares_geo::{Error as GeoError, Poi, PoiCategory, Result as GeoResult};

    /// Stub returning one school per lookup, or failing on demand.
    struct StubPois {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PoiProvider for StubPois {
        async fn pois_near(
            &self,
            lat: f64,
            lon: f64,
            _radius_m: u32,
            _categories: Option<&[PoiCategory]>,
        ) -> GeoResult<Vec<Poi>> {
            if self.fail {
                return Err(GeoError::Transient("poi outage".to_string()));
            }
            Ok(vec![Poi {
                name: "Escola Básica".to_string(),
                category: PoiCategory::School,
                latitude: lat + 0.001,
                longitude: lon,
                distance_meters: 111,
            }])
        }
    }

    fn geo(url: &str) -> GeoCandidate {
        GeoCandidate {
            candidate: Candidate {
                title: url.to_string(),
                address: "Faro".to_string(),
                url: url.to_string(),
                ..Candidate::default()
            },
            latitude: 37.0,
            longitude: -7.9,
            geocode_confidence: 0.9,
        }
    }

    fn enriched_of(envelope: Envelope) -> Vec<EnrichedCandidate> {
        match envelope.payload {
            Payload::DiscoverReply { enriched } => enriched,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_top_candidates_get_pois_rest_get_empty() {
        let agent = LocalDiscoveryAgent::new(
            Some(Arc::new(StubPois { fail: false })),
            LocalDiscoveryConfig {
                lookup_count: 2,
                ..LocalDiscoveryConfig::default()
            },
        );

        let batch: Vec<GeoCandidate> = (0..4).map(|i| geo(&format!("u{i}"))).collect();
        let enriched = enriched_of(
            agent
                .handle(Envelope::request("s1", Payload::DiscoverBatch { candidates: batch }))
                .await,
        );

        assert_eq!(enriched.len(), 4);
        assert_eq!(enriched[0].pois.len(), 1);
        assert_eq!(enriched[1].pois.len(), 1);
        assert!(enriched[2].pois.is_empty());
        assert!(enriched[3].pois.is_empty());
        // Order preserved.
        let urls: Vec<&str> = enriched.iter().map(|e| e.geo.candidate.url.as_str()).collect();
        assert_eq!(urls, vec!["u0", "u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_empty_list() {
        let agent = LocalDiscoveryAgent::new(
            Some(Arc::new(StubPois { fail: true })),
            LocalDiscoveryConfig::default(),
        );
        let enriched = enriched_of(
            agent
                .handle(Envelope::request(
                    "s1",
                    Payload::DiscoverBatch { candidates: vec![geo("u0")] },
                ))
                .await,
        );
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].pois.is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_still_succeeds() {
        let agent = LocalDiscoveryAgent::new(None, LocalDiscoveryConfig::default());
        let enriched = enriched_of(
            agent
                .handle(Envelope::request(
                    "s1",
                    Payload::DiscoverBatch { candidates: vec![geo("u0")] },
                ))
                .await,
        );
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].pois.is_empty());
    }
}
