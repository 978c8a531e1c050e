//! Coordinator
//!
//! The request-scoped orchestrator. Owns the session store, the agent
//! topology, the per-stage deadlines, and the partial-failure policy:
//! scoping and research failures shape the whole response, everything
//! downstream degrades to a missing optional field plus a warning in
//! the search summary.

use crate::agents::{
    CommunityAgent, LocalDiscoveryAgent, LocalDiscoveryConfig, MappingAgent, MappingConfig,
    NegotiationAgent, NegotiationConfig, ResearchAgent, ResearchConfig, ScopingState,
};
use crate::envelope::{Envelope, Payload};
use crate::error::{Error, Result};
use crate::session::{SessionStore, DEFAULT_SESSION_CAPACITY};
use crate::types::{
    CommunityReport, EnrichedCandidate, NegotiationRecord, NegotiationRequest, Requirements,
};
use lares_geo::{Geocoder, PoiProvider};
use lares_llm::ChatGateway;
use lares_search::SearchProvider;
use lares_voice::VoiceCallProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-stage time budgets for one chat request.
#[derive(Debug, Clone)]
pub struct StageBudgets {
    /// Whole-request deadline, enforced by the HTTP layer
    pub total: Duration,
    /// Research stage
    pub research: Duration,
    /// Mapping stage
    pub mapping: Duration,
    /// Local discovery stage
    pub discovery: Duration,
    /// Community analysis stage
    pub community: Duration,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            total: Duration::from_secs(90),
            research: Duration::from_secs(60),
            mapping: Duration::from_secs(20),
            discovery: Duration::from_secs(15),
            community: Duration::from_secs(30),
        }
    }
}

/// External collaborators, each optional so a missing key degrades
/// instead of crashing.
#[derive(Clone, Default)]
pub struct Providers {
    /// Chat-completion gateway
    pub gateway: Option<Arc<dyn ChatGateway>>,
    /// Web search / scrape provider
    pub search: Option<Arc<dyn SearchProvider>>,
    /// Forward geocoder
    pub geocoder: Option<Arc<dyn Geocoder>>,
    /// POI provider
    pub pois: Option<Arc<dyn PoiProvider>>,
    /// Telephony provider
    pub voice: Option<Arc<dyn VoiceCallProvider>>,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Session store capacity
    pub session_capacity: usize,
    /// Stage budgets
    pub budgets: StageBudgets,
    /// Research agent settings
    pub research: ResearchConfig,
    /// Mapping agent settings
    pub mapping: MappingConfig,
    /// Local discovery settings
    pub discovery: LocalDiscoveryConfig,
    /// Negotiation settings
    pub negotiation: NegotiationConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_capacity: DEFAULT_SESSION_CAPACITY,
            budgets: StageBudgets::default(),
            research: ResearchConfig::default(),
            mapping: MappingConfig::default(),
            discovery: LocalDiscoveryConfig::default(),
            negotiation: NegotiationConfig::default(),
        }
    }
}

/// Map pin for the top result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopResultCoordinates {
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
    /// Display address
    pub address: String,
    /// Primary image, when the listing has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// The completed-search response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// The requirements the search ran with
    pub requirements: Requirements,
    /// Enriched candidates, ranked
    pub properties: Vec<EnrichedCandidate>,
    /// Human summary, including any degradation warnings
    pub search_summary: String,
    /// Number of returned properties
    pub total_found: usize,
    /// The same enriched set, kept for map rendering
    pub raw_search_results: Vec<EnrichedCandidate>,
    /// Pin for the top result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_result_coordinates: Option<TopResultCoordinates>,
    /// Neighborhood report for the top result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_analysis: Option<CommunityReport>,
}

/// Outcome of one chat request.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    /// Still gathering requirements; surface the message and continue
    Gathering {
        /// Assistant message for the chat bubble
        message: String,
    },
    /// A completed search, possibly with zero results
    Results(Box<SearchResults>),
}

/// The coordinator.
pub struct Coordinator {
    sessions: SessionStore,
    scoping: Option<crate::agents::ScopingAgent>,
    research: Option<ResearchAgent>,
    mapping: MappingAgent,
    discovery: LocalDiscoveryAgent,
    community: Option<CommunityAgent>,
    negotiation: Option<NegotiationAgent>,
    budgets: StageBudgets,
}

impl Coordinator {
    /// Wire the agent topology from the available providers.
    #[must_use]
    pub fn new(providers: Providers, config: CoordinatorConfig) -> Self {
        let scoping = providers
            .gateway
            .clone()
            .map(crate::agents::ScopingAgent::new);
        let research = providers.gateway.clone().map(|gateway| {
            ResearchAgent::new(gateway, providers.search.clone(), config.research.clone())
        });
        let community = providers
            .gateway
            .clone()
            .map(|gateway| CommunityAgent::new(gateway, providers.search.clone()));
        let negotiation = providers.gateway.clone().map(|gateway| {
            NegotiationAgent::new(
                gateway,
                providers.search.clone(),
                providers.voice.clone(),
                config.negotiation.clone(),
            )
        });

        Self {
            sessions: SessionStore::new(config.session_capacity),
            scoping,
            research,
            mapping: MappingAgent::new(providers.geocoder.clone(), config.mapping.clone()),
            discovery: LocalDiscoveryAgent::new(providers.pois.clone(), config.discovery.clone()),
            community,
            negotiation,
            budgets: config.budgets,
        }
    }

    /// The whole-request deadline the HTTP layer should enforce.
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        self.budgets.total
    }

    /// The session store, exposed for tests and diagnostics.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// One chat turn: scoping first, then the full search pipeline
    /// once the requirements are complete.
    #[instrument(skip(self, message))]
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatOutcome> {
        if message.trim().is_empty() {
            return Err(Error::Logic("message must not be empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(Error::Logic("session_id must not be empty".to_string()));
        }

        let entry = self.sessions.get_or_create(session_id);
        // Serializes concurrent requests for the same session.
        let _turn_guard = entry.turn_gate.lock().await;

        let (transcript, partial) = entry.with(|session| {
            let snapshot = (session.transcript.clone(), session.partial.clone());
            session.add_user_turn(message);
            snapshot
        });

        let Some(scoping) = &self.scoping else {
            let reply = Error::Configuration("LLM_API_KEY not set".to_string()).user_message();
            entry.with(|session| session.add_assistant_turn(reply.clone()));
            return Ok(ChatOutcome::Gathering { message: reply });
        };

        let scope_reply = scoping
            .handle(Envelope::request(
                session_id,
                Payload::ScopeTurn {
                    message: message.to_string(),
                    transcript,
                    partial,
                },
            ))
            .await;
        let Payload::ScopeReply(reply) = scope_reply.payload else {
            return Err(Error::Internal("scoping agent answered out of protocol".to_string()));
        };

        entry.with(|session| session.partial = reply.partial.clone());

        if reply.state == ScopingState::Gathering {
            entry.with(|session| session.add_assistant_turn(reply.message_to_user.clone()));
            return Ok(ChatOutcome::Gathering {
                message: reply.message_to_user,
            });
        }

        let requirements = reply
            .requirements
            .ok_or_else(|| Error::Internal("complete scoping reply without requirements".to_string()))?;
        info!(location = %requirements.location, "requirements complete, running search");

        // Research exists whenever scoping does; both hang off the gateway.
        let Some(research) = &self.research else {
            return Err(Error::Internal("research agent missing".to_string()));
        };
        let results = self
            .run_search_pipeline(research, session_id, requirements)
            .await;

        entry.with(|session| {
            session.last_results = Some(results.properties.clone());
            session.add_assistant_turn(results.search_summary.clone());
        });

        Ok(ChatOutcome::Results(Box::new(results)))
    }

    /// Research, then mapping + discovery with community analysis in
    /// parallel, then assembly.
    async fn run_search_pipeline(
        &self,
        research: &ResearchAgent,
        session_id: &str,
        requirements: Requirements,
    ) -> SearchResults {
        let mut warnings: Vec<String> = Vec::new();

        // Research decides the fate of the request on its own.
        let research_reply = match timeout(
            self.budgets.research,
            research.handle(Envelope::request(
                session_id,
                Payload::ResearchRun {
                    requirements: requirements.clone(),
                },
            )),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!("research stage missed its budget");
                return SearchResults {
                    requirements,
                    properties: vec![],
                    search_summary: "The property search took too long and was cut short. \
                                     Please try again."
                        .to_string(),
                    total_found: 0,
                    raw_search_results: vec![],
                    top_result_coordinates: None,
                    community_analysis: None,
                };
            }
        };
        if let Some(error) = &research_reply.error {
            warn!(error = %error, "research degraded");
        }
        let Payload::ResearchReply(outcome) = research_reply.payload else {
            return SearchResults {
                requirements,
                properties: vec![],
                search_summary: "Something went wrong while searching. Please try again."
                    .to_string(),
                total_found: 0,
                raw_search_results: vec![],
                top_result_coordinates: None,
                community_analysis: None,
            };
        };

        if outcome.candidates.is_empty() {
            return SearchResults {
                requirements,
                properties: vec![],
                search_summary: outcome.summary,
                total_found: 0,
                raw_search_results: vec![],
                top_result_coordinates: None,
                community_analysis: None,
            };
        }

        // Community analysis needs only the top candidate's city, so
        // it runs alongside mapping + discovery.
        let top = &outcome.candidates[0];
        let community_location = top
            .city
            .clone()
            .filter(|city| !city.trim().is_empty())
            .unwrap_or_else(|| requirements.location.clone());

        let (enrich_result, community) = tokio::join!(
            self.map_and_discover(session_id, &outcome.candidates, &requirements),
            self.community_report(session_id, community_location),
        );
        let (enriched, mut stage_warnings) = enrich_result;
        warnings.append(&mut stage_warnings);

        let community = match community {
            Some(report) => Some(report),
            None => {
                warnings.push("community analysis is unavailable for this search".to_string());
                None
            }
        };

        let mut search_summary = outcome.summary;
        if !warnings.is_empty() {
            search_summary.push_str(&format!(" (Note: {}.)", warnings.join("; ")));
        }

        let top_result_coordinates = enriched.first().map(|top| TopResultCoordinates {
            latitude: top.geo.latitude,
            longitude: top.geo.longitude,
            address: top.geo.candidate.address.clone(),
            image_url: top.geo.candidate.image_url.clone(),
        });

        let total_found = enriched.len();
        debug!(total_found, "search pipeline assembled");
        SearchResults {
            requirements,
            properties: enriched.clone(),
            search_summary,
            total_found,
            raw_search_results: enriched,
            top_result_coordinates,
            community_analysis: community,
        }
    }

    /// Mapping then discovery, each under its own budget. Misses
    /// degrade to partial output plus a warning.
    async fn map_and_discover(
        &self,
        session_id: &str,
        candidates: &[crate::types::Candidate],
        requirements: &Requirements,
    ) -> (Vec<EnrichedCandidate>, Vec<String>) {
        let mut warnings = Vec::new();

        let geocoded = match timeout(
            self.budgets.mapping,
            self.mapping.handle(Envelope::request(
                session_id,
                Payload::MapBatch {
                    candidates: candidates.to_vec(),
                    location: requirements.location.clone(),
                },
            )),
        )
        .await
        {
            Ok(reply) => match reply.payload {
                Payload::MapReply { geocoded } => geocoded,
                _ => Vec::new(),
            },
            Err(_) => {
                warn!("mapping stage missed its budget");
                warnings.push("map coordinates are incomplete".to_string());
                Vec::new()
            }
        };

        if geocoded.is_empty() {
            if warnings.is_empty() {
                warnings.push("listings could not be placed on the map".to_string());
            }
            return (Vec::new(), warnings);
        }

        let enriched = match timeout(
            self.budgets.discovery,
            self.discovery.handle(Envelope::request(
                session_id,
                Payload::DiscoverBatch {
                    candidates: geocoded.clone(),
                },
            )),
        )
        .await
        {
            Ok(reply) => match reply.payload {
                Payload::DiscoverReply { enriched } => enriched,
                _ => Vec::new(),
            },
            Err(_) => {
                warn!("discovery stage missed its budget");
                warnings.push("nearby places are unavailable".to_string());
                geocoded
                    .into_iter()
                    .map(|geo| EnrichedCandidate { geo, pois: vec![] })
                    .collect()
            }
        };

        (enriched, warnings)
    }

    /// Community analysis under its budget; any failure becomes None.
    async fn community_report(
        &self,
        session_id: &str,
        location: String,
    ) -> Option<CommunityReport> {
        let community = self.community.as_ref()?;
        match timeout(
            self.budgets.community,
            community.handle(Envelope::request(session_id, Payload::CommunityProbe {
                location,
            })),
        )
        .await
        {
            Ok(reply) => match reply.payload {
                Payload::CommunityReply { report } => report,
                _ => None,
            },
            Err(_) => {
                warn!("community stage missed its budget");
                None
            }
        }
    }

    /// The negotiation pipeline: a single synchronous pass-through to
    /// the negotiation agent.
    #[instrument(skip(self, request), fields(address = %request.address))]
    pub async fn negotiate(&self, request: NegotiationRequest) -> Result<NegotiationRecord> {
        if request.address.trim().is_empty() {
            return Err(Error::Logic("address must not be empty".to_string()));
        }
        if request.name.trim().is_empty() {
            return Err(Error::Logic("name must not be empty".to_string()));
        }

        let Some(negotiation) = &self.negotiation else {
            return Err(Error::Configuration("LLM_API_KEY not set".to_string()));
        };

        let session_id = Uuid::new_v4().to_string();
        let reply = negotiation
            .handle(Envelope::request(session_id, Payload::NegotiateCall(request)))
            .await;
        match reply.payload {
            Payload::NegotiateReply(record) => Ok(*record),
            _ => Err(Error::Internal(
                "negotiation agent answered out of protocol".to_string(),
            )),
        }
    }
}
