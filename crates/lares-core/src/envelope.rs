//! Inter-agent message envelope
//!
//! The coordinator and the agents exchange these typed value messages.
//! Dispatch is an in-process call; the envelope is the seam, not a
//! wire format. Envelopes are immutable once constructed.

use crate::agents::research::ResearchOutcome;
use crate::agents::scoping::ScopingReply;
use crate::session::Turn;
use crate::types::{
    Candidate, CommunityReport, EnrichedCandidate, GeoCandidate, NegotiationRecord,
    NegotiationRequest, PartialRequirements, Requirements,
};
use serde::{Deserialize, Serialize};

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Coordinator to agent
    Request,
    /// Agent to coordinator
    Response,
}

/// Per-agent payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// One user turn for the scoping agent, with the conversation
    /// state the coordinator owns
    ScopeTurn {
        /// The new user message
        message: String,
        /// Prior transcript
        transcript: Vec<Turn>,
        /// Requirements gathered so far
        partial: PartialRequirements,
    },
    /// Scoping agent reply
    ScopeReply(ScopingReply),
    /// Run a property search
    ResearchRun {
        /// Validated requirements
        requirements: Requirements,
    },
    /// Research agent reply
    ResearchReply(ResearchOutcome),
    /// Geocode an ordered candidate batch
    MapBatch {
        /// Candidates in ranked order
        candidates: Vec<Candidate>,
        /// The search location, used as the city fallback
        location: String,
    },
    /// Mapping agent reply; order preserved, failures dropped
    MapReply {
        /// Geocoded candidates
        geocoded: Vec<GeoCandidate>,
    },
    /// Attach POIs to a geocoded batch
    DiscoverBatch {
        /// Geocoded candidates in ranked order
        candidates: Vec<GeoCandidate>,
    },
    /// Local-discovery agent reply
    DiscoverReply {
        /// Enriched candidates
        enriched: Vec<EnrichedCandidate>,
    },
    /// Score the top result's neighborhood
    CommunityProbe {
        /// City or location label
        location: String,
    },
    /// Community agent reply
    CommunityReply {
        /// The report, absent on any failure
        report: Option<CommunityReport>,
    },
    /// Start a negotiation call
    NegotiateCall(NegotiationRequest),
    /// Negotiation agent reply
    NegotiateReply(Box<NegotiationRecord>),
}

/// The typed message exchanged between coordinator and agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Session the message belongs to
    pub session_id: String,
    /// Direction
    pub kind: EnvelopeKind,
    /// Payload variant
    pub payload: Payload,
    /// Set when the agent failed; the payload then carries whatever
    /// degraded content the agent could produce
    pub error: Option<String>,
}

impl Envelope {
    /// Build a request envelope.
    #[must_use]
    pub fn request(session_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EnvelopeKind::Request,
            payload,
            error: None,
        }
    }

    /// Build a response envelope.
    #[must_use]
    pub fn response(session_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EnvelopeKind::Response,
            payload,
            error: None,
        }
    }

    /// Build a failed response carrying degraded content.
    #[must_use]
    pub fn failure(
        session_id: impl Into<String>,
        payload: Payload,
        error: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EnvelopeKind::Response,
            payload,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let envelope = Envelope::request(
            "s1",
            Payload::CommunityProbe {
                location: "Faro".to_string(),
            },
        );
        assert_eq!(envelope.kind, EnvelopeKind::Request);
        assert!(envelope.error.is_none());

        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, "s1");
        assert!(matches!(back.payload, Payload::CommunityProbe { .. }));
    }

    #[test]
    fn test_failure_carries_error() {
        let envelope = Envelope::failure(
            "s1",
            Payload::CommunityReply { report: None },
            "provider down",
        );
        assert_eq!(envelope.kind, EnvelopeKind::Response);
        assert_eq!(envelope.error.as_deref(), Some("provider down"));
    }
}
