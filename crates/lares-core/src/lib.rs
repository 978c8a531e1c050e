//! Lares Core - domain model, agents, and coordinator
//!
//! The orchestration heart of the assistant:
//! - Types: requirements, candidates, enrichment, reports
//! - Session: sharded LRU store for conversational memory
//! - Envelope: the typed message seam between coordinator and agents
//! - Agents: scoping, research, mapping, local discovery, community,
//!   negotiation
//! - Coordinator: pipelines, deadlines, partial-failure policy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agents;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod session;
pub mod types;

pub use coordinator::{
    ChatOutcome, Coordinator, CoordinatorConfig, Providers, SearchResults, StageBudgets,
    TopResultCoordinates,
};
pub use envelope::{Envelope, EnvelopeKind, Payload};
pub use error::{Error, Result};
pub use session::{Role, Session, SessionStore, Turn, DEFAULT_SESSION_CAPACITY};
pub use types::{
    Candidate, CommunityReport, Coordinates, EnrichedCandidate, GeoCandidate, NegotiationRecord,
    NegotiationRequest, PartialRequirements, Price, Requirements, Story,
};
