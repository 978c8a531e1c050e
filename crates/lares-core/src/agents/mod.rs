//! The specialized agents
//!
//! Each agent has one narrow responsibility and a single
//! envelope-in/envelope-out interface; the coordinator composes them
//! into the chat and negotiation pipelines.

pub mod community;
pub mod local;
pub mod mapping;
pub mod negotiation;
pub mod research;
pub mod scoping;

pub use community::CommunityAgent;
pub use local::{LocalDiscoveryAgent, LocalDiscoveryConfig};
pub use mapping::{MappingAgent, MappingConfig};
pub use negotiation::{NegotiationAgent, NegotiationConfig};
pub use research::{ResearchAgent, ResearchConfig, ResearchOutcome};
pub use scoping::{ScopingAgent, ScopingReply, ScopingState};
