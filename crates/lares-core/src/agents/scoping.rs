//! Scoping agent
//!
//! Multi-turn dialog that converts user utterances into a validated
//! requirement record. Two states per session: Gathering (default) and
//! Complete. Each user turn goes to the LLM with the known partial
//! requirements and the prior transcript; the returned fields merge
//! into the partial record, nulls never erasing earlier answers. The
//! dialog completes only when a location plus bedrooms or a budget cap
//! are known and the model itself says the user is done.

use crate::envelope::{Envelope, Payload};
use crate::error::Error;
use crate::session::{Role, Turn};
use crate::types::{PartialRequirements, Requirements};
use lares_llm::{ChatGateway, CompletionRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Fallback assistant message when the model gives none.
const DEFAULT_PROMPT_MESSAGE: &str = "How can I help you find a home?";

/// Dialog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopingState {
    /// Still collecting requirements
    Gathering,
    /// Requirements validated and ready to search
    Complete,
}

/// Scoping agent reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopingReply {
    /// Assistant message to surface to the user
    pub message_to_user: String,
    /// Resulting dialog state
    pub state: ScopingState,
    /// The merged partial record for the coordinator to store
    pub partial: PartialRequirements,
    /// Validated requirements, present only in Complete
    pub requirements: Option<Requirements>,
}

/// The JSON shape the model must answer with.
#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    bathrooms: Option<f32>,
    #[serde(default)]
    budget_min: Option<i64>,
    #[serde(default)]
    budget_max: Option<i64>,
    #[serde(default)]
    is_rent: Option<bool>,
    #[serde(default)]
    additional_info: Option<String>,
    #[serde(default)]
    is_complete: bool,
    #[allow(dead_code)]
    #[serde(default)]
    needs_more_info: bool,
    #[serde(default)]
    message_to_user: String,
}

impl ModelReply {
    fn as_partial(&self) -> PartialRequirements {
        PartialRequirements {
            location: self.location.clone(),
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            budget_min: self.budget_min,
            budget_max: self.budget_max,
            is_rent: self.is_rent,
            additional_info: self.additional_info.clone(),
        }
    }
}

/// The scoping agent.
pub struct ScopingAgent {
    gateway: Arc<dyn ChatGateway>,
}

impl ScopingAgent {
    /// Create the agent.
    #[must_use]
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self { gateway }
    }

    /// Handle one envelope. Accepts `ScopeTurn`, answers `ScopeReply`.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::ScopeTurn {
            message,
            transcript,
            partial,
        } = envelope.payload
        else {
            return Envelope::failure(
                session_id,
                Payload::ScopeReply(ScopingReply {
                    message_to_user: DEFAULT_PROMPT_MESSAGE.to_string(),
                    state: ScopingState::Gathering,
                    partial: PartialRequirements::default(),
                    requirements: None,
                }),
                "scoping agent received a non-scoping payload",
            );
        };

        let request = CompletionRequest::new(
            build_system_prompt(&partial),
            build_user_prompt(&transcript, &message),
        )
        .expect_json()
        .with_max_tokens(600);

        let raw = match self.gateway.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "scoping completion failed");
                // The partial record stays untouched on gateway failure.
                let message_to_user = Error::from(e).user_message();
                return Envelope::failure(
                    session_id.clone(),
                    Payload::ScopeReply(ScopingReply {
                        message_to_user,
                        state: ScopingState::Gathering,
                        partial,
                        requirements: None,
                    }),
                    "llm completion failed",
                );
            }
        };

        let model_reply: ModelReply = match serde_json::from_str(&raw) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "scoping reply did not match the schema");
                return Envelope::failure(
                    session_id.clone(),
                    Payload::ScopeReply(ScopingReply {
                        message_to_user:
                            "I had trouble understanding that. Could you rephrase your request?"
                                .to_string(),
                        state: ScopingState::Gathering,
                        partial,
                        requirements: None,
                    }),
                    "scoping reply schema mismatch",
                );
            }
        };

        let mut merged = partial;
        merged.merge(&model_reply.as_partial());

        let message_to_user = if model_reply.message_to_user.trim().is_empty() {
            DEFAULT_PROMPT_MESSAGE.to_string()
        } else {
            model_reply.message_to_user.clone()
        };

        if model_reply.is_complete && merged.is_sufficient() {
            match merged.to_requirements() {
                Ok(requirements) => {
                    debug!(location = %requirements.location, "scoping complete");
                    return Envelope::response(
                        session_id,
                        Payload::ScopeReply(ScopingReply {
                            message_to_user,
                            state: ScopingState::Complete,
                            partial: merged,
                            requirements: Some(requirements),
                        }),
                    );
                }
                Err(e) => {
                    // Invariant violation, e.g. budget_min > budget_max.
                    return Envelope::response(
                        session_id,
                        Payload::ScopeReply(ScopingReply {
                            message_to_user: e.user_message(),
                            state: ScopingState::Gathering,
                            partial: merged,
                            requirements: None,
                        }),
                    );
                }
            }
        }

        Envelope::response(
            session_id,
            Payload::ScopeReply(ScopingReply {
                message_to_user,
                state: ScopingState::Gathering,
                partial: merged,
                requirements: None,
            }),
        )
    }
}

/// System prompt: role, the known fields, the output schema, and the
/// language rule. The model answers in the user's language.
fn build_system_prompt(partial: &PartialRequirements) -> String {
    let known = serde_json::to_string(partial).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are a friendly real estate agent helping users find a home in Portugal or the US.\n\
         Gather through natural conversation: the location, number of bedrooms, number of \
         bathrooms, budget range, and whether the user wants to rent or buy.\n\
         \n\
         Already known (do not ask again): {known}\n\
         \n\
         Rules:\n\
         - ALWAYS reply in the user's language (Portuguese or English).\n\
         - Ask one short follow-up question when information is missing.\n\
         - T-notation (T0, T1, T2, T3...) gives the bedroom count: T2 means bedrooms = 2.\n\
         - Treat monthly amounts (e.g. \"900 por mês\", \"até 900€/mês\") as rental intent.\n\
         - Set is_complete to true only when the user has given enough to search and is not \
           asking a further question.\n\
         - Only include a field when the conversation establishes it; use null otherwise.\n\
         \n\
         Respond with ONLY this JSON object:\n\
         {{\n\
           \"location\": string or null,\n\
           \"bedrooms\": number or null,\n\
           \"bathrooms\": number or null,\n\
           \"budget_min\": number or null,\n\
           \"budget_max\": number or null,\n\
           \"is_rent\": boolean or null,\n\
           \"additional_info\": string or null,\n\
           \"is_complete\": boolean,\n\
           \"needs_more_info\": boolean,\n\
           \"message_to_user\": string\n\
         }}"
    )
}

/// User prompt: the prior transcript plus the new message.
fn build_user_prompt(transcript: &[Turn], message: &str) -> String {
    let mut prompt = String::from("Conversation so far:\n");
    for turn in transcript {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Agent",
        };
        prompt.push_str(&format!("{speaker}: {}\n", turn.text));
    }
    prompt.push_str(&format!("User: {message}\n"));
    prompt
}
