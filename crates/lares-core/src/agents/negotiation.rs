//! Negotiation agent
//!
//! Synchronous end-to-end voice negotiation: a compressed research
//! pass over the property address produces leverage findings, those
//! findings become the call agent's brief, and an outbound call runs
//! to a terminal state under one overall deadline. A failed research
//! pass degrades to an empty findings list; a rejected call creation
//! fails the whole operation.

use crate::envelope::{Envelope, Payload};
use crate::types::{NegotiationRecord, NegotiationRequest};
use lares_llm::{ChatGateway, CompletionRequest};
use lares_search::SearchProvider;
use lares_voice::{CallState, VoiceCallProvider};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Sources scraped during the probe
const PROBE_SOURCE_LIMIT: usize = 3;

/// Scraped content passed to the analyst, per source
const PROBE_CONTENT_CAP: usize = 2_000;

/// Extra polls allowed for the transcript after the call ends
const SUMMARY_GRACE_POLLS: u32 = 5;

/// Negotiation agent configuration.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Status poll cadence
    pub poll_interval: Duration,
    /// Overall deadline for one call
    pub call_deadline: Duration,
    /// Callee phone number
    pub target_phone: Option<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            call_deadline: Duration::from_secs(600),
            target_phone: None,
        }
    }
}

impl NegotiationConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            target_phone: std::env::var("TELEPHONY_TARGET_PHONE").ok(),
            ..Self::default()
        }
    }
}

/// The probe analyst's JSON shape.
#[derive(Debug, Deserialize)]
struct ProbeAnalysis {
    #[serde(default)]
    findings: Vec<ProbeFinding>,
    #[serde(default)]
    overall_assessment: String,
    #[serde(default)]
    leverage_score: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeFinding {
    #[serde(default)]
    category: String,
    #[serde(default)]
    summary: String,
}

/// The negotiation agent.
pub struct NegotiationAgent {
    gateway: Arc<dyn ChatGateway>,
    search: Option<Arc<dyn SearchProvider>>,
    voice: Option<Arc<dyn VoiceCallProvider>>,
    config: NegotiationConfig,
}

impl NegotiationAgent {
    /// Create the agent.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        search: Option<Arc<dyn SearchProvider>>,
        voice: Option<Arc<dyn VoiceCallProvider>>,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            gateway,
            search,
            voice,
            config,
        }
    }

    /// Handle one envelope. Accepts `NegotiateCall`, answers
    /// `NegotiateReply`; blocks until the call terminates.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::NegotiateCall(request) = envelope.payload else {
            return Envelope::failure(
                session_id,
                Payload::NegotiateReply(Box::new(empty_record(
                    &NegotiationRequest {
                        address: String::new(),
                        name: String::new(),
                        email: String::new(),
                        additional_info: String::new(),
                    },
                    "negotiation agent received a non-negotiation payload",
                ))),
                "negotiation agent received a non-negotiation payload",
            );
        };

        // Step 1: probe. A failure here degrades to no findings.
        let (findings, leverage_score, assessment) = self.probe(&request.address).await;
        info!(
            address = %request.address,
            findings = findings.len(),
            leverage_score,
            "probe complete"
        );

        // Step 2: the brief.
        let brief = build_brief(&request, &findings, leverage_score, &assessment);
        let first_message = build_first_message(&request);

        // Step 3-5: place the call and wait it out.
        let Some(voice) = self.voice.clone() else {
            return Envelope::failure(
                session_id,
                Payload::NegotiateReply(Box::new(NegotiationRecord {
                    findings,
                    leverage_score,
                    ..empty_record(&request, "telephony is not configured")
                })),
                "TELEPHONY_API_KEY / TELEPHONY_ASSISTANT_ID not set",
            );
        };
        let Some(target_phone) = self.config.target_phone.clone() else {
            return Envelope::failure(
                session_id,
                Payload::NegotiateReply(Box::new(NegotiationRecord {
                    findings,
                    leverage_score,
                    ..empty_record(&request, "no callee phone number is configured")
                })),
                "TELEPHONY_TARGET_PHONE not set",
            );
        };

        if let Err(e) = voice.update_assistant(&brief, &first_message).await {
            warn!(error = %e, "assistant update failed");
            return Envelope::failure(
                session_id,
                Payload::NegotiateReply(Box::new(NegotiationRecord {
                    findings,
                    leverage_score,
                    brief,
                    ..empty_record(&request, "could not brief the call assistant")
                })),
                format!("assistant update failed: {e}"),
            );
        }

        let call_id = match voice.create_call(&target_phone).await {
            Ok(call_id) => call_id,
            Err(e) => {
                warn!(error = %e, "call creation rejected");
                return Envelope::failure(
                    session_id,
                    Payload::NegotiateReply(Box::new(NegotiationRecord {
                        findings,
                        leverage_score,
                        brief,
                        ..empty_record(&request, "the call could not be placed")
                    })),
                    format!("call creation failed: {e}"),
                );
            }
        };
        info!(call_id = %call_id, "negotiation call placed");

        let (success, call_summary) = self.wait_for_call(&*voice, &call_id).await;

        Envelope::response(
            session_id,
            Payload::NegotiateReply(Box::new(NegotiationRecord {
                address: request.address,
                caller_name: request.name,
                caller_email: request.email,
                brief,
                findings,
                leverage_score,
                call_summary,
                success,
            })),
        )
    }

    /// Compressed research pass: search, scrape a few sources, let the
    /// model extract leverage. Every failure path returns empty-handed
    /// rather than failing the negotiation.
    async fn probe(&self, address: &str) -> (Vec<String>, f64, String) {
        let no_findings = (
            Vec::new(),
            0.0,
            "No property intelligence available.".to_string(),
        );

        let Some(search) = &self.search else {
            return no_findings;
        };

        let query = format!("\"{address}\" property listing real estate for sale rent");
        let hits = match search.search(&query, "google").await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "probe search failed");
                return no_findings;
            }
        };

        let mut sources = String::new();
        for hit in hits.iter().take(PROBE_SOURCE_LIMIT) {
            let content = match search.scrape_markdown(&hit.url).await {
                Ok(markdown) => markdown.chars().take(PROBE_CONTENT_CAP).collect::<String>(),
                // The snippet still tells the analyst something.
                Err(_) => hit.snippet.clone(),
            };
            sources.push_str(&format!("--- {} ---\n{}\n\n", hit.url, content));
        }
        if sources.is_empty() {
            return no_findings;
        }

        let request = CompletionRequest::new(
            "You are a real estate negotiation analyst extracting leverage from property \
             data. Categories: time_on_market, price_history, property_issues, \
             owner_situation, market_conditions.\n\
             Respond with ONLY this JSON object, keeping every text field under 100 \
             characters:\n\
             {\"findings\": [{\"category\": string, \"summary\": string,\n\
               \"leverage_score\": number, \"details\": string}],\n\
              \"overall_assessment\": string, \"leverage_score\": number}",
            format!("Property address: {address}\n\nScraped information:\n{sources}"),
        )
        .expect_json()
        .with_max_tokens(900);

        let raw = match self.gateway.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "probe analysis failed");
                return no_findings;
            }
        };
        let analysis: ProbeAnalysis = match serde_json::from_str(&raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "probe analysis schema mismatch");
                return no_findings;
            }
        };

        let findings: Vec<String> = analysis
            .findings
            .iter()
            .filter(|finding| !finding.summary.trim().is_empty())
            .map(|finding| {
                if finding.category.trim().is_empty() {
                    finding.summary.clone()
                } else {
                    format!("{}: {}", finding.category, finding.summary)
                }
            })
            .collect();
        let assessment = if analysis.overall_assessment.trim().is_empty() {
            "No property intelligence available.".to_string()
        } else {
            analysis.overall_assessment
        };

        (findings, analysis.leverage_score.clamp(0.0, 10.0), assessment)
    }

    /// Poll the call to a terminal state under the overall deadline,
    /// then give the transcript a short grace period to appear.
    async fn wait_for_call(&self, voice: &dyn VoiceCallProvider, call_id: &str) -> (bool, String) {
        let deadline = Instant::now() + self.config.call_deadline;
        let mut terminal_state: Option<CallState> = None;
        let mut summary: Option<String> = None;
        let mut grace_left = SUMMARY_GRACE_POLLS;

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if Instant::now() >= deadline {
                warn!(call_id, "call deadline elapsed");
                break;
            }

            match voice.call_status(call_id).await {
                Ok(status) => {
                    debug!(call_id, state = ?status.state, "call status");
                    if status.summary.is_some() {
                        summary = status.summary;
                    }
                    if status.state.is_terminal() {
                        terminal_state = Some(status.state);
                        // The provider writes the analysis shortly
                        // after the call ends.
                        if summary.is_some() || grace_left == 0 {
                            break;
                        }
                        grace_left -= 1;
                    }
                }
                Err(e) => debug!(call_id, error = %e, "status poll failed"),
            }
        }

        let success = terminal_state == Some(CallState::Ended);
        let call_summary = summary.unwrap_or_else(|| match terminal_state {
            Some(CallState::Ended) => format!("Call {call_id} ended; transcript pending."),
            Some(CallState::Failed) => format!("Call {call_id} failed to connect."),
            _ => format!("Call {call_id} did not finish before the deadline."),
        });
        (success, call_summary)
    }
}

/// The system brief handed to the call assistant.
fn build_brief(
    request: &NegotiationRequest,
    findings: &[String],
    leverage_score: f64,
    assessment: &str,
) -> String {
    let reduction = if leverage_score >= 7.0 {
        "5-10%"
    } else if leverage_score >= 5.0 {
        "3-5%"
    } else {
        "1-3%"
    };

    let mut brief = format!(
        "You are negotiating {address} on behalf of {name} ({email}).\n\
         Position: {assessment}\n\
         Leverage score: {leverage_score:.1}/10. Aim for a {reduction} reduction.\n",
        address = request.address,
        name = request.name,
        email = request.email,
    );
    if !findings.is_empty() {
        brief.push_str("Talking points:\n");
        for finding in findings.iter().take(5) {
            brief.push_str(&format!("- {finding}\n"));
        }
    }
    if !request.additional_info.trim().is_empty() {
        brief.push_str(&format!("Caller instructions: {}\n", request.additional_info));
    }
    brief.push_str(
        "Stay polite and professional. Confirm availability, probe price flexibility, and \
         agree on concrete next steps.",
    );
    brief
}

/// The call's opening line.
fn build_first_message(request: &NegotiationRequest) -> String {
    format!(
        "Hello! I'm calling on behalf of {} about the property at {}. Do you have a minute \
         to talk?",
        request.name, request.address
    )
}

/// A failed-path record carrying whatever context exists.
fn empty_record(request: &NegotiationRequest, message: &str) -> NegotiationRecord {
    NegotiationRecord {
        address: request.address.clone(),
        caller_name: request.name.clone(),
        caller_email: request.email.clone(),
        brief: String::new(),
        findings: Vec::new(),
        leverage_score: 0.0,
        call_summary: message.to_string(),
        success: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lares_llm::MockGateway;
    use lares_voice::{CallStatus, Error as VoiceError, Result as VoiceResult};
    use std::sync::Mutex;

    /// Voice stub scripted with a sequence of call states.
    struct StubVoice {
        states: Mutex<Vec<CallState>>,
        summary: Option<String>,
        reject_create: bool,
    }

    #[async_trait::async_trait]
    impl VoiceCallProvider for StubVoice {
        async fn update_assistant(&self, _prompt: &str, _first: &str) -> VoiceResult<()> {
            Ok(())
        }

        async fn create_call(&self, _phone: &str) -> VoiceResult<String> {
            if self.reject_create {
                return Err(VoiceError::CallRejected("http 400: bad number".to_string()));
            }
            Ok("call-1".to_string())
        }

        async fn call_status(&self, _call_id: &str) -> VoiceResult<CallStatus> {
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.remove(0)
            } else {
                states[0]
            };
            Ok(CallStatus {
                state,
                summary: if state.is_terminal() {
                    self.summary.clone()
                } else {
                    None
                },
            })
        }
    }

    fn negotiate_request() -> NegotiationRequest {
        NegotiationRequest {
            address: "Rua de Santo António 12, Faro".to_string(),
            name: "Ana Silva".to_string(),
            email: "ana@example.com".to_string(),
            additional_info: "Needs parking".to_string(),
        }
    }

    fn fast_config() -> NegotiationConfig {
        NegotiationConfig {
            poll_interval: Duration::from_millis(5),
            call_deadline: Duration::from_secs(5),
            target_phone: Some("+351911222333".to_string()),
        }
    }

    fn record_of(envelope: Envelope) -> NegotiationRecord {
        match envelope.payload {
            Payload::NegotiateReply(record) => *record,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_happy_path_call_ends_with_summary() {
        let mock = Arc::new(MockGateway::new());
        let voice = Arc::new(StubVoice {
            states: Mutex::new(vec![
                CallState::Ringing,
                CallState::InProgress,
                CallState::Ended,
            ]),
            summary: Some("Seller accepted viewing.".to_string()),
            reject_create: false,
        });
        let agent = NegotiationAgent::new(mock, None, Some(voice), fast_config());

        let envelope = agent
            .handle(Envelope::request(
                "s1",
                Payload::NegotiateCall(negotiate_request()),
            ))
            .await;
        assert!(envelope.error.is_none());
        let record = record_of(envelope);
        assert!(record.success);
        assert!(record.call_summary.contains("Seller accepted viewing."));
        assert!((0.0..=10.0).contains(&record.leverage_score));
    }

    #[tokio::test]
    async fn test_rejected_call_fails_operation() {
        let mock = Arc::new(MockGateway::new());
        let voice = Arc::new(StubVoice {
            states: Mutex::new(vec![CallState::Queued]),
            summary: None,
            reject_create: true,
        });
        let agent = NegotiationAgent::new(mock, None, Some(voice), fast_config());

        let envelope = agent
            .handle(Envelope::request(
                "s1",
                Payload::NegotiateCall(negotiate_request()),
            ))
            .await;
        assert!(envelope.error.as_deref().unwrap().contains("call creation failed"));
        assert!(!record_of(envelope).success);
    }

    #[tokio::test]
    async fn test_failed_call_is_not_success() {
        let mock = Arc::new(MockGateway::new());
        let voice = Arc::new(StubVoice {
            states: Mutex::new(vec![CallState::Ringing, CallState::Failed]),
            summary: None,
            reject_create: false,
        });
        let agent = NegotiationAgent::new(mock, None, Some(voice), fast_config());

        let record = record_of(
            agent
                .handle(Envelope::request(
                    "s1",
                    Payload::NegotiateCall(negotiate_request()),
                ))
                .await,
        );
        assert!(!record.success);
        assert!(record.call_summary.contains("failed"));
    }

    #[tokio::test]
    async fn test_missing_telephony_is_structured_failure() {
        let mock = Arc::new(MockGateway::new());
        let agent = NegotiationAgent::new(mock, None, None, fast_config());

        let envelope = agent
            .handle(Envelope::request(
                "s1",
                Payload::NegotiateCall(negotiate_request()),
            ))
            .await;
        assert!(envelope.error.as_deref().unwrap().contains("TELEPHONY"));
        assert!(!record_of(envelope).success);
    }

    #[test]
    fn test_brief_embeds_findings_and_instructions() {
        let brief = build_brief(
            &negotiate_request(),
            &["price_history: reduced twice".to_string()],
            7.5,
            "Strong buyer position.",
        );
        assert!(brief.contains("Ana Silva"));
        assert!(brief.contains("price_history: reduced twice"));
        assert!(brief.contains("5-10%"));
        assert!(brief.contains("Needs parking"));
    }
}
