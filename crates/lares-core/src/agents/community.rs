//! Community agent
//!
//! Produces one neighborhood report for the top-ranked candidate's
//! area: news, safety, and school searches scoped to the city feed a
//! fixed-schema completion. Scores are clamped into [0, 10]. Any
//! failure yields no report; the coordinator then omits the field.

use crate::envelope::{Envelope, Payload};
use crate::types::{CommunityReport, Story};
use lares_llm::{ChatGateway, CompletionRequest};
use lares_search::SearchProvider;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Snippets collected per search category
const SNIPPETS_PER_CATEGORY: usize = 6;

/// The JSON shape the model must answer with.
#[derive(Debug, Deserialize)]
struct ModelReport {
    #[serde(default)]
    location: Option<String>,
    overall_score: f64,
    #[serde(default)]
    overall_explanation: String,
    safety_score: f64,
    #[serde(default)]
    safety_explanation: String,
    school_rating: f64,
    #[serde(default)]
    school_explanation: String,
    #[serde(default)]
    positive_stories: Vec<Story>,
    #[serde(default)]
    negative_stories: Vec<Story>,
    #[serde(default)]
    housing_price_per_sqm: Option<i64>,
    #[serde(default)]
    average_size_sqm: Option<i64>,
}

/// The community agent.
pub struct CommunityAgent {
    gateway: Arc<dyn ChatGateway>,
    search: Option<Arc<dyn SearchProvider>>,
}

impl CommunityAgent {
    /// Create the agent.
    #[must_use]
    pub fn new(gateway: Arc<dyn ChatGateway>, search: Option<Arc<dyn SearchProvider>>) -> Self {
        Self { gateway, search }
    }

    /// Handle one envelope. Accepts `CommunityProbe`, answers
    /// `CommunityReply`.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::CommunityProbe { location } = envelope.payload else {
            return Envelope::failure(
                session_id,
                Payload::CommunityReply { report: None },
                "community agent received a non-community payload",
            );
        };

        let report = self.analyze(&location).await;
        match report {
            Some(report) => Envelope::response(session_id, Payload::CommunityReply {
                report: Some(report),
            }),
            None => Envelope::failure(
                session_id,
                Payload::CommunityReply { report: None },
                "community analysis failed",
            ),
        }
    }

    async fn analyze(&self, location: &str) -> Option<CommunityReport> {
        let news = self
            .collect_snippets(&format!("{location} local news community safety crime"))
            .await;
        let schools = self
            .collect_snippets(&format!("{location} schools ratings education quality"))
            .await;
        let housing = self
            .collect_snippets(&format!(
                "{location} housing prices per square meter average home size"
            ))
            .await;

        let request = CompletionRequest::new(
            "You are a community analyst scoring a neighborhood from news and article \
             snippets.\n\
             Respond with ONLY this JSON object:\n\
             {\"location\": string,\n\
              \"overall_score\": number, \"overall_explanation\": string,\n\
              \"safety_score\": number, \"safety_explanation\": string,\n\
              \"school_rating\": number, \"school_explanation\": string,\n\
              \"positive_stories\": [{\"title\": string, \"summary\": string}],\n\
              \"negative_stories\": [{\"title\": string, \"summary\": string}],\n\
              \"housing_price_per_sqm\": integer or null,\n\
              \"average_size_sqm\": integer or null}\n\
             Rules:\n\
             - All scores are 0-10 with one decimal. The overall score is the average of \
               safety and schools.\n\
             - Pick at most 2 positive and 2 negative stories, most relevant first.\n\
             - Use null for housing figures the snippets do not support.",
            format!(
                "Analyze this area: {location}\n\n\
                 Community and safety articles:\n{news}\n\
                 Education articles:\n{schools}\n\
                 Housing articles:\n{housing}"
            ),
        )
        .expect_json()
        .with_max_tokens(1_200);

        let raw = match self.gateway.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(location, error = %e, "community completion failed");
                return None;
            }
        };

        let model: ModelReport = match serde_json::from_str(&raw) {
            Ok(model) => model,
            Err(e) => {
                warn!(location, error = %e, "community reply schema mismatch");
                return None;
            }
        };

        let mut report = CommunityReport {
            location: model
                .location
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| location.to_string()),
            overall_score: model.overall_score,
            overall_explanation: model.overall_explanation,
            safety_score: model.safety_score,
            safety_explanation: model.safety_explanation,
            school_rating: model.school_rating,
            school_explanation: model.school_explanation,
            positive_stories: model.positive_stories,
            negative_stories: model.negative_stories,
            housing_price_per_sqm: model.housing_price_per_sqm,
            average_size_sqm: model.average_size_sqm,
        };
        if report.clamp_scores() {
            warn!(location, "community scores out of range, clamped");
        }
        debug!(location, overall = report.overall_score, "community report ready");
        Some(report)
    }

    /// One search, formatted as numbered snippets. Failures degrade to
    /// an empty section.
    async fn collect_snippets(&self, query: &str) -> String {
        let Some(search) = &self.search else {
            return "(no articles available)".to_string();
        };

        match search.search(query, "google").await {
            Ok(hits) => {
                if hits.is_empty() {
                    return "(no articles available)".to_string();
                }
                hits.iter()
                    .take(SNIPPETS_PER_CATEGORY)
                    .enumerate()
                    .map(|(index, hit)| format!("{}. {} — {}", index + 1, hit.title, hit.snippet))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Err(e) => {
                warn!(query, error = %e, "community search failed");
                "(no articles available)".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lares_llm::MockGateway;

    fn probe() -> Envelope {
        Envelope::request(
            "s1",
            Payload::CommunityProbe {
                location: "Faro".to_string(),
            },
        )
    }

    fn report_of(envelope: Envelope) -> Option<CommunityReport> {
        match envelope.payload {
            Payload::CommunityReply { report } => report,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_report_parsed_and_scores_clamped() {
        let mock = Arc::new(MockGateway::new());
        mock.push_text(
            r#"{"location": "Faro", "overall_score": 11.0, "overall_explanation": "calm",
                "safety_score": 8.0, "safety_explanation": "low crime",
                "school_rating": 7.5, "school_explanation": "good schools",
                "positive_stories": [{"title": "New park", "summary": "opened downtown"}],
                "negative_stories": [],
                "housing_price_per_sqm": 2400, "average_size_sqm": 95}"#,
        );
        let agent = CommunityAgent::new(mock, None);

        let report = report_of(agent.handle(probe()).await).unwrap();
        assert!((report.overall_score - 10.0).abs() < f64::EPSILON);
        assert_eq!(report.positive_stories.len(), 1);
        assert_eq!(report.housing_price_per_sqm, Some(2400));
    }

    #[tokio::test]
    async fn test_llm_failure_yields_no_report() {
        let mock = Arc::new(MockGateway::new());
        mock.push_failure(|| lares_llm::Error::Server("down".to_string()));
        let agent = CommunityAgent::new(mock, None);

        let envelope = agent.handle(probe()).await;
        assert!(envelope.error.is_some());
        assert!(report_of(envelope).is_none());
    }

    #[tokio::test]
    async fn test_schema_mismatch_yields_no_report() {
        let mock = Arc::new(MockGateway::new());
        mock.push_text(r#"{"something": "else"}"#);
        let agent = CommunityAgent::new(mock, None);
        assert!(report_of(agent.handle(probe()).await).is_none());
    }
}
