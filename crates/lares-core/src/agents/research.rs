//! Research agent
//!
//! Turns validated requirements into ranked property candidates:
//! one deterministic search query, an allow-list pass over the hits,
//! bounded per-hit scrape + LLM extraction, the location and
//! budget/rooms filters, and a stable rank. A fatal search failure
//! yields an empty set plus an error string; a thin result set gets
//! one broadened re-filter without the rooms constraint.

use crate::envelope::{Envelope, Payload};
use crate::types::{Candidate, Coordinates, Price, Requirements};
use futures::StreamExt;
use lares_geo::{contains_folded, find_location};
use lares_llm::{ChatGateway, CompletionRequest};
use lares_search::{SearchHit, SearchProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Half-width of the location bounding box, in degrees
const BBOX_HALF_WIDTH_DEG: f64 = 0.5;

/// Markdown passed to the extractor is capped at this many chars
const EXTRACT_MARKDOWN_CAP: usize = 6_000;

/// Research agent configuration.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Real-estate domains worth scraping, in priority order
    pub allowed_domains: Vec<String>,
    /// Hits considered per search
    pub max_hits: usize,
    /// Concurrent scrape+extract tasks
    pub extract_concurrency: usize,
    /// Candidates returned at most
    pub max_results: usize,
    /// Below this many survivors, re-filter without the rooms rule
    pub min_survivors: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "idealista".to_string(),
                "imovirtual".to_string(),
                "casa-sapo".to_string(),
                "olx".to_string(),
                "zillow".to_string(),
                "redfin".to_string(),
            ],
            max_hits: 20,
            extract_concurrency: 5,
            max_results: 10,
            min_survivors: 3,
        }
    }
}

/// Research agent result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    /// Ranked candidates, best first
    pub candidates: Vec<Candidate>,
    /// One-sentence human summary of the set
    pub summary: String,
}

/// The JSON shape the extractor must answer with.
#[derive(Debug, Default, Deserialize)]
struct ExtractedListing {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    is_rent: Option<bool>,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    bathrooms: Option<f32>,
    #[serde(default)]
    area_m2: Option<f64>,
    #[serde(default)]
    property_type: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

/// The research agent.
pub struct ResearchAgent {
    gateway: Arc<dyn ChatGateway>,
    search: Option<Arc<dyn SearchProvider>>,
    config: ResearchConfig,
}

impl ResearchAgent {
    /// Create the agent. `search = None` means the provider key is
    /// missing; every run then degrades to an explanatory empty set.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        search: Option<Arc<dyn SearchProvider>>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            gateway,
            search,
            config,
        }
    }

    /// Handle one envelope. Accepts `ResearchRun`, answers
    /// `ResearchReply`.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id))]
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let session_id = envelope.session_id.clone();
        let Payload::ResearchRun { requirements } = envelope.payload else {
            return Envelope::failure(
                session_id,
                Payload::ResearchReply(ResearchOutcome {
                    candidates: vec![],
                    summary: String::new(),
                }),
                "research agent received a non-research payload",
            );
        };

        let Some(search) = self.search.clone() else {
            return Envelope::failure(
                session_id,
                Payload::ResearchReply(ResearchOutcome {
                    candidates: vec![],
                    summary: "Property search is not configured: SEARCH_PROVIDER_API_KEY is \
                              missing. Set it to enable real listings."
                        .to_string(),
                }),
                "SEARCH_PROVIDER_API_KEY not set",
            );
        };

        let query = build_query(&requirements);
        debug!(query, "running property search");

        let hits = match search.search(&query, "google").await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "property search failed");
                return Envelope::failure(
                    session_id,
                    Payload::ResearchReply(ResearchOutcome {
                        candidates: vec![],
                        summary: format!(
                            "We couldn't search listings in {} right now. Please try again in \
                             a moment.",
                            requirements.location
                        ),
                    }),
                    format!("search failed: {e}"),
                );
            }
        };

        let relevant: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| self.domain_priority(&hit.url).is_some())
            .take(self.config.max_hits)
            .collect();

        if relevant.is_empty() {
            return Envelope::response(
                session_id,
                Payload::ResearchReply(ResearchOutcome {
                    candidates: vec![],
                    summary: format!(
                        "We couldn't find any listings matching your criteria in {}. Try \
                         adjusting your budget or searching a nearby area.",
                        requirements.location
                    ),
                }),
            );
        }

        let extracted = self.extract_batch(&search, relevant).await;
        let candidates = self.filter_and_rank(extracted, &requirements);

        if candidates.is_empty() {
            return Envelope::response(
                session_id,
                Payload::ResearchReply(ResearchOutcome {
                    candidates: vec![],
                    summary: format!(
                        "The search returned listings, but none matched your criteria in {}. \
                         Try loosening the budget or the number of bedrooms.",
                        requirements.location
                    ),
                }),
            );
        }

        let summary = self.summarize(&candidates, &requirements).await;
        Envelope::response(
            session_id,
            Payload::ResearchReply(ResearchOutcome {
                candidates,
                summary,
            }),
        )
    }

    /// Allow-list position; lower index is higher priority.
    fn domain_priority(&self, url: &str) -> Option<usize> {
        let url = url.to_ascii_lowercase();
        self.config
            .allowed_domains
            .iter()
            .position(|domain| url.contains(domain.as_str()))
    }

    /// Scrape + extract every hit, bounded concurrency, input order
    /// preserved. Failed hits drop out silently.
    async fn extract_batch(
        &self,
        search: &Arc<dyn SearchProvider>,
        hits: Vec<SearchHit>,
    ) -> Vec<Candidate> {
        let results: Vec<Option<Candidate>> = futures::stream::iter(hits)
            .map(|hit| {
                let search = Arc::clone(search);
                let gateway = Arc::clone(&self.gateway);
                async move { extract_one(&*search, &*gateway, hit).await }
            })
            .buffered(self.config.extract_concurrency.max(1))
            .collect()
            .await;

        let mut seen = HashSet::new();
        results
            .into_iter()
            .flatten()
            .filter(|candidate| seen.insert(candidate.url.clone()))
            .collect()
    }

    /// Apply the location and budget/rooms filters and the stable
    /// rank. Re-filters without the rooms rule when the set is thin.
    fn filter_and_rank(
        &self,
        extracted: Vec<Candidate>,
        requirements: &Requirements,
    ) -> Vec<Candidate> {
        let survivors = apply_filters(&extracted, requirements, true);
        let survivors = if survivors.len() < self.config.min_survivors
            && requirements.bedrooms.is_some()
        {
            debug!(
                survivors = survivors.len(),
                "thin result set, broadening without the rooms filter"
            );
            apply_filters(&extracted, requirements, false)
        } else {
            survivors
        };

        let mut ranked = survivors;
        ranked.sort_by_key(|candidate| {
            std::cmp::Reverse((
                candidate.coordinates.is_some(),
                candidate.image_url.is_some(),
                candidate.price.is_some(),
                self.source_rank(&candidate.url),
            ))
        });
        ranked.truncate(self.config.max_results);
        ranked
    }

    /// Higher is better; allow-list order decides.
    fn source_rank(&self, url: &str) -> usize {
        match self.domain_priority(url) {
            Some(index) => self.config.allowed_domains.len() - index,
            None => 0,
        }
    }

    /// One-sentence summary of the final set, in the user's language.
    async fn summarize(&self, candidates: &[Candidate], requirements: &Requirements) -> String {
        let fallback = format!(
            "Here are {} listings in {} matching your criteria.",
            candidates.len(),
            requirements.location
        );

        let mut listing_lines = String::new();
        for (index, candidate) in candidates.iter().take(5).enumerate() {
            let price = candidate
                .price
                .as_ref()
                .map(|p| format!("{} {}", p.amount, p.currency))
                .unwrap_or_else(|| "price unlisted".to_string());
            listing_lines.push_str(&format!(
                "{}. {} — {} ({price})\n",
                index + 1,
                candidate.title,
                candidate.address
            ));
        }

        let request = CompletionRequest::new(
            "You are a friendly real estate assistant. Summarize the available properties in \
             ONE warm sentence, naming one or two concrete listings. Answer in the language of \
             the location. Do not mention how many listings there are.",
            format!(
                "The user searched in: {}\nListings:\n{listing_lines}",
                requirements.location
            ),
        )
        .with_max_tokens(120)
        .with_temperature(0.6);

        match self.gateway.complete(request).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                warn!(error = %e, "summary completion failed, using fallback");
                fallback
            }
        }
    }
}

/// Build the single deterministic search query. Phrasing follows the
/// location's language: Portuguese for PT locations, English otherwise.
#[must_use]
pub fn build_query(requirements: &Requirements) -> String {
    let portuguese = find_location(&requirements.location)
        .map(|entry| entry.country == "PT")
        .unwrap_or(false);

    if portuguese {
        let mut parts = Vec::new();
        match requirements.bedrooms {
            Some(n) => parts.push(format!("T{n}")),
            None => parts.push("apartamento".to_string()),
        }
        parts.push(if requirements.is_rent {
            "para arrendar".to_string()
        } else {
            "à venda".to_string()
        });
        parts.push(format!("em {}", requirements.location));
        if let Some(budget) = requirements.budget_max {
            parts.push(format!("até {budget}€"));
        }
        parts.join(" ")
    } else {
        let mut parts = vec![requirements.location.clone()];
        if let Some(n) = requirements.bedrooms {
            parts.push(format!("{n} bedroom"));
        }
        parts.push(if requirements.is_rent {
            "homes for rent".to_string()
        } else {
            "homes for sale".to_string()
        });
        if let Some(budget) = requirements.budget_max {
            parts.push(format!("under ${budget}"));
        }
        parts.join(" ")
    }
}

/// Scrape one hit and extract a candidate from its markdown. Any
/// failure drops the hit.
async fn extract_one(
    search: &dyn SearchProvider,
    gateway: &dyn ChatGateway,
    hit: SearchHit,
) -> Option<Candidate> {
    let markdown = match search.scrape_markdown(&hit.url).await {
        Ok(markdown) => markdown,
        Err(e) => {
            debug!(url = %hit.url, error = %e, "scrape failed, dropping hit");
            return None;
        }
    };

    let clipped: String = markdown.chars().take(EXTRACT_MARKDOWN_CAP).collect();
    let request = CompletionRequest::new(
        "You extract real-estate listing data from page markdown.\n\
         Respond with ONLY this JSON object (null for anything the page does not state):\n\
         {\"title\": string, \"address\": string, \"city\": string or null,\n\
          \"description\": string or null, \"price\": integer or null,\n\
          \"currency\": string or null, \"is_rent\": boolean or null,\n\
          \"bedrooms\": integer or null, \"bathrooms\": number or null,\n\
          \"area_m2\": number or null, \"property_type\": string or null,\n\
          \"image_url\": string or null, \"latitude\": number or null,\n\
          \"longitude\": number or null}",
        format!("Listing page ({}):\n\n{clipped}", hit.url),
    )
    .expect_json()
    .with_max_tokens(700);

    let raw = match gateway.complete(request).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!(url = %hit.url, error = %e, "extraction completion failed, dropping hit");
            return None;
        }
    };

    let fields: ExtractedListing = match serde_json::from_str(&raw) {
        Ok(fields) => fields,
        Err(e) => {
            debug!(url = %hit.url, error = %e, "extraction schema mismatch, dropping hit");
            return None;
        }
    };

    let address = fields.address.as_deref().unwrap_or("").trim().to_string();
    let title = fields
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&hit.title)
        .trim()
        .to_string();
    if address.is_empty() && title.is_empty() {
        debug!(url = %hit.url, "extraction missing required fields, dropping hit");
        return None;
    }

    let coordinates = match (fields.latitude, fields.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates {
            latitude,
            longitude,
        }),
        _ => None,
    };

    Some(Candidate {
        title,
        address,
        city: fields.city,
        description: fields.description.unwrap_or_default(),
        url: hit.url,
        image_url: fields.image_url,
        price: fields.price.map(|amount| Price {
            amount,
            currency: fields.currency.unwrap_or_else(|| "EUR".to_string()),
            is_rent: fields.is_rent.unwrap_or(false),
        }),
        bedrooms: fields.bedrooms,
        bathrooms: fields.bathrooms,
        area_m2: fields.area_m2,
        property_type: fields.property_type,
        coordinates,
        snippet: hit.snippet,
    })
}

/// The location, budget, and (optionally) rooms filters.
fn apply_filters(
    candidates: &[Candidate],
    requirements: &Requirements,
    rooms_filter: bool,
) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|candidate| passes_location(candidate, &requirements.location))
        .filter(|candidate| passes_budget(candidate, requirements.budget_max))
        .filter(|candidate| !rooms_filter || passes_rooms(candidate, requirements.bedrooms))
        .cloned()
        .collect()
}

/// A candidate stays when its text mentions the location or its
/// coordinates fall inside the bounding box around the known center.
fn passes_location(candidate: &Candidate, location: &str) -> bool {
    let text_match = contains_folded(&candidate.address, location)
        || contains_folded(&candidate.title, location)
        || candidate
            .city
            .as_deref()
            .map(|city| contains_folded(city, location))
            .unwrap_or(false);

    let bbox_match = match (candidate.coordinates, find_location(location)) {
        (Some(coords), Some(entry)) => {
            (coords.latitude - entry.center_lat).abs() <= BBOX_HALF_WIDTH_DEG
                && (coords.longitude - entry.center_lon).abs() <= BBOX_HALF_WIDTH_DEG
        }
        _ => false,
    };

    // The two signals can disagree on real data; record it so the
    // filter can be tightened later.
    if candidate.coordinates.is_some()
        && find_location(location).is_some()
        && text_match != bbox_match
    {
        debug!(
            url = %candidate.url,
            text_match,
            bbox_match,
            "location signals disagree"
        );
    }

    text_match || bbox_match
}

/// Listings priced above the cap drop; unpriced listings stay.
fn passes_budget(candidate: &Candidate, budget_max: Option<i64>) -> bool {
    match (budget_max, &candidate.price) {
        (Some(cap), Some(price)) => price.amount <= cap,
        _ => true,
    }
}

/// T-notation listings must match the requested count exactly;
/// otherwise at least as many bedrooms as requested. Listings with an
/// unknown count stay.
fn passes_rooms(candidate: &Candidate, wanted: Option<u32>) -> bool {
    let (Some(wanted), Some(actual)) = (wanted, candidate.bedrooms) else {
        return true;
    };
    if is_t_notation(candidate.property_type.as_deref()) {
        actual == wanted
    } else {
        actual >= wanted
    }
}

fn is_t_notation(property_type: Option<&str>) -> bool {
    property_type
        .map(|t| {
            let t = t.trim();
            (t.starts_with('T') || t.starts_with('t'))
                && t[1..].chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements_pt() -> Requirements {
        Requirements {
            location: "Faro".to_string(),
            bedrooms: Some(2),
            bathrooms: None,
            budget_min: None,
            budget_max: Some(900),
            is_rent: true,
            additional_info: None,
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

    #[test]
    fn test_query_portuguese_rental() {
        let query = build_query(&requirements_pt());
        assert_eq!(query, "T2 para arrendar em Faro até 900€");
    }

    #[test]
    fn test_query_portuguese_sale_without_rooms() {
        let mut requirements = requirements_pt();
        requirements.bedrooms = None;
        requirements.is_rent = false;
        let query = build_query(&requirements);
        assert_eq!(query, "apartamento à venda em Faro até 900€");
    }

    #[test]
    fn test_query_english() {
        let requirements = Requirements {
            location: "San Francisco".to_string(),
            bedrooms: Some(2),
            bathrooms: None,
            budget_min: None,
            budget_max: Some(1_500_000),
            is_rent: false,
            additional_info: None,
        };
        let query = build_query(&requirements);
        assert_eq!(query, "San Francisco 2 bedroom homes for sale under $1500000");
    }

    #[test]
    fn test_location_filter_by_text_with_diacritics() {
        let listing = candidate("https://www.idealista.pt/1", "Rua Central, Olhão");
        assert!(passes_location(&listing, "olhao"));
        assert!(!passes_location(&listing, "Tavira"));
    }

    #[test]
    fn test_location_filter_by_bbox() {
        let mut listing = candidate("https://www.idealista.pt/1", "Urbanização Nova");
        listing.coordinates = Some(Coordinates {
            latitude: 37.02,
            longitude: -7.93,
        });
        // No text mention of Faro, but coordinates sit on its center.
        assert!(passes_location(&listing, "Faro"));

        listing.coordinates = Some(Coordinates {
            latitude: 38.7,
            longitude: -9.1,
        });
        assert!(!passes_location(&listing, "Faro"));
    }

    #[test]
    fn test_budget_filter() {
        let mut listing = candidate("https://www.idealista.pt/1", "Faro");
        assert!(passes_budget(&listing, Some(900)));
        listing.price = Some(Price {
            amount: 950,
            currency: "EUR".to_string(),
            is_rent: true,
        });
        assert!(!passes_budget(&listing, Some(900)));
        assert!(passes_budget(&listing, None));
    }

    #[test]
    fn test_rooms_filter_t_notation_exact() {
        let mut listing = candidate("https://www.idealista.pt/1", "Faro");
        listing.bedrooms = Some(3);
        listing.property_type = Some("T3".to_string());
        assert!(!passes_rooms(&listing, Some(2)));
        listing.bedrooms = Some(2);
        listing.property_type = Some("T2".to_string());
        assert!(passes_rooms(&listing, Some(2)));
    }

    #[test]
    fn test_rooms_filter_non_t_at_least() {
        let mut listing = candidate("https://www.zillow.com/1", "San Francisco");
        listing.bedrooms = Some(3);
        listing.property_type = Some("house".to_string());
        assert!(passes_rooms(&listing, Some(2)));
        listing.bedrooms = Some(1);
        assert!(!passes_rooms(&listing, Some(2)));
        listing.bedrooms = None;
        assert!(passes_rooms(&listing, Some(2)));
    }

    #[test]
    fn test_is_t_notation() {
        assert!(is_t_notation(Some("T2")));
        assert!(is_t_notation(Some("t3 duplex")));
        assert!(!is_t_notation(Some("Townhouse")));
        assert!(!is_t_notation(None));
    }

    #[test]
    fn test_rank_prefers_richer_candidates() {
        let agent = ResearchAgent::new(
            Arc::new(lares_llm::MockGateway::new()),
            None,
            ResearchConfig::default(),
        );

        let mut bare = candidate("https://www.olx.pt/1", "Faro");
        bare.price = None;
        let mut priced = candidate("https://www.olx.pt/2", "Faro");
        priced.price = Some(Price {
            amount: 700,
            currency: "EUR".to_string(),
            is_rent: true,
        });
        let mut with_image = candidate("https://www.olx.pt/3", "Faro");
        with_image.image_url = Some("https://img".to_string());
        let mut with_coords = candidate("https://www.olx.pt/4", "Faro");
        with_coords.coordinates = Some(Coordinates {
            latitude: 37.02,
            longitude: -7.93,
        });

        let requirements = Requirements {
            bedrooms: None,
            ..requirements_pt()
        };
        let ranked = agent.filter_and_rank(
            vec![bare, priced, with_image, with_coords],
            &requirements,
        );
        assert_eq!(ranked[0].url, "https://www.olx.pt/4");
        assert_eq!(ranked[1].url, "https://www.olx.pt/3");
        assert_eq!(ranked[2].url, "https://www.olx.pt/2");
        assert_eq!(ranked[3].url, "https://www.olx.pt/1");
    }

    #[test]
    fn test_rank_is_stable_within_equal_keys() {
        let agent = ResearchAgent::new(
            Arc::new(lares_llm::MockGateway::new()),
            None,
            ResearchConfig::default(),
        );
        let requirements = Requirements {
            bedrooms: None,
            ..requirements_pt()
        };
        let first = candidate("https://www.olx.pt/a", "Faro");
        let second = candidate("https://www.olx.pt/b", "Faro");
        let ranked = agent.filter_and_rank(vec![first, second], &requirements);
        assert_eq!(ranked[0].url, "https://www.olx.pt/a");
        assert_eq!(ranked[1].url, "https://www.olx.pt/b");
    }

    #[test]
    fn test_broadened_refilter_drops_rooms_rule() {
        let agent = ResearchAgent::new(
            Arc::new(lares_llm::MockGateway::new()),
            None,
            ResearchConfig::default(),
        );
        // Three listings in Faro, all T3: the T2 request filters every
        // one out, so the broadened pass must bring them back.
        let listings: Vec<Candidate> = (0..3)
            .map(|i| {
                let mut listing =
                    candidate(&format!("https://www.idealista.pt/{i}"), "Faro");
                listing.bedrooms = Some(3);
                listing.property_type = Some("T3".to_string());
                listing
            })
            .collect();

        let ranked = agent.filter_and_rank(listings, &requirements_pt());
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_domain_priority() {
        let agent = ResearchAgent::new(
            Arc::new(lares_llm::MockGateway::new()),
            None,
            ResearchConfig::default(),
        );
        assert_eq!(agent.domain_priority("https://www.idealista.pt/x"), Some(0));
        assert_eq!(agent.domain_priority("https://www.REDFIN.com/x"), Some(5));
        assert_eq!(agent.domain_priority("https://example.com/x"), None);
    }
}
