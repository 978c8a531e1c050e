//! Domain types
//!
//! The records that flow through the pipeline: requirements out of the
//! scoping dialog, candidates out of research, geocoded and enriched
//! candidates out of the mapping stages, one community report per
//! result set, and the negotiation record for voice calls.

use crate::error::{Error, Result};
use lares_geo::Poi;
use serde::{Deserialize, Serialize};

/// Validated housing criteria produced by the scoping dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Target location, free text (required)
    pub location: String,
    /// Bedroom count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    /// Bathroom count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<f32>,
    /// Lower budget bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_min: Option<i64>,
    /// Upper budget bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_max: Option<i64>,
    /// Rental intent (sale when false)
    #[serde(default)]
    pub is_rent: bool,
    /// Free-text extras from the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

impl Requirements {
    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(Error::Logic("location must not be empty".to_string()));
        }
        if let (Some(min), Some(max)) = (self.budget_min, self.budget_max) {
            if min > max {
                return Err(Error::Logic(format!(
                    "budget_min ({min}) must not exceed budget_max ({max})"
                )));
            }
        }
        Ok(())
    }
}

/// The partial requirement record built up across scoping turns.
///
/// Merging is monotonic: a later `None` never erases an earlier value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialRequirements {
    /// Target location
    pub location: Option<String>,
    /// Bedroom count
    pub bedrooms: Option<u32>,
    /// Bathroom count
    pub bathrooms: Option<f32>,
    /// Lower budget bound
    pub budget_min: Option<i64>,
    /// Upper budget bound
    pub budget_max: Option<i64>,
    /// Rental intent
    pub is_rent: Option<bool>,
    /// Free-text extras
    pub additional_info: Option<String>,
}

impl PartialRequirements {
    /// Merge an update: non-null fields overwrite, nulls are ignored.
    pub fn merge(&mut self, update: &PartialRequirements) {
        if let Some(location) = &update.location {
            if !location.trim().is_empty() {
                self.location = Some(location.clone());
            }
        }
        if update.bedrooms.is_some() {
            self.bedrooms = update.bedrooms;
        }
        if update.bathrooms.is_some() {
            self.bathrooms = update.bathrooms;
        }
        if update.budget_min.is_some() {
            self.budget_min = update.budget_min;
        }
        if update.budget_max.is_some() {
            self.budget_max = update.budget_max;
        }
        if update.is_rent.is_some() {
            self.is_rent = update.is_rent;
        }
        if let Some(info) = &update.additional_info {
            if !info.trim().is_empty() {
                self.additional_info = Some(info.clone());
            }
        }
    }

    /// Whether the gathered fields are enough to search: a location
    /// plus at least one of bedrooms or budget_max.
    #[must_use]
    pub fn is_sufficient(&self) -> bool {
        self.location
            .as_deref()
            .map(|l| !l.trim().is_empty())
            .unwrap_or(false)
            && (self.bedrooms.is_some() || self.budget_max.is_some())
    }

    /// Promote to validated [`Requirements`] when sufficient.
    pub fn to_requirements(&self) -> Result<Requirements> {
        let location = self
            .location
            .clone()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| Error::Logic("location must not be empty".to_string()))?;
        let requirements = Requirements {
            location,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            budget_min: self.budget_min,
            budget_max: self.budget_max,
            is_rent: self.is_rent.unwrap_or(false),
            additional_info: self.additional_info.clone(),
        };
        requirements.validate()?;
        Ok(requirements)
    }
}

/// A listed price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in whole currency units; monthly when `is_rent`
    pub amount: i64,
    /// Currency code
    pub currency: String,
    /// Monthly rent vs. purchase price
    #[serde(default)]
    pub is_rent: bool,
}

/// A coordinate pair as it appears on scraped listings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
}

/// A scraped property listing, before geocoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    /// Listing title
    pub title: String,
    /// Free-text address
    pub address: String,
    /// City, when the extractor can tell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Listing description
    #[serde(default)]
    pub description: String,
    /// Source URL; unique within a result set
    pub url: String,
    /// Primary image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Listed price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// Bedroom count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    /// Bathroom count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<f32>,
    /// Floor area in square meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_m2: Option<f64>,
    /// Property type, e.g. "T2", "apartment"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    /// Coordinates, when the listing page carried them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Raw markdown snippet the candidate was extracted from
    #[serde(default)]
    pub snippet: String,
}

/// A candidate with a resolved coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoCandidate {
    /// The underlying candidate
    #[serde(flatten)]
    pub candidate: Candidate,
    /// Resolved latitude
    pub latitude: f64,
    /// Resolved longitude
    pub longitude: f64,
    /// Geocoder confidence in [0, 1]
    pub geocode_confidence: f64,
}

/// A geocoded candidate with nearby points of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedCandidate {
    /// The geocoded candidate
    #[serde(flatten)]
    pub geo: GeoCandidate,
    /// POIs ordered by ascending distance
    pub pois: Vec<Poi>,
}

/// One news story referenced by the community report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Story title
    pub title: String,
    /// One-line summary
    pub summary: String,
}

/// Neighborhood score and story digest for the top result's area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityReport {
    /// Analyzed location label
    pub location: String,
    /// Overall score in [0, 10]
    pub overall_score: f64,
    /// Overall explanation
    pub overall_explanation: String,
    /// Safety score in [0, 10]
    pub safety_score: f64,
    /// Safety explanation
    pub safety_explanation: String,
    /// School rating in [0, 10]
    pub school_rating: f64,
    /// School explanation
    pub school_explanation: String,
    /// Positive stories, most relevant first
    pub positive_stories: Vec<Story>,
    /// Negative stories, most relevant first
    pub negative_stories: Vec<Story>,
    /// Average asking price per square meter, when found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub housing_price_per_sqm: Option<i64>,
    /// Average listing size in square meters, when found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_size_sqm: Option<i64>,
}

impl CommunityReport {
    /// Clamp all scores into [0, 10]. Returns true when anything moved.
    pub fn clamp_scores(&mut self) -> bool {
        let mut clamped = false;
        for score in [
            &mut self.overall_score,
            &mut self.safety_score,
            &mut self.school_rating,
        ] {
            let bounded = score.clamp(0.0, 10.0);
            if (bounded - *score).abs() > f64::EPSILON {
                *score = bounded;
                clamped = true;
            }
        }
        clamped
    }
}

/// Input to the negotiation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRequest {
    /// Property address to negotiate on
    pub address: String,
    /// Caller name
    pub name: String,
    /// Caller email
    pub email: String,
    /// Free-text instructions from the user
    #[serde(default)]
    pub additional_info: String,
}

/// Outcome of one negotiation call. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRecord {
    /// Property address
    pub address: String,
    /// Caller name
    pub caller_name: String,
    /// Caller email
    pub caller_email: String,
    /// The brief given to the call agent
    pub brief: String,
    /// Probing findings, most useful first
    pub findings: Vec<String>,
    /// Overall leverage score in [0, 10]
    pub leverage_score: f64,
    /// Provider transcript summary
    pub call_summary: String,
    /// Whether the call reached a normal end
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial_with(location: &str) -> PartialRequirements {
        PartialRequirements {
            location: Some(location.to_string()),
            ..PartialRequirements::default()
        }
    }

    #[test]
    fn test_budget_invariant() {
        let requirements = Requirements {
            location: "Faro".to_string(),
            bedrooms: None,
            bathrooms: None,
            budget_min: Some(1000),
            budget_max: Some(900),
            is_rent: true,
            additional_info: None,
        };
        let err = requirements.validate().unwrap_err();
        assert!(matches!(err, Error::Logic(_)));
        assert!(err.to_string().contains("budget_min"));
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut partial = partial_with("Faro");
        partial.bedrooms = Some(2);

        // A later turn with nulls must not erase earlier values.
        let update = PartialRequirements {
            budget_max: Some(900),
            ..PartialRequirements::default()
        };
        partial.merge(&update);

        assert_eq!(partial.location.as_deref(), Some("Faro"));
        assert_eq!(partial.bedrooms, Some(2));
        assert_eq!(partial.budget_max, Some(900));
    }

    #[test]
    fn test_merge_overwrites_with_newer_values() {
        let mut partial = partial_with("Faro");
        let update = partial_with("Tavira");
        partial.merge(&update);
        assert_eq!(partial.location.as_deref(), Some("Tavira"));
    }

    #[test]
    fn test_merge_ignores_blank_location() {
        let mut partial = partial_with("Faro");
        let update = partial_with("   ");
        partial.merge(&update);
        assert_eq!(partial.location.as_deref(), Some("Faro"));
    }

    #[test]
    fn test_sufficiency() {
        let mut partial = partial_with("Faro");
        assert!(!partial.is_sufficient());
        partial.budget_max = Some(900);
        assert!(partial.is_sufficient());

        let mut partial = partial_with("Faro");
        partial.bedrooms = Some(2);
        assert!(partial.is_sufficient());

        let mut no_location = PartialRequirements::default();
        no_location.bedrooms = Some(2);
        no_location.budget_max = Some(900);
        assert!(!no_location.is_sufficient());
    }

    #[test]
    fn test_to_requirements_defaults_sale() {
        let mut partial = partial_with("Faro");
        partial.bedrooms = Some(2);
        let requirements = partial.to_requirements().unwrap();
        assert!(!requirements.is_rent);
        assert_eq!(requirements.location, "Faro");
    }

    #[test]
    fn test_clamp_scores() {
        let mut report = CommunityReport {
            location: "Faro".to_string(),
            overall_score: 12.5,
            overall_explanation: String::new(),
            safety_score: -1.0,
            safety_explanation: String::new(),
            school_rating: 8.0,
            school_explanation: String::new(),
            positive_stories: vec![],
            negative_stories: vec![],
            housing_price_per_sqm: None,
            average_size_sqm: None,
        };
        assert!(report.clamp_scores());
        assert!((report.overall_score - 10.0).abs() < f64::EPSILON);
        assert!(report.safety_score.abs() < f64::EPSILON);
        assert!((report.school_rating - 8.0).abs() < f64::EPSILON);
        assert!(!report.clamp_scores());
    }

    #[test]
    fn test_enriched_candidate_serializes_flat() {
        let candidate = Candidate {
            title: "T2 em Faro".to_string(),
            address: "Rua de Santo António, Faro".to_string(),
            url: "https://www.idealista.pt/x".to_string(),
            ..Candidate::default()
        };
        let enriched = EnrichedCandidate {
            geo: GeoCandidate {
                candidate,
                latitude: 37.0,
                longitude: -7.9,
                geocode_confidence: 0.9,
            },
            pois: vec![],
        };
        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["title"], "T2 em Faro");
        assert_eq!(value["latitude"], 37.0);
        assert!(value["pois"].as_array().unwrap().is_empty());
    }
}
