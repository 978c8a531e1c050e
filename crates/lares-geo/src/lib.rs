//! Lares Geo - geocoding, POI lookup, and known locations
//!
//! - Geocode: forward geocoding with confidence scoring
//! - POI: typed points of interest ordered by distance
//! - Locations: canonical table of covered cities with aliases and
//!   map centers, matched diacritic-insensitively

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod geocode;
pub mod locations;
pub mod poi;

pub use error::{Error, Result};
pub use geocode::{
    Geocode, Geocoder, GeocoderConfig, HttpGeocoder, DEFAULT_GEOCODER_URL, MIN_CONFIDENCE,
};
pub use locations::{
    contains_folded, find_location, find_location_in_text, fold, LocationEntry, KNOWN_LOCATIONS,
};
pub use poi::{
    distance_m, HttpPoiProvider, Poi, PoiCategory, PoiConfig, PoiProvider, DEFAULT_POI_URL,
    DEFAULT_RADIUS_M,
};
