//! Known locations table
//!
//! Canonical labels, alias spellings, and map centers for the places
//! the assistant searches most. The research agent's location filter
//! and the mapping agent's country hints both consume this table, so
//! matching here must be case- and diacritic-insensitive.

/// One known location.
#[derive(Debug, Clone, Copy)]
pub struct LocationEntry {
    /// Canonical display label
    pub label: &'static str,
    /// Alternate spellings and contained localities
    pub aliases: &'static [&'static str],
    /// Map center latitude
    pub center_lat: f64,
    /// Map center longitude
    pub center_lon: f64,
    /// ISO country code for geocoder hints
    pub country: &'static str,
}

/// The 16 Algarve municipalities, major Algarve localities, and the US
/// metros the assistant also covers.
pub const KNOWN_LOCATIONS: &[LocationEntry] = &[
    // Algarve municipalities
    LocationEntry { label: "Albufeira", aliases: &[], center_lat: 37.0891, center_lon: -8.2479, country: "PT" },
    LocationEntry { label: "Alcoutim", aliases: &[], center_lat: 37.4716, center_lon: -7.4716, country: "PT" },
    LocationEntry { label: "Aljezur", aliases: &[], center_lat: 37.3177, center_lon: -8.8031, country: "PT" },
    LocationEntry { label: "Castro Marim", aliases: &["Altura"], center_lat: 37.2186, center_lon: -7.4434, country: "PT" },
    LocationEntry { label: "Faro", aliases: &["Montenegro", "Gambelas"], center_lat: 37.0194, center_lon: -7.9304, country: "PT" },
    LocationEntry { label: "Lagoa", aliases: &["Carvoeiro", "Ferragudo"], center_lat: 37.1350, center_lon: -8.4519, country: "PT" },
    LocationEntry { label: "Lagos", aliases: &["Luz", "Meia Praia"], center_lat: 37.1020, center_lon: -8.6742, country: "PT" },
    LocationEntry { label: "Loulé", aliases: &["Quarteira", "Vilamoura", "Almancil", "Quinta do Lago"], center_lat: 37.1378, center_lon: -8.0200, country: "PT" },
    LocationEntry { label: "Monchique", aliases: &[], center_lat: 37.3177, center_lon: -8.5553, country: "PT" },
    LocationEntry { label: "Olhão", aliases: &["Fuseta"], center_lat: 37.0260, center_lon: -7.8411, country: "PT" },
    LocationEntry { label: "Portimão", aliases: &["Alvor", "Praia da Rocha"], center_lat: 37.1366, center_lon: -8.5377, country: "PT" },
    LocationEntry { label: "São Brás de Alportel", aliases: &["Sao Bras"], center_lat: 37.1526, center_lon: -7.8885, country: "PT" },
    LocationEntry { label: "Silves", aliases: &["Armação de Pêra", "Tunes"], center_lat: 37.1894, center_lon: -8.4384, country: "PT" },
    LocationEntry { label: "Tavira", aliases: &["Cabanas", "Santa Luzia"], center_lat: 37.1264, center_lon: -7.6486, country: "PT" },
    LocationEntry { label: "Vila do Bispo", aliases: &["Sagres"], center_lat: 37.0834, center_lon: -8.9116, country: "PT" },
    LocationEntry { label: "Vila Real de Santo António", aliases: &["Monte Gordo"], center_lat: 37.1933, center_lon: -7.4156, country: "PT" },
    // US metros
    LocationEntry { label: "San Francisco", aliases: &["SF", "Castro District", "Mission District"], center_lat: 37.7749, center_lon: -122.4194, country: "US" },
    LocationEntry { label: "Oakland", aliases: &[], center_lat: 37.8044, center_lon: -122.2712, country: "US" },
    LocationEntry { label: "San Jose", aliases: &[], center_lat: 37.3382, center_lon: -121.8863, country: "US" },
    LocationEntry { label: "Berkeley", aliases: &[], center_lat: 37.8715, center_lon: -122.2730, country: "US" },
    LocationEntry { label: "Palo Alto", aliases: &[], center_lat: 37.4419, center_lon: -122.1430, country: "US" },
];

/// Fold a string to lowercase ASCII for comparison: strips the
/// diacritics Portuguese labels carry.
#[must_use]
pub fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            'ñ' | 'Ñ' => 'n',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Case- and diacritic-insensitive containment check.
#[must_use]
pub fn contains_folded(haystack: &str, needle: &str) -> bool {
    let needle = fold(needle);
    if needle.is_empty() {
        return false;
    }
    fold(haystack).contains(&needle)
}

/// Look up a location by label or alias.
#[must_use]
pub fn find_location(name: &str) -> Option<&'static LocationEntry> {
    let wanted = fold(name.trim());
    KNOWN_LOCATIONS.iter().find(|entry| {
        fold(entry.label) == wanted || entry.aliases.iter().any(|alias| fold(alias) == wanted)
    })
}

/// Look up the first known location mentioned anywhere in free text.
#[must_use]
pub fn find_location_in_text(text: &str) -> Option<&'static LocationEntry> {
    let folded = fold(text);
    KNOWN_LOCATIONS.iter().find(|entry| {
        folded.contains(&fold(entry.label))
            || entry.aliases.iter().any(|alias| folded.contains(&fold(alias)))
    })
}
