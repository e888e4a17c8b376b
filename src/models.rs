use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{BirdingError, Result};

// ============================================================================
// Core Domain Models
// ============================================================================

/// A WGS84 point. Only constructible inside the valid lat/lon ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(BirdingError::invalid(
                "latitude",
                format!("{} is outside [-90, 90]", latitude),
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(BirdingError::invalid(
                "longitude",
                format!("{} is outside [-180, 180]", longitude),
            ));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Rounds both components to `places` decimal places.
    pub fn rounded(self, places: i32) -> Self {
        let factor = 10f64.powi(places);
        Self {
            latitude: (self.latitude * factor).round() / factor,
            longitude: (self.longitude * factor).round() / factor,
        }
    }
}

/// The ten query shapes the observation provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    RecentObservations,
    NotableObservations,
    SpeciesObservations,
    NearbyObservations,
    NearbyNotable,
    NearbySpecies,
    Hotspots,
    NearbyHotspots,
    Taxonomy,
    TaxonomyForms,
}

impl IntentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecentObservations => "recent observations",
            Self::NotableObservations => "notable observations",
            Self::SpeciesObservations => "species observations",
            Self::NearbyObservations => "nearby observations",
            Self::NearbyNotable => "nearby notable observations",
            Self::NearbySpecies => "nearby species observations",
            Self::Hotspots => "hotspots",
            Self::NearbyHotspots => "nearby hotspots",
            Self::Taxonomy => "taxonomy",
            Self::TaxonomyForms => "taxonomy forms",
        }
    }

    pub fn needs_region(&self) -> bool {
        matches!(
            self,
            Self::RecentObservations
                | Self::NotableObservations
                | Self::SpeciesObservations
                | Self::Hotspots
        )
    }

    pub fn needs_coordinate(&self) -> bool {
        matches!(
            self,
            Self::NearbyObservations
                | Self::NearbyNotable
                | Self::NearbySpecies
                | Self::NearbyHotspots
        )
    }

    pub fn needs_species(&self) -> bool {
        matches!(
            self,
            Self::SpeciesObservations | Self::NearbySpecies | Self::TaxonomyForms
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Simple,
    Full,
}

impl Detail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyCategory {
    Species,
    Slash,
    Issf,
    Spuh,
    Hybrid,
    Domestic,
    Form,
    Intergrade,
}

impl TaxonomyCategory {
    pub const ALL: [TaxonomyCategory; 8] = [
        Self::Species,
        Self::Slash,
        Self::Issf,
        Self::Spuh,
        Self::Hybrid,
        Self::Domestic,
        Self::Form,
        Self::Intergrade,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Species => "species",
            Self::Slash => "slash",
            Self::Issf => "issf",
            Self::Spuh => "spuh",
            Self::Hybrid => "hybrid",
            Self::Domestic => "domestic",
            Self::Form => "form",
            Self::Intergrade => "intergrade",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// Validated parameters shared by every observation query.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationParams {
    pub back_days: u32,
    pub max_results: u32,
    pub include_provisional: bool,
    pub hotspot_only: bool,
    pub detail: Detail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyParams {
    pub category: TaxonomyCategory,
    /// Always "json"; the gateway only parses JSON taxonomy responses.
    pub format: String,
    pub locale: String,
    pub species: Vec<String>,
}

/// A fully validated query. Region-scoped variants carry a region code,
/// coordinate-scoped variants carry a point; never both.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryIntent {
    RecentObservations {
        region_code: String,
        params: ObservationParams,
    },
    NotableObservations {
        region_code: String,
        params: ObservationParams,
    },
    SpeciesObservations {
        region_code: String,
        species_code: String,
        params: ObservationParams,
    },
    NearbyObservations {
        point: Coordinate,
        radius_km: u32,
        params: ObservationParams,
    },
    NearbyNotable {
        point: Coordinate,
        radius_km: u32,
        params: ObservationParams,
    },
    NearbySpecies {
        point: Coordinate,
        species_code: String,
        radius_km: u32,
        params: ObservationParams,
    },
    Hotspots {
        region_code: String,
        back_days: u32,
    },
    NearbyHotspots {
        point: Coordinate,
        radius_km: u32,
        back_days: u32,
    },
    Taxonomy(TaxonomyParams),
    TaxonomyForms {
        species_code: String,
    },
}

impl QueryIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::RecentObservations { .. } => IntentKind::RecentObservations,
            Self::NotableObservations { .. } => IntentKind::NotableObservations,
            Self::SpeciesObservations { .. } => IntentKind::SpeciesObservations,
            Self::NearbyObservations { .. } => IntentKind::NearbyObservations,
            Self::NearbyNotable { .. } => IntentKind::NearbyNotable,
            Self::NearbySpecies { .. } => IntentKind::NearbySpecies,
            Self::Hotspots { .. } => IntentKind::Hotspots,
            Self::NearbyHotspots { .. } => IntentKind::NearbyHotspots,
            Self::Taxonomy(_) => IntentKind::Taxonomy,
            Self::TaxonomyForms { .. } => IntentKind::TaxonomyForms,
        }
    }

    pub fn region_code(&self) -> Option<&str> {
        match self {
            Self::RecentObservations { region_code, .. }
            | Self::NotableObservations { region_code, .. }
            | Self::SpeciesObservations { region_code, .. }
            | Self::Hotspots { region_code, .. } => Some(region_code),
            _ => None,
        }
    }

    pub fn point(&self) -> Option<Coordinate> {
        match self {
            Self::NearbyObservations { point, .. }
            | Self::NearbyNotable { point, .. }
            | Self::NearbySpecies { point, .. }
            | Self::NearbyHotspots { point, .. } => Some(*point),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub species_name: String,
    pub species_code: String,
    pub scientific_name: Option<String>,
    pub location_name: String,
    pub location_id: String,
    /// `None` for "present" (X) sightings without a count.
    pub count: Option<u32>,
    pub observed_at: String,
    pub coordinate: Coordinate,
    pub is_notable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotRecord {
    pub location_id: String,
    pub location_name: String,
    pub coordinate: Coordinate,
    pub recent_activity_count: u32,
    pub latest_observed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyEntry {
    pub species_code: String,
    pub common_name: String,
    pub scientific_name: Option<String>,
    pub category: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub label: String,
    pub supporting_location: String,
    pub score: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPlace {
    pub input_text: String,
    pub coordinate: Coordinate,
    pub matched_name: String,
    pub is_capital_fallback: bool,
}

/// Records parsed from one provider response, with the number of
/// malformed records that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub dropped: usize,
}

impl<T> Fetched<T> {
    pub fn new(records: Vec<T>, dropped: usize) -> Self {
        Self { records, dropped }
    }
}

// ============================================================================
// eBird API Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EbirdObservation {
    #[serde(rename = "speciesCode")]
    pub species_code: Option<String>,
    #[serde(rename = "comName")]
    pub common_name: Option<String>,
    #[serde(rename = "sciName")]
    pub scientific_name: Option<String>,
    #[serde(rename = "locId")]
    pub location_id: Option<String>,
    #[serde(rename = "locName")]
    pub location_name: Option<String>,
    #[serde(rename = "obsDt")]
    pub observed_at: Option<String>,
    #[serde(rename = "howMany")]
    pub how_many: Option<u32>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl EbirdObservation {
    /// Converts to a domain record; `None` when species or location
    /// identity, or a valid coordinate, is missing.
    pub fn into_record(self, is_notable: bool) -> Option<ObservationRecord> {
        let species_code = non_empty(self.species_code)?;
        let species_name = non_empty(self.common_name)?;
        let location_id = non_empty(self.location_id)?;
        let coordinate = Coordinate::new(self.lat?, self.lng?).ok()?;
        Some(ObservationRecord {
            location_name: non_empty(self.location_name).unwrap_or_else(|| location_id.clone()),
            species_name,
            species_code,
            scientific_name: self.scientific_name,
            location_id,
            count: self.how_many,
            observed_at: self.observed_at.unwrap_or_default(),
            coordinate,
            is_notable,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EbirdHotspot {
    #[serde(rename = "locId")]
    pub location_id: Option<String>,
    #[serde(rename = "locName")]
    pub location_name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(rename = "numSpeciesAllTime")]
    pub num_species_all_time: Option<u32>,
    #[serde(rename = "latestObsDt")]
    pub latest_observed_at: Option<String>,
}

impl EbirdHotspot {
    pub fn into_record(self) -> Option<HotspotRecord> {
        Some(HotspotRecord {
            location_id: non_empty(self.location_id)?,
            location_name: non_empty(self.location_name)?,
            coordinate: Coordinate::new(self.lat?, self.lng?).ok()?,
            recent_activity_count: self.num_species_all_time.unwrap_or(0),
            latest_observed_at: self.latest_observed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EbirdTaxon {
    #[serde(rename = "speciesCode")]
    pub species_code: Option<String>,
    #[serde(rename = "comName")]
    pub common_name: Option<String>,
    #[serde(rename = "sciName")]
    pub scientific_name: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "familyComName")]
    pub family: Option<String>,
}

impl EbirdTaxon {
    pub fn into_entry(self) -> Option<TaxonomyEntry> {
        Some(TaxonomyEntry {
            species_code: non_empty(self.species_code)?,
            common_name: non_empty(self.common_name)?,
            scientific_name: self.scientific_name,
            category: self.category,
            family: self.family,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// MCP Tool Request Models
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct RegionObservationsRequest {
    /// eBird region code, e.g. "US-MA" or "CA-BC"
    pub region_code: String,
    /// Lookback window in days (1-30, default 14)
    pub back: Option<i64>,
    pub max_results: Option<i64>,
    pub include_provisional: Option<bool>,
    pub hotspot: Option<bool>,
    /// "simple" or "full"
    pub detail: Option<String>,
    /// Number of ranked species to return (default 15)
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct SpeciesObservationsRequest {
    pub region_code: String,
    /// eBird species code, e.g. "baleag"
    pub species_code: String,
    pub back: Option<i64>,
    pub max_results: Option<i64>,
    pub include_provisional: Option<bool>,
    pub hotspot: Option<bool>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NearbyObservationsRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Place name to resolve when latitude/longitude are not given
    pub place: Option<String>,
    /// ISO country code used to break ties between equally good matches
    pub country: Option<String>,
    /// Search radius in km (1-50, default 25)
    pub dist: Option<i64>,
    pub back: Option<i64>,
    pub max_results: Option<i64>,
    pub include_provisional: Option<bool>,
    pub hotspot: Option<bool>,
    pub detail: Option<String>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NearbySpeciesRequest {
    pub species_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place: Option<String>,
    pub country: Option<String>,
    pub dist: Option<i64>,
    pub back: Option<i64>,
    pub max_results: Option<i64>,
    pub include_provisional: Option<bool>,
    pub hotspot: Option<bool>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct HotspotsRequest {
    pub region_code: String,
    pub back: Option<i64>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NearbyHotspotsRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place: Option<String>,
    pub country: Option<String>,
    pub dist: Option<i64>,
    pub back: Option<i64>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct TaxonomyRequest {
    /// species, slash, issf, spuh, hybrid, domestic, form or intergrade
    pub category: Option<String>,
    pub format: Option<String>,
    pub locale: Option<String>,
    /// Restrict to these species codes
    pub species: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct TaxonomyFormsRequest {
    pub species_code: String,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct TopSpeciesRequest {
    /// Region code to list hotspots in; alternative to a point or place
    pub region_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place: Option<String>,
    pub country: Option<String>,
    pub dist: Option<i64>,
    pub back: Option<i64>,
    pub cap: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ResolveLocationRequest {
    pub place: String,
    pub country: Option<String>,
}
