//! Validation and defaulting of per-query parameters.
//!
//! Loose tool arguments arrive as a [`RawParams`] bag; [`ParameterNormalizer`]
//! turns the bag into a fully populated [`QueryIntent`] or fails with
//! `InvalidParameter` naming the offending field. Out-of-range values are
//! rejected, never clamped.

use crate::config::Config;
use crate::constants::DEFAULT_LOCALE;
use crate::error::{BirdingError, Result};
use crate::models::{
    Coordinate, Detail, IntentKind, ObservationParams, QueryIntent, TaxonomyCategory,
    TaxonomyParams,
};

/// Untyped parameters as accepted at the tool boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawParams {
    pub region_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub species_code: Option<String>,
    pub back: Option<i64>,
    pub max_results: Option<i64>,
    pub include_provisional: Option<bool>,
    pub hotspot: Option<bool>,
    pub detail: Option<String>,
    pub dist: Option<i64>,
    pub locale: Option<String>,
    pub category: Option<String>,
    pub format: Option<String>,
    pub species: Vec<String>,
}

impl RawParams {
    pub fn region(region_code: impl Into<String>) -> Self {
        Self {
            region_code: Some(region_code.into()),
            ..Self::default()
        }
    }

    pub fn point(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Self::default()
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() || self.longitude.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ParameterNormalizer {
    max_back_days: u32,
    max_radius_km: u32,
    max_results: u32,
    default_back_days: u32,
    default_max_results: u32,
    default_radius_km: u32,
    default_cap: usize,
}

impl ParameterNormalizer {
    pub fn new(config: &Config) -> Self {
        Self {
            max_back_days: config.provider.max_back_days,
            max_radius_km: config.provider.max_radius_km,
            max_results: config.provider.max_results,
            default_back_days: config.defaults.back_days,
            default_max_results: config.defaults.max_results,
            default_radius_km: config.defaults.radius_km,
            default_cap: config.defaults.summary_cap,
        }
    }

    pub fn normalize(&self, kind: IntentKind, raw: &RawParams) -> Result<QueryIntent> {
        let intent = match kind {
            IntentKind::RecentObservations => QueryIntent::RecentObservations {
                region_code: self.region_code(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::NotableObservations => QueryIntent::NotableObservations {
                region_code: self.region_code(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::SpeciesObservations => QueryIntent::SpeciesObservations {
                region_code: self.region_code(raw)?,
                species_code: species_code(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::NearbyObservations => QueryIntent::NearbyObservations {
                point: self.point(raw)?,
                radius_km: self.radius(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::NearbyNotable => QueryIntent::NearbyNotable {
                point: self.point(raw)?,
                radius_km: self.radius(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::NearbySpecies => QueryIntent::NearbySpecies {
                point: self.point(raw)?,
                species_code: species_code(raw)?,
                radius_km: self.radius(raw)?,
                params: self.observation_params(raw)?,
            },
            IntentKind::Hotspots => QueryIntent::Hotspots {
                region_code: self.region_code(raw)?,
                back_days: self.back_days(raw)?,
            },
            IntentKind::NearbyHotspots => QueryIntent::NearbyHotspots {
                point: self.point(raw)?,
                radius_km: self.radius(raw)?,
                back_days: self.back_days(raw)?,
            },
            IntentKind::Taxonomy => QueryIntent::Taxonomy(taxonomy_params(raw)?),
            IntentKind::TaxonomyForms => QueryIntent::TaxonomyForms {
                species_code: species_code(raw)?,
            },
        };
        tracing::debug!("Normalized {} parameters: {:?}", kind.name(), intent);
        Ok(intent)
    }

    /// Validates the ranked-list cap, defaulting to the configured summary cap.
    pub fn cap(&self, cap: Option<i64>) -> Result<usize> {
        match cap {
            None => Ok(self.default_cap),
            Some(value) => {
                bounded("cap", Some(value), 0, self.max_results).map(|v| v as usize)
            }
        }
    }

    fn region_code(&self, raw: &RawParams) -> Result<String> {
        if raw.has_coordinates() {
            return Err(BirdingError::invalid(
                "latitude",
                "region-scoped queries take a region code, not coordinates",
            ));
        }
        let code = raw
            .region_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BirdingError::invalid("region_code", "is required"))?;
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(BirdingError::invalid(
                "region_code",
                format!("'{}' is not a valid region code", code),
            ));
        }
        Ok(code.to_string())
    }

    fn point(&self, raw: &RawParams) -> Result<Coordinate> {
        if raw.region_code.is_some() {
            return Err(BirdingError::invalid(
                "region_code",
                "coordinate-scoped queries take latitude/longitude, not a region code",
            ));
        }
        let latitude = raw
            .latitude
            .ok_or_else(|| BirdingError::invalid("latitude", "is required"))?;
        let longitude = raw
            .longitude
            .ok_or_else(|| BirdingError::invalid("longitude", "is required"))?;
        Coordinate::new(latitude, longitude)
    }

    fn back_days(&self, raw: &RawParams) -> Result<u32> {
        bounded("back", raw.back, self.default_back_days, self.max_back_days)
    }

    fn radius(&self, raw: &RawParams) -> Result<u32> {
        bounded("dist", raw.dist, self.default_radius_km, self.max_radius_km)
    }

    fn observation_params(&self, raw: &RawParams) -> Result<ObservationParams> {
        let detail = match raw.detail.as_deref().map(str::trim) {
            None => Detail::Simple,
            Some(d) if d.eq_ignore_ascii_case("simple") => Detail::Simple,
            Some(d) if d.eq_ignore_ascii_case("full") => Detail::Full,
            Some(d) => {
                return Err(BirdingError::invalid(
                    "detail",
                    format!("'{}' is not one of simple, full", d),
                ))
            }
        };
        Ok(ObservationParams {
            back_days: self.back_days(raw)?,
            max_results: bounded(
                "max_results",
                raw.max_results,
                self.default_max_results,
                self.max_results,
            )?,
            include_provisional: raw.include_provisional.unwrap_or(true),
            hotspot_only: raw.hotspot.unwrap_or(false),
            detail,
        })
    }
}

fn bounded(field: &str, value: Option<i64>, default: u32, max: u32) -> Result<u32> {
    let Some(value) = value else {
        return Ok(default);
    };
    if value <= 0 {
        return Err(BirdingError::invalid(field, format!("{} must be positive", value)));
    }
    if value > i64::from(max) {
        return Err(BirdingError::invalid(
            field,
            format!("{} exceeds the provider maximum of {}", value, max),
        ));
    }
    Ok(value as u32)
}

fn species_code(raw: &RawParams) -> Result<String> {
    let code = raw
        .species_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BirdingError::invalid("species_code", "is required"))?;
    validate_code("species_code", code)?;
    Ok(code.to_string())
}

fn validate_code(field: &str, code: &str) -> Result<()> {
    if code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(BirdingError::invalid(
            field,
            format!("'{}' is not a valid species code", code),
        ))
    }
}

fn taxonomy_params(raw: &RawParams) -> Result<TaxonomyParams> {
    let category = match raw.category.as_deref() {
        None => TaxonomyCategory::Species,
        Some(value) => TaxonomyCategory::parse(value).ok_or_else(|| {
            BirdingError::invalid("category", format!("'{}' is not a taxonomy category", value))
        })?,
    };

    let format = raw.format.as_deref().map(str::trim).unwrap_or("json");
    if !format.eq_ignore_ascii_case("json") {
        return Err(BirdingError::invalid(
            "format",
            format!("'{}' is not supported, only json", format),
        ));
    }

    let locale = raw
        .locale
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_LOCALE);
    if locale.is_empty()
        || !locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BirdingError::invalid(
            "locale",
            format!("'{}' is not a valid locale", locale),
        ));
    }

    let mut species = Vec::with_capacity(raw.species.len());
    for code in raw.species.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        validate_code("species", code)?;
        species.push(code.to_string());
    }

    Ok(TaxonomyParams {
        category,
        format: "json".to_string(),
        locale: locale.to_string(),
        species,
    })
}
