//! Free-text place name to coordinate resolution.
//!
//! A specific place (city, landmark) resolves to the geocoder's best match.
//! A country or first-level region resolves to its administrative capital,
//! flagged with `is_capital_fallback` so the answer can disclose the
//! approximation. Capitals come from an injectable [`CapitalLookup`].

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GeocoderConfig;
use crate::constants::COORDINATE_PRECISION;
use crate::error::{BirdingError, Result};
use crate::geocoder::{GeocodeCandidate, Geocoder, PlaceKind};
use crate::models::{Coordinate, ResolvedPlace};
use crate::retry::{with_retry, QueryContext, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct Capital {
    /// Region the capital belongs to, e.g. "Alaska"
    pub region: String,
    pub country_code: String,
    pub name: String,
    pub coordinate: Coordinate,
}

pub trait CapitalLookup: Send + Sync {
    /// Finds the capital of `region`. When several regions share a name
    /// (Georgia), `country_code` picks between them.
    fn capital_of(&self, region: &str, country_code: Option<&str>) -> Option<Capital>;
}

/// In-memory capital table.
#[derive(Debug, Clone, Default)]
pub struct CapitalTable {
    entries: Vec<Capital>,
}

impl CapitalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry; invalid coordinates are ignored.
    pub fn with(
        mut self,
        region: &str,
        country_code: &str,
        capital: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        match Coordinate::new(latitude, longitude) {
            Ok(coordinate) => self.entries.push(Capital {
                region: region.to_string(),
                country_code: country_code.to_lowercase(),
                name: capital.to_string(),
                coordinate,
            }),
            Err(e) => tracing::warn!("Ignoring capital {} of {}: {}", capital, region, e),
        }
        self
    }

    /// US states plus a set of countries.
    pub fn builtin() -> Self {
        let states = US_STATE_CAPITALS
            .iter()
            .map(|(region, capital, lat, lon)| (*region, "us", *capital, *lat, *lon));
        let countries = COUNTRY_CAPITALS.iter().copied();
        states
            .chain(countries)
            .fold(Self::new(), |table, (region, cc, capital, lat, lon)| {
                table.with(region, cc, capital, lat, lon)
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CapitalLookup for CapitalTable {
    fn capital_of(&self, region: &str, country_code: Option<&str>) -> Option<Capital> {
        let region = region.trim();
        let mut matches = self
            .entries
            .iter()
            .filter(|e| e.region.eq_ignore_ascii_case(region));
        let first = matches.next()?;
        let preferred = country_code.and_then(|cc| {
            std::iter::once(first)
                .chain(matches)
                .find(|e| e.country_code.eq_ignore_ascii_case(cc))
        });
        Some(preferred.unwrap_or(first).clone())
    }
}

pub struct LocationResolver {
    geocoder: Arc<dyn Geocoder>,
    capitals: Arc<dyn CapitalLookup>,
    cache: Cache<String, ResolvedPlace>,
    min_confidence: f64,
    retry: RetryPolicy,
}

impl LocationResolver {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        capitals: Arc<dyn CapitalLookup>,
        config: &GeocoderConfig,
    ) -> Self {
        Self {
            geocoder,
            capitals,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .build(),
            min_confidence: config.min_confidence,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolves `text` to a coordinate rounded to 4 decimal places.
    /// `country_hint` breaks ties between equally ranked candidates.
    /// Transient geocoder failures are retried under `ctx`.
    pub async fn resolve(
        &self,
        text: &str,
        country_hint: Option<&str>,
        ctx: &QueryContext,
    ) -> Result<ResolvedPlace> {
        let query = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if query.is_empty() {
            return Err(BirdingError::LocationNotFound {
                query: text.to_string(),
            });
        }

        let hint = country_hint.map(|h| h.trim().to_lowercase());
        let key = format!("{}|{}", query.to_lowercase(), hint.as_deref().unwrap_or(""));
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("Location cache hit for '{}'", query);
            return Ok(ResolvedPlace {
                input_text: query,
                ..hit
            });
        }

        let place = self.resolve_uncached(&query, hint.as_deref(), ctx).await?;
        tracing::info!(
            "Resolved '{}' to {} ({}, {}){}",
            query,
            place.matched_name,
            place.coordinate.latitude(),
            place.coordinate.longitude(),
            if place.is_capital_fallback {
                " via capital fallback"
            } else {
                ""
            }
        );
        self.cache.insert(key, place.clone()).await;
        Ok(place)
    }

    async fn resolve_uncached(
        &self,
        query: &str,
        hint: Option<&str>,
        ctx: &QueryContext,
    ) -> Result<ResolvedPlace> {
        let candidates: Vec<GeocodeCandidate> =
            with_retry(&self.retry, ctx, "geocode", || self.geocoder.search(query))
                .await?
                .into_iter()
                .filter(|c| c.confidence >= self.min_confidence)
                .collect();

        let Some(best) = pick_best(&candidates, query, hint) else {
            return match self.capitals.capital_of(query, hint) {
                Some(capital) => self.resolve_capital(query, capital, ctx).await,
                None => Err(BirdingError::LocationNotFound {
                    query: query.to_string(),
                }),
            };
        };

        match best.kind {
            PlaceKind::Point => Ok(ResolvedPlace {
                input_text: query.to_string(),
                coordinate: best.coordinate.rounded(COORDINATE_PRECISION),
                matched_name: best.display_name.clone(),
                is_capital_fallback: false,
            }),
            PlaceKind::Region => {
                let country = best.country_code.as_deref().or(hint);
                let capital = self
                    .capitals
                    .capital_of(&best.name, country)
                    .or_else(|| self.capitals.capital_of(query, country))
                    .ok_or_else(|| BirdingError::LocationNotFound {
                        query: format!(
                            "{} is a region with no known capital; name a city instead",
                            query
                        ),
                    })?;
                self.resolve_capital(query, capital, ctx).await
            }
        }
    }

    /// Looks the capital up through the geocoder, falling back to the
    /// table's own coordinate. One attempt only; cancellation still ends
    /// the query.
    async fn resolve_capital(
        &self,
        query: &str,
        capital: Capital,
        ctx: &QueryContext,
    ) -> Result<ResolvedPlace> {
        let capital_query = format!("{}, {}", capital.name, capital.region);
        let coordinate = match ctx.guard(self.geocoder.search(&capital_query)).await {
            Ok(candidates) => {
                let points: Vec<GeocodeCandidate> = candidates
                    .into_iter()
                    .filter(|c| c.kind == PlaceKind::Point)
                    .collect();
                pick_best(&points, &capital.name, Some(&capital.country_code))
                    .map(|c| c.coordinate)
                    .unwrap_or(capital.coordinate)
            }
            Err(BirdingError::Cancelled) => return Err(BirdingError::Cancelled),
            Err(e) => {
                tracing::warn!("Capital lookup for '{}' failed: {}", capital_query, e);
                capital.coordinate
            }
        };

        Ok(ResolvedPlace {
            input_text: query.to_string(),
            coordinate: coordinate.rounded(COORDINATE_PRECISION),
            matched_name: capital_query,
            is_capital_fallback: true,
        })
    }
}

/// Highest confidence wins. Ties go to an exact name match, then to the
/// hinted country, then to provider order.
fn pick_best<'a>(
    candidates: &'a [GeocodeCandidate],
    query: &str,
    hint: Option<&str>,
) -> Option<&'a GeocodeCandidate> {
    let top = candidates
        .iter()
        .map(|c| c.confidence)
        .fold(f64::NEG_INFINITY, f64::max);
    let head = query.split(',').next().unwrap_or(query).trim();

    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| (top - c.confidence).abs() <= f64::EPSILON)
        .min_by_key(|(i, c)| {
            let exact = c.name.eq_ignore_ascii_case(head);
            let in_country = match (hint, c.country_code.as_deref()) {
                (Some(h), Some(cc)) => h.eq_ignore_ascii_case(cc),
                _ => false,
            };
            (!exact, !in_country, *i)
        })
        .map(|(_, c)| c)
}

const US_STATE_CAPITALS: &[(&str, &str, f64, f64)] = &[
    ("Alabama", "Montgomery", 32.3792, -86.3077),
    ("Alaska", "Juneau", 58.3019, -134.4197),
    ("Arizona", "Phoenix", 33.4484, -112.0740),
    ("Arkansas", "Little Rock", 34.7465, -92.2896),
    ("California", "Sacramento", 38.5816, -121.4944),
    ("Colorado", "Denver", 39.7392, -104.9903),
    ("Connecticut", "Hartford", 41.7658, -72.6734),
    ("Delaware", "Dover", 39.1582, -75.5244),
    ("Florida", "Tallahassee", 30.4383, -84.2807),
    ("Georgia", "Atlanta", 33.7490, -84.3880),
    ("Hawaii", "Honolulu", 21.3069, -157.8583),
    ("Idaho", "Boise", 43.6150, -116.2023),
    ("Illinois", "Springfield", 39.7817, -89.6501),
    ("Indiana", "Indianapolis", 39.7684, -86.1581),
    ("Iowa", "Des Moines", 41.5868, -93.6250),
    ("Kansas", "Topeka", 39.0473, -95.6752),
    ("Kentucky", "Frankfort", 38.2009, -84.8733),
    ("Louisiana", "Baton Rouge", 30.4515, -91.1871),
    ("Maine", "Augusta", 44.3106, -69.7795),
    ("Maryland", "Annapolis", 38.9784, -76.4922),
    ("Massachusetts", "Boston", 42.3601, -71.0589),
    ("Michigan", "Lansing", 42.7325, -84.5555),
    ("Minnesota", "Saint Paul", 44.9537, -93.0900),
    ("Mississippi", "Jackson", 32.2988, -90.1848),
    ("Missouri", "Jefferson City", 38.5767, -92.1735),
    ("Montana", "Helena", 46.5891, -112.0391),
    ("Nebraska", "Lincoln", 40.8136, -96.7026),
    ("Nevada", "Carson City", 39.1638, -119.7674),
    ("New Hampshire", "Concord", 43.2081, -71.5376),
    ("New Jersey", "Trenton", 40.2206, -74.7597),
    ("New Mexico", "Santa Fe", 35.6870, -105.9378),
    ("New York", "Albany", 42.6526, -73.7562),
    ("North Carolina", "Raleigh", 35.7796, -78.6382),
    ("North Dakota", "Bismarck", 46.8083, -100.7837),
    ("Ohio", "Columbus", 39.9612, -82.9988),
    ("Oklahoma", "Oklahoma City", 35.4676, -97.5164),
    ("Oregon", "Salem", 44.9429, -123.0351),
    ("Pennsylvania", "Harrisburg", 40.2732, -76.8867),
    ("Rhode Island", "Providence", 41.8240, -71.4128),
    ("South Carolina", "Columbia", 34.0007, -81.0348),
    ("South Dakota", "Pierre", 44.3683, -100.3510),
    ("Tennessee", "Nashville", 36.1627, -86.7816),
    ("Texas", "Austin", 30.2672, -97.7431),
    ("Utah", "Salt Lake City", 40.7608, -111.8910),
    ("Vermont", "Montpelier", 44.2601, -72.5754),
    ("Virginia", "Richmond", 37.5407, -77.4360),
    ("Washington", "Olympia", 47.0379, -122.9007),
    ("West Virginia", "Charleston", 38.3498, -81.6326),
    ("Wisconsin", "Madison", 43.0731, -89.4012),
    ("Wyoming", "Cheyenne", 41.1400, -104.8202),
];

const COUNTRY_CAPITALS: &[(&str, &str, &str, f64, f64)] = &[
    ("United States", "us", "Washington", 38.9072, -77.0369),
    ("Canada", "ca", "Ottawa", 45.4215, -75.6972),
    ("Mexico", "mx", "Mexico City", 19.4326, -99.1332),
    ("United Kingdom", "gb", "London", 51.5074, -0.1278),
    ("Ireland", "ie", "Dublin", 53.3498, -6.2603),
    ("France", "fr", "Paris", 48.8566, 2.3522),
    ("Germany", "de", "Berlin", 52.5200, 13.4050),
    ("Spain", "es", "Madrid", 40.4168, -3.7038),
    ("Portugal", "pt", "Lisbon", 38.7223, -9.1393),
    ("Italy", "it", "Rome", 41.9028, 12.4964),
    ("Netherlands", "nl", "Amsterdam", 52.3676, 4.9041),
    ("Norway", "no", "Oslo", 59.9139, 10.7522),
    ("Sweden", "se", "Stockholm", 59.3293, 18.0686),
    ("Finland", "fi", "Helsinki", 60.1699, 24.9384),
    ("Georgia", "ge", "Tbilisi", 41.7151, 44.8271),
    ("India", "in", "New Delhi", 28.6139, 77.2090),
    ("China", "cn", "Beijing", 39.9042, 116.4074),
    ("Japan", "jp", "Tokyo", 35.6762, 139.6503),
    ("Australia", "au", "Canberra", -35.2809, 149.1300),
    ("New Zealand", "nz", "Wellington", -41.2865, 174.7762),
    ("Brazil", "br", "Brasilia", -15.7975, -47.8919),
    ("Argentina", "ar", "Buenos Aires", -34.6037, -58.3816),
    ("Peru", "pe", "Lima", -12.0464, -77.0428),
    ("Colombia", "co", "Bogota", 4.7110, -74.0721),
    ("Ecuador", "ec", "Quito", -0.1807, -78.4678),
    ("Costa Rica", "cr", "San Jose", 9.9281, -84.0907),
    ("South Africa", "za", "Pretoria", -25.7479, 28.2293),
    ("Kenya", "ke", "Nairobi", -1.2921, 36.8219),
    ("Egypt", "eg", "Cairo", 30.0444, 31.2357),
];
