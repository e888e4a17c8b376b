//! Nominatim / OpenStreetMap free-text geocoder.
//!
//! Consumed only by the location resolver. The public Nominatim instance
//! allows roughly one request per second, so every search first takes a
//! token from the injected [`RateLimiter`]. Resolved places are cached
//! upstream of this client.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{ERROR_DETAIL_LEN, USER_AGENT};
use crate::error::{BirdingError, Result};
use crate::models::Coordinate;
use crate::rate_limit::RateLimiter;

/// Whether a candidate is a point (city, landmark) or a whole
/// country/first-level region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    Point,
    Region,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeCandidate {
    /// Short name, e.g. "Seattle"
    pub name: String,
    /// Full provider label, e.g. "Seattle, King County, Washington, United States"
    pub display_name: String,
    pub coordinate: Coordinate,
    pub kind: PlaceKind,
    /// Lowercase ISO 3166-1 alpha-2 code, when known
    pub country_code: Option<String>,
    /// Provider confidence, higher is better
    pub confidence: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns candidates in provider order.
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>>;
}

pub struct NominatimGeocoder {
    client: Arc<Client>,
    base_url: String,
    limiter: Arc<dyn RateLimiter>,
}

impl NominatimGeocoder {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BirdingError::Config {
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>> {
        self.limiter.acquire().await;
        tracing::debug!("Geocoding '{}'", query);
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "5"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(BirdingError::unavailable(format!("geocoder returned HTTP {}", status)));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BirdingError::UpstreamRejected {
                status: status.as_u16(),
                detail: body.chars().take(ERROR_DETAIL_LEN).collect(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BirdingError::unavailable(format!("malformed geocoder response: {}", e)))?;
        parse_response(&body)
    }
}

/// Parses a Nominatim `jsonv2` search response.
fn parse_response(body: &serde_json::Value) -> Result<Vec<GeocodeCandidate>> {
    let results = body
        .as_array()
        .ok_or_else(|| BirdingError::unavailable("Nominatim response is not an array"))?;

    let mut candidates = Vec::with_capacity(results.len());
    for item in results {
        let lat = item["lat"].as_str().and_then(|s| s.parse::<f64>().ok());
        let lon = item["lon"].as_str().and_then(|s| s.parse::<f64>().ok());
        let coordinate = match (lat, lon) {
            (Some(lat), Some(lon)) => match Coordinate::new(lat, lon) {
                Ok(c) => c,
                Err(_) => continue,
            },
            _ => {
                tracing::warn!("Skipping geocoder result without coordinates");
                continue;
            }
        };

        let display_name = item["display_name"].as_str().unwrap_or_default().to_string();
        let name = item["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| {
                display_name
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            });

        candidates.push(GeocodeCandidate {
            name,
            display_name,
            coordinate,
            kind: place_kind(item),
            country_code: item["address"]["country_code"]
                .as_str()
                .map(str::to_lowercase),
            confidence: item["importance"].as_f64().unwrap_or(0.0),
        });
    }
    Ok(candidates)
}

fn place_kind(item: &serde_json::Value) -> PlaceKind {
    const REGION_TYPES: [&str; 5] = ["country", "state", "province", "region", "territory"];
    let region_by_rank = item["place_rank"].as_u64().is_some_and(|rank| rank <= 8);
    let region_by_type = item["addresstype"]
        .as_str()
        .is_some_and(|t| REGION_TYPES.contains(&t));
    if region_by_rank || region_by_type {
        PlaceKind::Region
    } else {
        PlaceKind::Point
    }
}
