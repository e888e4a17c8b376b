use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::{ApiKey, ProviderConfig};
use crate::constants::{EBIRD_TOKEN_HEADER, ERROR_DETAIL_LEN, USER_AGENT};
use crate::error::{BirdingError, Result};
use crate::models::{
    Coordinate, EbirdHotspot, EbirdObservation, EbirdTaxon, Fetched, HotspotRecord,
    ObservationParams, ObservationRecord, QueryIntent, TaxonomyEntry, TaxonomyParams,
};
use crate::rate_limit::RateLimiter;

/// Parsed provider response, in the provider's native order.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Observations(Fetched<ObservationRecord>),
    Hotspots(Fetched<HotspotRecord>),
    Taxonomy(Fetched<TaxonomyEntry>),
    Forms(Fetched<String>),
}

impl Payload {
    pub fn dropped(&self) -> usize {
        match self {
            Self::Observations(f) => f.dropped,
            Self::Hotspots(f) => f.dropped,
            Self::Taxonomy(f) => f.dropped,
            Self::Forms(f) => f.dropped,
        }
    }
}

/// Seam between the orchestrator and the observational-data provider.
/// Each call maps to exactly one provider request.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(&self, intent: &QueryIntent) -> Result<Payload>;
}

/// eBird API 2.0 client. Attaches the API key to every request and passes
/// each request through the shared rate limiter.
pub struct EbirdGateway {
    client: Arc<Client>,
    base_url: String,
    api_key: ApiKey,
    limiter: Arc<dyn RateLimiter>,
}

impl EbirdGateway {
    pub fn new(config: &ProviderConfig, limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BirdingError::Config {
                message: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            limiter,
        })
    }

    /// Makes an authenticated GET request and returns the JSON body
    async fn make_request(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .header(EBIRD_TOKEN_HEADER, self.api_key.expose())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(BirdingError::unavailable(format!(
                "{} returned HTTP {}",
                path, status
            )));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BirdingError::UpstreamRejected {
                status: status.as_u16(),
                detail: body.chars().take(ERROR_DETAIL_LEN).collect(),
            });
        }

        response.json::<serde_json::Value>().await.map_err(|e| {
            if e.is_timeout() {
                BirdingError::from(e)
            } else {
                BirdingError::unavailable(format!("malformed response from {}: {}", path, e))
            }
        })
    }

    async fn observations(
        &self,
        path: String,
        query: Vec<(&str, String)>,
        is_notable: bool,
    ) -> Result<Fetched<ObservationRecord>> {
        let body = self.make_request(&path, &query).await?;
        parse_records(body, "observation", |raw: EbirdObservation| {
            raw.into_record(is_notable)
        })
    }

    async fn hotspots(
        &self,
        path: String,
        query: Vec<(&str, String)>,
    ) -> Result<Fetched<HotspotRecord>> {
        let body = self.make_request(&path, &query).await?;
        parse_records(body, "hotspot", EbirdHotspot::into_record)
    }

    pub async fn recent_observations(
        &self,
        region_code: &str,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!("Getting recent observations for region: {}", region_code);
        let path = format!("/data/obs/{}/recent", region_code);
        self.observations(path, observation_query(params, true, true), false)
            .await
    }

    pub async fn notable_observations(
        &self,
        region_code: &str,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!("Getting notable observations for region: {}", region_code);
        let path = format!("/data/obs/{}/recent/notable", region_code);
        self.observations(path, observation_query(params, false, true), true)
            .await
    }

    pub async fn species_observations(
        &self,
        region_code: &str,
        species_code: &str,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!(
            "Getting observations of {} for region: {}",
            species_code,
            region_code
        );
        let path = format!("/data/obs/{}/recent/{}", region_code, species_code);
        self.observations(path, observation_query(params, true, false), false)
            .await
    }

    pub async fn nearby_observations(
        &self,
        point: Coordinate,
        radius_km: u32,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!(
            "Getting nearby observations for coordinates: {}, {}",
            point.latitude(),
            point.longitude()
        );
        let mut query = point_query(point, radius_km);
        query.extend(observation_query(params, true, false));
        self.observations("/data/obs/geo/recent".to_string(), query, false)
            .await
    }

    pub async fn nearby_notable(
        &self,
        point: Coordinate,
        radius_km: u32,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!(
            "Getting nearby notable observations for coordinates: {}, {}",
            point.latitude(),
            point.longitude()
        );
        let mut query = point_query(point, radius_km);
        query.extend(observation_query(params, false, true));
        self.observations("/data/obs/geo/recent/notable".to_string(), query, true)
            .await
    }

    pub async fn nearby_species(
        &self,
        point: Coordinate,
        species_code: &str,
        radius_km: u32,
        params: &ObservationParams,
    ) -> Result<Fetched<ObservationRecord>> {
        tracing::info!(
            "Getting nearby observations of {} for coordinates: {}, {}",
            species_code,
            point.latitude(),
            point.longitude()
        );
        let mut query = point_query(point, radius_km);
        query.extend(observation_query(params, true, false));
        let path = format!("/data/obs/geo/recent/{}", species_code);
        self.observations(path, query, false).await
    }

    pub async fn region_hotspots(
        &self,
        region_code: &str,
        back_days: u32,
    ) -> Result<Fetched<HotspotRecord>> {
        tracing::info!("Getting hotspots for region: {}", region_code);
        let query = vec![("back", back_days.to_string()), ("fmt", "json".to_string())];
        self.hotspots(format!("/ref/hotspot/{}", region_code), query)
            .await
    }

    pub async fn nearby_hotspots(
        &self,
        point: Coordinate,
        radius_km: u32,
        back_days: u32,
    ) -> Result<Fetched<HotspotRecord>> {
        tracing::info!(
            "Getting nearby hotspots for coordinates: {}, {}",
            point.latitude(),
            point.longitude()
        );
        let mut query = point_query(point, radius_km);
        query.push(("back", back_days.to_string()));
        query.push(("fmt", "json".to_string()));
        self.hotspots("/ref/hotspot/geo".to_string(), query).await
    }

    pub async fn taxonomy(&self, params: &TaxonomyParams) -> Result<Fetched<TaxonomyEntry>> {
        tracing::info!("Getting {} taxonomy", params.category.as_str());
        let mut query = vec![
            ("cat", params.category.as_str().to_string()),
            ("fmt", params.format.clone()),
            ("locale", params.locale.clone()),
        ];
        if !params.species.is_empty() {
            query.push(("species", params.species.join(",")));
        }
        let body = self.make_request("/ref/taxonomy/ebird", &query).await?;
        parse_records(body, "taxonomy", EbirdTaxon::into_entry)
    }

    pub async fn taxonomy_forms(&self, species_code: &str) -> Result<Fetched<String>> {
        tracing::info!("Getting taxonomic forms of {}", species_code);
        let body = self
            .make_request(&format!("/ref/taxon/forms/{}", species_code), &[])
            .await?;
        parse_records(body, "taxonomy form", |code: String| {
            Some(code).filter(|c| !c.trim().is_empty())
        })
    }
}

#[async_trait]
impl ObservationSource for EbirdGateway {
    async fn fetch(&self, intent: &QueryIntent) -> Result<Payload> {
        let payload = match intent {
            QueryIntent::RecentObservations {
                region_code,
                params,
            } => Payload::Observations(self.recent_observations(region_code, params).await?),
            QueryIntent::NotableObservations {
                region_code,
                params,
            } => Payload::Observations(self.notable_observations(region_code, params).await?),
            QueryIntent::SpeciesObservations {
                region_code,
                species_code,
                params,
            } => Payload::Observations(
                self.species_observations(region_code, species_code, params)
                    .await?,
            ),
            QueryIntent::NearbyObservations {
                point,
                radius_km,
                params,
            } => Payload::Observations(self.nearby_observations(*point, *radius_km, params).await?),
            QueryIntent::NearbyNotable {
                point,
                radius_km,
                params,
            } => Payload::Observations(self.nearby_notable(*point, *radius_km, params).await?),
            QueryIntent::NearbySpecies {
                point,
                species_code,
                radius_km,
                params,
            } => Payload::Observations(
                self.nearby_species(*point, species_code, *radius_km, params)
                    .await?,
            ),
            QueryIntent::Hotspots {
                region_code,
                back_days,
            } => Payload::Hotspots(self.region_hotspots(region_code, *back_days).await?),
            QueryIntent::NearbyHotspots {
                point,
                radius_km,
                back_days,
            } => Payload::Hotspots(self.nearby_hotspots(*point, *radius_km, *back_days).await?),
            QueryIntent::Taxonomy(params) => Payload::Taxonomy(self.taxonomy(params).await?),
            QueryIntent::TaxonomyForms { species_code } => {
                Payload::Forms(self.taxonomy_forms(species_code).await?)
            }
        };
        Ok(payload)
    }
}

fn point_query(point: Coordinate, radius_km: u32) -> Vec<(&'static str, String)> {
    vec![
        ("lat", point.latitude().to_string()),
        ("lng", point.longitude().to_string()),
        ("dist", radius_km.to_string()),
    ]
}

/// Common observation query parameters. Not every endpoint accepts
/// `includeProvisional` and `detail`, so those are opt-in.
fn observation_query(
    params: &ObservationParams,
    with_provisional: bool,
    with_detail: bool,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("back", params.back_days.to_string()),
        ("maxResults", params.max_results.to_string()),
        ("hotspot", params.hotspot_only.to_string()),
    ];
    if with_provisional {
        query.push(("includeProvisional", params.include_provisional.to_string()));
    }
    if with_detail {
        query.push(("detail", params.detail.as_str().to_string()));
    }
    query
}

/// Parses a JSON array item by item. Items that do not deserialize or that
/// `convert` rejects are dropped and counted instead of failing the batch.
fn parse_records<W, T, F>(body: serde_json::Value, label: &str, convert: F) -> Result<Fetched<T>>
where
    W: DeserializeOwned,
    F: Fn(W) -> Option<T>,
{
    let serde_json::Value::Array(items) = body else {
        return Err(BirdingError::unavailable(format!(
            "expected a JSON array of {} records",
            label
        )));
    };

    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<W>(item).ok().and_then(&convert))
        .collect();
    let dropped = total - records.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} malformed {} records of {}", dropped, label, total);
    }
    Ok(Fetched::new(records, dropped))
}
