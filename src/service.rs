use anyhow::Result;
use rmcp::{
    handler::server::{wrapper::Parameters, ServerHandler, tool::ToolRouter},
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    ErrorData as McpError,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::formatters::format_place;
use crate::gateway::EbirdGateway;
use crate::geocoder::NominatimGeocoder;
use crate::models::{
    HotspotsRequest, IntentKind, NearbyHotspotsRequest, NearbyObservationsRequest,
    NearbySpeciesRequest, RegionObservationsRequest, ResolveLocationRequest,
    SpeciesObservationsRequest, TaxonomyFormsRequest, TaxonomyRequest, TopSpeciesRequest,
};
use crate::orchestrator::{Orchestrator, QueryKind, QueryRequest};
use crate::params::RawParams;
use crate::rate_limit::TokenBucket;
use crate::resolver::{CapitalTable, LocationResolver};
use crate::retry::{QueryContext, RetryPolicy};

/// Birding service that answers MCP tool calls through the query pipeline
#[derive(Clone)]
pub struct BirdingService {
    orchestrator: Arc<Orchestrator>,
    query_timeout: Duration,
    tool_router: ToolRouter<Self>,
}

impl BirdingService {
    /// Wires the eBird gateway, geocoder and resolver from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let limiter = Arc::new(TokenBucket::from_config(&config.rate_limit));
        let gateway = EbirdGateway::new(&config.provider, limiter)?;
        let geocoder = NominatimGeocoder::new(
            &config.geocoder.base_url,
            config.request_timeout(),
            Arc::new(TokenBucket::from_config(&config.geocoder.rate_limit)),
        )?;
        let resolver = LocationResolver::new(
            Arc::new(geocoder),
            Arc::new(CapitalTable::builtin()),
            &config.geocoder,
        )
        .with_retry_policy(RetryPolicy::from_config(&config.retry));
        let orchestrator = Orchestrator::new(Arc::new(gateway), Arc::new(resolver), config);
        Ok(Self::with_orchestrator(orchestrator, config.query_timeout()))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator, query_timeout: Duration) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            query_timeout,
            tool_router: Self::tool_router(),
        }
    }

    /// Runs one query under a fresh deadline and wraps the summary
    async fn answer(&self, request: QueryRequest) -> Result<CallToolResult, McpError> {
        let ctx = QueryContext::with_timeout(self.query_timeout);
        let text = self.orchestrator.answer(request, &ctx).await?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for BirdingService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-rust-birding".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                title: None,
                website_url: None,
            },
            instructions: Some(
                "A birding assistant powered by the eBird API. Summarizes recent and notable \
                sightings, hotspots and taxonomy for a region, a coordinate or a named place."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl BirdingService {
    #[tool(description = "Top species recently observed in an eBird region. Provide a region code such as 'US-MA' (Massachusetts) or 'GB' (United Kingdom).")]
    async fn recent_observations(
        &self,
        Parameters(request): Parameters<RegionObservationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting recent observations for region: {}", request.region_code);
        self.answer(region_query(IntentKind::RecentObservations, request)).await
    }

    #[tool(description = "Notable (rare or unusual) species recently observed in an eBird region, e.g. 'US-NY'.")]
    async fn notable_observations(
        &self,
        Parameters(request): Parameters<RegionObservationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting notable observations for region: {}", request.region_code);
        self.answer(region_query(IntentKind::NotableObservations, request)).await
    }

    #[tool(description = "Recent sightings of one species in an eBird region. Provide a region code and an eBird species code (e.g. 'baleag' for Bald Eagle).")]
    async fn species_observations(
        &self,
        Parameters(request): Parameters<SpeciesObservationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            "Getting {} observations for region: {}",
            request.species_code,
            request.region_code
        );
        self.answer(species_query(request)).await
    }

    #[tool(description = "Top species recently observed near a location. Provide latitude and longitude, or a place name such as 'Seattle' or 'Alaska' (regions resolve to their capital).")]
    async fn nearby_observations(
        &self,
        Parameters(request): Parameters<NearbyObservationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting nearby observations");
        self.answer(nearby_query(IntentKind::NearbyObservations, request)).await
    }

    #[tool(description = "Notable species recently observed near a location. Provide latitude and longitude, or a place name.")]
    async fn nearby_notable_observations(
        &self,
        Parameters(request): Parameters<NearbyObservationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting nearby notable observations");
        self.answer(nearby_query(IntentKind::NearbyNotable, request)).await
    }

    #[tool(description = "Recent sightings of one species near a location. Provide an eBird species code plus latitude and longitude or a place name.")]
    async fn nearby_species_observations(
        &self,
        Parameters(request): Parameters<NearbySpeciesRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting nearby observations of {}", request.species_code);
        self.answer(nearby_species_query(request)).await
    }

    #[tool(description = "Most active birding hotspots in an eBird region, e.g. 'US-CA'.")]
    async fn list_hotspots(
        &self,
        Parameters(request): Parameters<HotspotsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Listing hotspots for region: {}", request.region_code);
        self.answer(hotspots_query(request)).await
    }

    #[tool(description = "Most active birding hotspots near a location. Provide latitude and longitude, or a place name.")]
    async fn nearby_hotspots(
        &self,
        Parameters(request): Parameters<NearbyHotspotsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Listing nearby hotspots");
        self.answer(nearby_hotspots_query(request)).await
    }

    #[tool(description = "Look up the eBird taxonomy, optionally narrowed to a category (species, slash, issf, spuh, hybrid, domestic, form, intergrade) or a list of species codes.")]
    async fn taxonomy(
        &self,
        Parameters(request): Parameters<TaxonomyRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting taxonomy");
        self.answer(taxonomy_query(request)).await
    }

    #[tool(description = "List the subspecies and forms eBird recognizes for a species code.")]
    async fn taxonomy_forms(
        &self,
        Parameters(request): Parameters<TaxonomyFormsRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting taxonomic forms for: {}", request.species_code);
        self.answer(forms_query(request)).await
    }

    #[tool(description = "Top species across the most active hotspots of a region (region code) or near a location (latitude/longitude or place name).")]
    async fn top_species_across_hotspots(
        &self,
        Parameters(request): Parameters<TopSpeciesRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting top species across hotspots");
        self.answer(top_species_query(request)).await
    }

    #[tool(description = "Resolve a free-text place name to coordinates. Countries and states resolve to their capital city.")]
    async fn resolve_location(
        &self,
        Parameters(request): Parameters<ResolveLocationRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Resolving location: {}", request.place);
        let ctx = QueryContext::with_timeout(self.query_timeout);
        let place = self
            .orchestrator
            .resolver()
            .resolve(&request.place, request.country.as_deref(), &ctx)
            .await?;
        Ok(CallToolResult::success(vec![Content::text(format_place(&place))]))
    }
}

fn located(
    mut query: QueryRequest,
    place: Option<String>,
    country: Option<String>,
) -> QueryRequest {
    query.place = place;
    query.country = country;
    query
}

fn region_query(kind: IntentKind, request: RegionObservationsRequest) -> QueryRequest {
    let params = RawParams {
        region_code: Some(request.region_code),
        back: request.back,
        max_results: request.max_results,
        include_provisional: request.include_provisional,
        hotspot: request.hotspot,
        detail: request.detail,
        ..RawParams::default()
    };
    QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(kind, params)
    }
}

fn species_query(request: SpeciesObservationsRequest) -> QueryRequest {
    let params = RawParams {
        region_code: Some(request.region_code),
        species_code: Some(request.species_code),
        back: request.back,
        max_results: request.max_results,
        include_provisional: request.include_provisional,
        hotspot: request.hotspot,
        ..RawParams::default()
    };
    QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(IntentKind::SpeciesObservations, params)
    }
}

fn nearby_query(kind: IntentKind, request: NearbyObservationsRequest) -> QueryRequest {
    let params = RawParams {
        latitude: request.latitude,
        longitude: request.longitude,
        dist: request.dist,
        back: request.back,
        max_results: request.max_results,
        include_provisional: request.include_provisional,
        hotspot: request.hotspot,
        detail: request.detail,
        ..RawParams::default()
    };
    let query = QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(kind, params)
    };
    located(query, request.place, request.country)
}

fn nearby_species_query(request: NearbySpeciesRequest) -> QueryRequest {
    let params = RawParams {
        species_code: Some(request.species_code),
        latitude: request.latitude,
        longitude: request.longitude,
        dist: request.dist,
        back: request.back,
        max_results: request.max_results,
        include_provisional: request.include_provisional,
        hotspot: request.hotspot,
        ..RawParams::default()
    };
    let query = QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(IntentKind::NearbySpecies, params)
    };
    located(query, request.place, request.country)
}

fn hotspots_query(request: HotspotsRequest) -> QueryRequest {
    let params = RawParams {
        region_code: Some(request.region_code),
        back: request.back,
        ..RawParams::default()
    };
    QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(IntentKind::Hotspots, params)
    }
}

fn nearby_hotspots_query(request: NearbyHotspotsRequest) -> QueryRequest {
    let params = RawParams {
        latitude: request.latitude,
        longitude: request.longitude,
        dist: request.dist,
        back: request.back,
        ..RawParams::default()
    };
    let query = QueryRequest {
        cap: request.cap,
        ..QueryRequest::intent(IntentKind::NearbyHotspots, params)
    };
    located(query, request.place, request.country)
}

fn taxonomy_query(request: TaxonomyRequest) -> QueryRequest {
    let params = RawParams {
        category: request.category,
        format: request.format,
        locale: request.locale,
        species: request.species.unwrap_or_default(),
        ..RawParams::default()
    };
    QueryRequest::intent(IntentKind::Taxonomy, params)
}

fn forms_query(request: TaxonomyFormsRequest) -> QueryRequest {
    let params = RawParams {
        species_code: Some(request.species_code),
        ..RawParams::default()
    };
    QueryRequest::intent(IntentKind::TaxonomyForms, params)
}

fn top_species_query(request: TopSpeciesRequest) -> QueryRequest {
    let params = RawParams {
        region_code: request.region_code,
        latitude: request.latitude,
        longitude: request.longitude,
        dist: request.dist,
        back: request.back,
        ..RawParams::default()
    };
    let query = QueryRequest {
        cap: request.cap,
        ..QueryRequest::new(QueryKind::TopSpeciesAcrossHotspots, params)
    };
    located(query, request.place, request.country)
}
