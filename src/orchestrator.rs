//! Per-query pipeline: resolve the location, validate parameters, fetch
//! from the provider (with retries and, for multi-hotspot queries, fan-out),
//! then rank.
//!
//! Each query walks `ReceivedIntent -> LocationResolved -> DataFetched ->
//! Ranked -> Rendered -> Done`; any stage can end in `Failed`. Location
//! resolution is skipped when the request already carries coordinates.

use futures::future::join_all;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{BirdingError, ErrorKind, Result};
use crate::formatters::format_outcome;
use crate::gateway::{ObservationSource, Payload};
use crate::models::{
    Coordinate, Fetched, HotspotRecord, IntentKind, ObservationRecord, QueryIntent, RankedEntry,
    ResolvedPlace, TaxonomyEntry,
};
use crate::params::{ParameterNormalizer, RawParams};
use crate::ranking::{rank, GroupBy};
use crate::resolver::LocationResolver;
use crate::retry::{with_retry, QueryContext, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Intent(IntentKind),
    /// Most active hotspots, then recent observations at each, ranked by species
    TopSpeciesAcrossHotspots,
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Intent(kind) => kind.name(),
            Self::TopSpeciesAcrossHotspots => "top species across hotspots",
        }
    }
}

/// A query as received from the tool boundary, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub kind: QueryKind,
    /// Free-text place to resolve when no coordinates are given
    pub place: Option<String>,
    /// Country hint for place resolution
    pub country: Option<String>,
    pub params: RawParams,
    pub cap: Option<i64>,
}

impl QueryRequest {
    pub fn new(kind: QueryKind, params: RawParams) -> Self {
        Self {
            kind,
            place: None,
            country: None,
            params,
            cap: None,
        }
    }

    pub fn intent(kind: IntentKind, params: RawParams) -> Self {
        Self::new(QueryKind::Intent(kind), params)
    }

    pub fn at_place(mut self, place: impl Into<String>) -> Self {
        self.place = Some(place.into());
        self
    }

    pub fn with_cap(mut self, cap: i64) -> Self {
        self.cap = Some(cap);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    ReceivedIntent,
    LocationResolved,
    DataFetched,
    Ranked,
    Rendered,
    Done,
    Failed(ErrorKind),
}

/// How complete a successful result is. A result with omitted branches or
/// dropped records is a partial result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completeness {
    /// Fan-out branches attempted (0 for single-call queries)
    pub branches: usize,
    pub omitted_branches: usize,
    pub dropped_records: usize,
}

impl Completeness {
    pub fn is_partial(&self) -> bool {
        self.omitted_branches > 0 || self.dropped_records > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    Ranked {
        group_by: GroupBy,
        entries: Vec<RankedEntry>,
    },
    Taxonomy(Vec<TaxonomyEntry>),
    Forms(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub kind: QueryKind,
    pub place: Option<ResolvedPlace>,
    pub region_code: Option<String>,
    pub point: Option<Coordinate>,
    pub body: QueryBody,
    pub completeness: Completeness,
    pub stages: Vec<QueryStage>,
}

impl QueryOutcome {
    /// Ranked entries, empty for taxonomy queries.
    pub fn ranked(&self) -> &[RankedEntry] {
        match &self.body {
            QueryBody::Ranked { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Renders the text summary and completes the lifecycle.
    pub fn render(&mut self) -> String {
        let text = format_outcome(self);
        for stage in [QueryStage::Rendered, QueryStage::Done] {
            tracing::debug!(
                "{}: {:?} -> {:?}",
                self.kind.name(),
                self.stages.last().copied().unwrap_or(QueryStage::ReceivedIntent),
                stage
            );
            self.stages.push(stage);
        }
        text
    }
}

struct Lifecycle {
    label: &'static str,
    stages: Vec<QueryStage>,
}

impl Lifecycle {
    fn new(label: &'static str) -> Self {
        tracing::debug!("{}: {:?}", label, QueryStage::ReceivedIntent);
        Self {
            label,
            stages: vec![QueryStage::ReceivedIntent],
        }
    }

    fn advance(&mut self, stage: QueryStage) {
        tracing::debug!(
            "{}: {:?} -> {:?}",
            self.label,
            self.stages.last().copied().unwrap_or(QueryStage::ReceivedIntent),
            stage
        );
        self.stages.push(stage);
    }

    /// Logs the terminal failure; failed queries carry no outcome.
    fn fail(self, error: &BirdingError) {
        tracing::debug!(
            "{}: {:?} -> {:?}",
            self.label,
            self.stages.last().copied().unwrap_or(QueryStage::ReceivedIntent),
            QueryStage::Failed(error.kind())
        );
        tracing::warn!("{} failed: {}", self.label, error);
    }
}

pub struct Orchestrator {
    source: Arc<dyn ObservationSource>,
    resolver: Arc<LocationResolver>,
    normalizer: ParameterNormalizer,
    retry: RetryPolicy,
    fanout: usize,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        resolver: Arc<LocationResolver>,
        config: &Config,
    ) -> Self {
        Self {
            source,
            resolver,
            normalizer: ParameterNormalizer::new(config),
            retry: RetryPolicy::from_config(&config.retry),
            fanout: config.defaults.fanout,
        }
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    /// Runs the query through ranking and renders the text summary.
    pub async fn answer(&self, request: QueryRequest, ctx: &QueryContext) -> Result<String> {
        let mut outcome = self.run(request, ctx).await?;
        let text = outcome.render();
        tracing::info!(
            "Answered {} ({} entries{})",
            outcome.kind.name(),
            outcome.ranked().len(),
            if outcome.completeness.is_partial() {
                ", partial"
            } else {
                ""
            }
        );
        Ok(text)
    }

    /// Runs the query up to the ranked result; [`QueryOutcome::render`]
    /// finishes it.
    pub async fn run(&self, request: QueryRequest, ctx: &QueryContext) -> Result<QueryOutcome> {
        let mut lifecycle = Lifecycle::new(request.kind.name());
        match self.execute(request, ctx, &mut lifecycle).await {
            Ok(mut outcome) => {
                outcome.stages = lifecycle.stages;
                Ok(outcome)
            }
            Err(e) => {
                lifecycle.fail(&e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: QueryRequest,
        ctx: &QueryContext,
        lifecycle: &mut Lifecycle,
    ) -> Result<QueryOutcome> {
        let mut raw = request.params;
        let place = match request.place.as_deref() {
            Some(_) if raw.has_coordinates() => {
                return Err(BirdingError::invalid(
                    "place",
                    "give either a place name or coordinates, not both",
                ));
            }
            Some(text) => {
                if raw.region_code.is_some() || !accepts_point(request.kind) {
                    return Err(BirdingError::invalid(
                        "place",
                        "only coordinate-scoped queries accept a place name",
                    ));
                }
                let place = self
                    .resolver
                    .resolve(text, request.country.as_deref(), ctx)
                    .await?;
                raw.latitude = Some(place.coordinate.latitude());
                raw.longitude = Some(place.coordinate.longitude());
                lifecycle.advance(QueryStage::LocationResolved);
                Some(place)
            }
            None => None,
        };

        let cap = self.normalizer.cap(request.cap)?;
        let (body, completeness, region_code, point) = match request.kind {
            QueryKind::Intent(kind) => {
                let intent = self.normalizer.normalize(kind, &raw)?;
                let payload = self.fetch(&intent, ctx).await?;
                lifecycle.advance(QueryStage::DataFetched);
                let completeness = Completeness {
                    dropped_records: payload.dropped(),
                    ..Completeness::default()
                };
                (
                    rank_payload(payload, cap),
                    completeness,
                    intent.region_code().map(String::from),
                    intent.point(),
                )
            }
            QueryKind::TopSpeciesAcrossHotspots => {
                let hotspot_intent = if raw.region_code.is_some() {
                    self.normalizer.normalize(IntentKind::Hotspots, &raw)?
                } else {
                    self.normalizer.normalize(IntentKind::NearbyHotspots, &raw)?
                };
                let (records, completeness) = self.fan_out(&hotspot_intent, &raw, ctx).await?;
                lifecycle.advance(QueryStage::DataFetched);
                let body = QueryBody::Ranked {
                    group_by: GroupBy::Species,
                    entries: rank(&records, GroupBy::Species, cap),
                };
                (
                    body,
                    completeness,
                    hotspot_intent.region_code().map(String::from),
                    hotspot_intent.point(),
                )
            }
        };
        lifecycle.advance(QueryStage::Ranked);

        Ok(QueryOutcome {
            kind: request.kind,
            place,
            region_code,
            point,
            body,
            completeness,
            stages: Vec::new(),
        })
    }

    async fn fetch(&self, intent: &QueryIntent, ctx: &QueryContext) -> Result<Payload> {
        with_retry(&self.retry, ctx, intent.kind().name(), || {
            self.source.fetch(intent)
        })
        .await
    }

    /// Lists hotspots, then pulls recent observations at the most active
    /// ones concurrently. Failed branches are omitted; the query fails only
    /// when every branch does.
    async fn fan_out(
        &self,
        hotspot_intent: &QueryIntent,
        raw: &RawParams,
        ctx: &QueryContext,
    ) -> Result<(Vec<ObservationRecord>, Completeness)> {
        let hotspots = expect_hotspots(self.fetch(hotspot_intent, ctx).await?)?;
        let chosen = most_active(&hotspots.records, self.fanout);
        let mut completeness = Completeness {
            branches: chosen.len(),
            dropped_records: hotspots.dropped,
            ..Completeness::default()
        };
        if chosen.is_empty() {
            return Ok((Vec::new(), completeness));
        }

        let intents = chosen
            .iter()
            .map(|hotspot| {
                let branch = RawParams {
                    region_code: Some(hotspot.location_id.clone()),
                    back: raw.back,
                    max_results: raw.max_results,
                    include_provisional: raw.include_provisional,
                    hotspot: raw.hotspot,
                    detail: raw.detail.clone(),
                    ..RawParams::default()
                };
                self.normalizer
                    .normalize(IntentKind::RecentObservations, &branch)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Fanning out to {} hotspots", intents.len());
        let results = join_all(intents.iter().map(|intent| self.fetch(intent, ctx))).await;

        let mut records = Vec::new();
        let mut last_error = None;
        for (hotspot, result) in chosen.iter().zip(results) {
            match result {
                Ok(Payload::Observations(fetched)) => {
                    completeness.dropped_records += fetched.dropped;
                    records.extend(fetched.records);
                }
                Ok(_) => {
                    completeness.omitted_branches += 1;
                    last_error = Some(BirdingError::unavailable("unexpected payload"));
                }
                Err(BirdingError::Cancelled) => return Err(BirdingError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        "Omitting hotspot {} ({}): {}",
                        hotspot.location_name,
                        hotspot.location_id,
                        e
                    );
                    completeness.omitted_branches += 1;
                    last_error = Some(e);
                }
            }
        }

        if completeness.omitted_branches == completeness.branches {
            return Err(BirdingError::unavailable(format!(
                "all {} hotspot lookups failed; last error: {}",
                completeness.branches,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            )));
        }
        Ok((records, completeness))
    }
}

fn accepts_point(kind: QueryKind) -> bool {
    match kind {
        QueryKind::Intent(kind) => kind.needs_coordinate(),
        QueryKind::TopSpeciesAcrossHotspots => true,
    }
}

/// The `n` hotspots with the most activity, ties broken by name then id.
/// Hotspots sharing a name stay separate.
fn most_active(hotspots: &[HotspotRecord], n: usize) -> Vec<&HotspotRecord> {
    let mut sorted: Vec<&HotspotRecord> = hotspots.iter().collect();
    sorted.sort_by(|a, b| {
        b.recent_activity_count
            .cmp(&a.recent_activity_count)
            .then_with(|| a.location_name.cmp(&b.location_name))
            .then_with(|| a.location_id.cmp(&b.location_id))
    });
    sorted.truncate(n);
    sorted
}

fn expect_hotspots(payload: Payload) -> Result<Fetched<HotspotRecord>> {
    match payload {
        Payload::Hotspots(fetched) => Ok(fetched),
        _ => Err(BirdingError::unavailable("expected a hotspot listing")),
    }
}

fn rank_payload(payload: Payload, cap: usize) -> QueryBody {
    match payload {
        Payload::Observations(fetched) => QueryBody::Ranked {
            group_by: GroupBy::Species,
            entries: rank(&fetched.records, GroupBy::Species, cap),
        },
        Payload::Hotspots(fetched) => QueryBody::Ranked {
            group_by: GroupBy::Location,
            entries: rank(&fetched.records, GroupBy::Location, cap),
        },
        Payload::Taxonomy(fetched) => QueryBody::Taxonomy(fetched.records),
        Payload::Forms(fetched) => QueryBody::Forms(fetched.records),
    }
}
