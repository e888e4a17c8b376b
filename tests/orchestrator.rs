use async_trait::async_trait;
use mcp_birding_server::config::{ApiKey, Config};
use mcp_birding_server::gateway::{ObservationSource, Payload};
use mcp_birding_server::geocoder::{GeocodeCandidate, Geocoder, PlaceKind};
use mcp_birding_server::models::{
    Coordinate, Fetched, HotspotRecord, IntentKind, ObservationRecord, QueryIntent,
};
use mcp_birding_server::orchestrator::{Orchestrator, QueryKind, QueryRequest, QueryStage};
use mcp_birding_server::params::RawParams;
use mcp_birding_server::resolver::{CapitalTable, LocationResolver};
use mcp_birding_server::retry::QueryContext;
use mcp_birding_server::{BirdingError, ErrorKind, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
enum Reply {
    Now(Result<Payload>),
    Hang,
}

/// Scripted provider. Replies are queued per intent key; the last reply
/// repeats once the queue is down to one.
#[derive(Default)]
struct ScriptedSource {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<QueryIntent>>,
}

impl ScriptedSource {
    fn reply(self, key: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    fn ok(self, key: &str, payload: Payload) -> Self {
        self.reply(key, Reply::Now(Ok(payload)))
    }

    fn err(self, key: &str, error: BirdingError) -> Self {
        self.reply(key, Reply::Now(Err(error)))
    }

    fn calls_to(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|intent| key_of(intent) == key)
            .count()
    }

    fn last_call(&self) -> Option<QueryIntent> {
        self.calls.lock().unwrap().last().cloned()
    }
}

fn key_of(intent: &QueryIntent) -> String {
    match intent {
        QueryIntent::Hotspots { region_code, .. } => format!("hotspots:{}", region_code),
        QueryIntent::NearbyHotspots { .. } => "nearby-hotspots".to_string(),
        QueryIntent::NearbyObservations { .. } => "nearby".to_string(),
        other => match other.region_code() {
            Some(region) => format!("{}:{}", other.kind().name(), region),
            None => other.kind().name().to_string(),
        },
    }
}

#[async_trait]
impl ObservationSource for ScriptedSource {
    async fn fetch(&self, intent: &QueryIntent) -> Result<Payload> {
        self.calls.lock().unwrap().push(intent.clone());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            let queue = replies
                .get_mut(&key_of(intent))
                .unwrap_or_else(|| panic!("no reply scripted for {}", key_of(intent)));
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        };
        match reply {
            Reply::Now(result) => result,
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct FakeGeocoder {
    answers: HashMap<String, Vec<GeocodeCandidate>>,
}

impl FakeGeocoder {
    fn answer(mut self, query: &str, candidates: Vec<GeocodeCandidate>) -> Self {
        self.answers.insert(query.to_string(), candidates);
        self
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>> {
        Ok(self.answers.get(query).cloned().unwrap_or_default())
    }
}

/// Answers with a 503 on the first search, then normally.
struct FlakyGeocoder {
    calls: AtomicUsize,
    inner: FakeGeocoder,
}

#[async_trait]
impl Geocoder for FlakyGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(BirdingError::unavailable("geocoder returned HTTP 503"));
        }
        self.inner.search(query).await
    }
}

fn place(name: &str, kind: PlaceKind, lat: f64, lon: f64, cc: &str) -> GeocodeCandidate {
    GeocodeCandidate {
        name: name.to_string(),
        display_name: format!("{}, {}", name, cc.to_uppercase()),
        coordinate: Coordinate::new(lat, lon).unwrap(),
        kind,
        country_code: Some(cc.to_string()),
        confidence: 0.8,
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.provider.api_key = ApiKey::new("test-key");
    config
}

fn orchestrator(source: Arc<ScriptedSource>, geocoder: impl Geocoder + 'static) -> Orchestrator {
    let config = config();
    let resolver = LocationResolver::new(
        Arc::new(geocoder),
        Arc::new(CapitalTable::builtin()),
        &config.geocoder,
    );
    Orchestrator::new(source, Arc::new(resolver), &config)
}

fn sighting(species: &str, location_id: &str, count: Option<u32>) -> ObservationRecord {
    ObservationRecord {
        species_name: species.to_string(),
        species_code: species.to_lowercase().replace(' ', ""),
        scientific_name: None,
        location_name: format!("Hotspot {}", location_id),
        location_id: location_id.to_string(),
        count,
        observed_at: "2026-10-18 07:45".to_string(),
        coordinate: Coordinate::new(47.6, -122.3).unwrap(),
        is_notable: false,
    }
}

fn hotspot(location_id: &str, activity: u32) -> HotspotRecord {
    HotspotRecord {
        location_id: location_id.to_string(),
        location_name: format!("Hotspot {}", location_id),
        coordinate: Coordinate::new(47.6, -122.3).unwrap(),
        recent_activity_count: activity,
        latest_observed_at: None,
    }
}

fn observations(records: Vec<ObservationRecord>) -> Payload {
    Payload::Observations(Fetched::new(records, 0))
}

fn hotspots(records: Vec<HotspotRecord>) -> Payload {
    Payload::Hotspots(Fetched::new(records, 0))
}

fn timeout() -> BirdingError {
    BirdingError::UpstreamTimeout {
        detail: "operation timed out".to_string(),
    }
}

#[tokio::test]
async fn empty_nearby_hotspots_is_an_empty_success() {
    let source = Arc::new(ScriptedSource::default().ok("nearby-hotspots", hotspots(vec![])));
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let mut params = RawParams::point(47.6062, -122.3321);
    params.dist = Some(25);
    let request = QueryRequest::intent(IntentKind::NearbyHotspots, params);

    let outcome = orchestrator
        .run(request.clone(), &QueryContext::new())
        .await
        .unwrap();
    assert!(outcome.ranked().is_empty());
    assert!(!outcome.completeness.is_partial());
    assert_eq!(
        outcome.stages,
        vec![
            QueryStage::ReceivedIntent,
            QueryStage::DataFetched,
            QueryStage::Ranked
        ]
    );

    let text = orchestrator.answer(request, &QueryContext::new()).await.unwrap();
    assert!(text.contains("No hotspots found."));
}

#[tokio::test]
async fn rendering_completes_the_lifecycle() {
    let source = Arc::new(ScriptedSource::default().ok(
        "recent observations:US-MA",
        observations(vec![sighting("Blue Jay", "L1", Some(4))]),
    ));
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let mut outcome = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();
    let text = outcome.render();

    assert!(text.contains("1. Blue Jay - 4"));
    assert_eq!(
        outcome.stages,
        vec![
            QueryStage::ReceivedIntent,
            QueryStage::DataFetched,
            QueryStage::Ranked,
            QueryStage::Rendered,
            QueryStage::Done
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_with_backoff() {
    let source = Arc::new(
        ScriptedSource::default()
            .err("recent observations:US-MA", timeout())
            .err("recent observations:US-MA", timeout())
            .ok(
                "recent observations:US-MA",
                observations(vec![sighting("Blue Jay", "L1", Some(4))]),
            ),
    );
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let started = Instant::now();
    let outcome = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(source.calls_to("recent observations:US-MA"), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
    assert_eq!(outcome.ranked()[0].label, "Blue Jay");
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_the_budget() {
    let source =
        Arc::new(ScriptedSource::default().err("recent observations:US-MA", timeout()));
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let err = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &QueryContext::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    assert_eq!(source.calls_to("recent observations:US-MA"), 3);
}

#[tokio::test]
async fn rejections_are_not_retried() {
    let source = Arc::new(ScriptedSource::default().err(
        "recent observations:XX-ZZ",
        BirdingError::UpstreamRejected {
            status: 400,
            detail: "regionCode is invalid".to_string(),
        },
    ));
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let err = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("XX-ZZ")),
            &QueryContext::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamRejected);
    assert_eq!(source.calls_to("recent observations:XX-ZZ"), 1);
}

#[tokio::test]
async fn us_ma_summary_is_capped_at_fifteen() {
    let records = (1..=20)
        .map(|i| sighting(&format!("Species {:02}", i), "L207391", Some(i)))
        .collect();
    let source = Arc::new(
        ScriptedSource::default().ok("recent observations:US-MA", observations(records)),
    );
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let outcome = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();

    let ranked = outcome.ranked();
    assert_eq!(ranked.len(), 15);
    assert_eq!(ranked[0].label, "Species 20");
    assert_eq!(ranked[14].label, "Species 06");
    assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(outcome.region_code.as_deref(), Some("US-MA"));
}

#[tokio::test(start_paused = true)]
async fn failed_fan_out_branch_yields_a_partial_result() {
    let source = Arc::new(
        ScriptedSource::default()
            .ok(
                "hotspots:US-WA",
                hotspots(vec![hotspot("L1", 300), hotspot("L2", 250), hotspot("L3", 200)]),
            )
            .ok(
                "recent observations:L1",
                observations(vec![sighting("Mallard", "L1", Some(10))]),
            )
            .err("recent observations:L2", BirdingError::unavailable("HTTP 503"))
            .ok(
                "recent observations:L3",
                observations(vec![
                    sighting("Mallard", "L3", Some(5)),
                    sighting("Bufflehead", "L3", Some(7)),
                ]),
            ),
    );
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let outcome = orchestrator
        .run(
            QueryRequest::new(QueryKind::TopSpeciesAcrossHotspots, RawParams::region("US-WA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.completeness.branches, 3);
    assert_eq!(outcome.completeness.omitted_branches, 1);
    assert!(outcome.completeness.is_partial());
    let ranked = outcome.ranked();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].label, "Mallard");
    assert_eq!(ranked[0].score, 15);
    assert_eq!(ranked[0].supporting_location, "Hotspot L1");
    assert_eq!(ranked[1].label, "Bufflehead");
    // the failing branch was retried before being omitted
    assert_eq!(source.calls_to("recent observations:L2"), 3);
}

#[tokio::test(start_paused = true)]
async fn fan_out_fails_when_every_branch_fails() {
    let source = Arc::new(
        ScriptedSource::default()
            .ok("hotspots:US-WA", hotspots(vec![hotspot("L1", 300), hotspot("L2", 250)]))
            .err("recent observations:L1", BirdingError::unavailable("HTTP 502"))
            .err("recent observations:L2", timeout()),
    );
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let err = orchestrator
        .run(
            QueryRequest::new(QueryKind::TopSpeciesAcrossHotspots, RawParams::region("US-WA")),
            &QueryContext::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
}

#[tokio::test]
async fn fan_out_only_queries_the_most_active_hotspots() {
    let listing = (1..=8).map(|i| hotspot(&format!("L{}", i), i * 10)).collect();
    let mut source = ScriptedSource::default().ok("hotspots:US-WA", hotspots(listing));
    for i in 1..=8 {
        let id = format!("L{}", i);
        source = source.ok(
            &format!("recent observations:{}", id),
            observations(vec![sighting("Bushtit", &id, Some(1))]),
        );
    }
    let source = Arc::new(source);
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let outcome = orchestrator
        .run(
            QueryRequest::new(QueryKind::TopSpeciesAcrossHotspots, RawParams::region("US-WA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.completeness.branches, 5);
    assert_eq!(outcome.ranked()[0].score, 5);
    assert_eq!(source.calls_to("recent observations:L8"), 1);
    assert_eq!(source.calls_to("recent observations:L3"), 0);
}

#[tokio::test]
async fn hotspots_sharing_a_name_are_separate_branches() {
    let mut l1 = hotspot("L1", 100);
    l1.location_name = "City Park".to_string();
    let mut l2 = hotspot("L2", 90);
    l2.location_name = "City Park".to_string();
    let mut l3 = hotspot("L3", 10);
    l3.location_name = "Marsh".to_string();
    let source = Arc::new(
        ScriptedSource::default()
            .ok("hotspots:US-WA", hotspots(vec![l3, l2, l1]))
            .ok(
                "recent observations:L1",
                observations(vec![sighting("Mallard", "L1", Some(3))]),
            )
            .ok(
                "recent observations:L2",
                observations(vec![sighting("Mallard", "L2", Some(4))]),
            )
            .ok(
                "recent observations:L3",
                observations(vec![sighting("Sora", "L3", Some(1))]),
            ),
    );
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let outcome = orchestrator
        .run(
            QueryRequest::new(QueryKind::TopSpeciesAcrossHotspots, RawParams::region("US-WA")),
            &QueryContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.completeness.branches, 3);
    assert_eq!(source.calls_to("recent observations:L1"), 1);
    assert_eq!(source.calls_to("recent observations:L2"), 1);
    assert_eq!(source.calls_to("recent observations:L3"), 1);
    assert_eq!(outcome.ranked()[0].label, "Mallard");
    assert_eq!(outcome.ranked()[0].score, 7);
}

#[tokio::test(start_paused = true)]
async fn geocoder_outages_are_retried() {
    let source = Arc::new(ScriptedSource::default().ok(
        "nearby",
        observations(vec![sighting("Steller's Jay", "L5", Some(1))]),
    ));
    let geocoder = FlakyGeocoder {
        calls: AtomicUsize::new(0),
        inner: FakeGeocoder::default().answer(
            "Seattle",
            vec![place("Seattle", PlaceKind::Point, 47.60621, -122.33207, "us")],
        ),
    };
    let orchestrator = orchestrator(source.clone(), geocoder);

    let request =
        QueryRequest::intent(IntentKind::NearbyObservations, RawParams::default()).at_place("Seattle");
    let outcome = orchestrator.run(request, &QueryContext::new()).await.unwrap();

    assert_eq!(outcome.place.unwrap().matched_name, "Seattle, US");
    assert_eq!(source.calls_to("nearby"), 1);
}

#[tokio::test]
async fn place_names_are_resolved_before_fetching() {
    let source = Arc::new(ScriptedSource::default().ok(
        "nearby",
        observations(vec![sighting("Anna's Hummingbird", "L5", Some(2))]),
    ));
    let geocoder = FakeGeocoder::default().answer(
        "Seattle",
        vec![place("Seattle", PlaceKind::Point, 47.60621, -122.33207, "us")],
    );
    let orchestrator = orchestrator(source.clone(), geocoder);

    let request =
        QueryRequest::intent(IntentKind::NearbyObservations, RawParams::default()).at_place("Seattle");
    let outcome = orchestrator.run(request, &QueryContext::new()).await.unwrap();

    assert_eq!(
        outcome.stages,
        vec![
            QueryStage::ReceivedIntent,
            QueryStage::LocationResolved,
            QueryStage::DataFetched,
            QueryStage::Ranked
        ]
    );
    let point = outcome.point.unwrap();
    assert_eq!(point.latitude(), 47.6062);
    assert_eq!(point.longitude(), -122.3321);
    match source.last_call() {
        Some(QueryIntent::NearbyObservations { radius_km, .. }) => assert_eq!(radius_km, 25),
        other => panic!("unexpected call: {:?}", other),
    }
}

#[tokio::test]
async fn regions_resolve_to_their_capital() {
    let source = Arc::new(ScriptedSource::default().ok("nearby", observations(vec![])));
    let geocoder = FakeGeocoder::default().answer(
        "Alaska",
        vec![place("Alaska", PlaceKind::Region, 64.4459, -149.6809, "us")],
    );
    let orchestrator = orchestrator(source, geocoder);

    let request =
        QueryRequest::intent(IntentKind::NearbyObservations, RawParams::default()).at_place("Alaska");
    let text = orchestrator.answer(request, &QueryContext::new()).await.unwrap();

    assert!(text.contains("Juneau, Alaska"));
    assert!(text.contains("58.3019, -134.4197"));
    assert!(text.contains("No observations found."));
}

#[tokio::test]
async fn unknown_places_are_reported_verbatim() {
    let source = Arc::new(ScriptedSource::default());
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let request =
        QueryRequest::intent(IntentKind::NearbyHotspots, RawParams::default()).at_place("Atlantis");
    let err = orchestrator
        .run(request, &QueryContext::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BirdingError::LocationNotFound {
            query: "Atlantis".to_string()
        }
    );
    assert!(source.last_call().is_none());
}

#[tokio::test]
async fn region_queries_reject_place_names() {
    let source = Arc::new(ScriptedSource::default());
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let request = QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA"))
        .at_place("Boston");
    let err = orchestrator
        .run(request, &QueryContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BirdingError::InvalidParameter { ref field, .. } if field == "place"));
}

#[tokio::test]
async fn place_and_coordinates_together_are_rejected() {
    let source = Arc::new(ScriptedSource::default());
    let geocoder = FakeGeocoder::default().answer(
        "Seattle",
        vec![place("Seattle", PlaceKind::Point, 47.60621, -122.33207, "us")],
    );
    let orchestrator = orchestrator(source.clone(), geocoder);

    let request =
        QueryRequest::intent(IntentKind::NearbyObservations, RawParams::point(40.7128, -74.006))
            .at_place("Seattle");
    let err = orchestrator
        .run(request, &QueryContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BirdingError::InvalidParameter { ref field, .. } if field == "place"));
    assert!(source.last_call().is_none());
}

#[tokio::test]
async fn invalid_parameters_never_reach_the_provider() {
    let source = Arc::new(ScriptedSource::default());
    let orchestrator = orchestrator(source.clone(), FakeGeocoder::default());

    let mut params = RawParams::region("US-MA");
    params.back = Some(45);
    let err = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, params),
            &QueryContext::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert!(source.last_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_an_in_flight_call() {
    let source = Arc::new(ScriptedSource::default().reply("recent observations:US-MA", Reply::Hang));
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let ctx = QueryContext::new();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let err = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &ctx,
        )
        .await
        .unwrap_err();

    assert_eq!(err, BirdingError::Cancelled);
    assert_eq!(started.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn deadline_ends_the_query_as_a_timeout() {
    let source = Arc::new(ScriptedSource::default().reply("recent observations:US-MA", Reply::Hang));
    let orchestrator = orchestrator(source, FakeGeocoder::default());

    let err = orchestrator
        .run(
            QueryRequest::intent(IntentKind::RecentObservations, RawParams::region("US-MA")),
            &QueryContext::with_timeout(Duration::from_secs(3)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
}
