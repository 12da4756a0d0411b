use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use featured::app::{build_router, AppState, PER_IP_BURST, PER_IP_LIMIT};
use featured::filters::{FilterResolver, FilterSelection, NormalizedQuery};
use featured::models::{DiscoveryPage, Genre, Movie, MovieId, Provider};
use featured::preferences::Preferences;
use featured::randomiser::Randomiser;
use featured::tmdb::{
    CatalogApi, CatalogError, CatalogResult, MovieListEndpoint, Taxonomy, TaxonomyKind,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use tower::util::ServiceExt;

const MOVIES_PER_PAGE: i32 = 3;

#[derive(Default)]
struct FakeCatalog {
    /// `None` makes the page-count lookup fail.
    total_pages: Option<u32>,
    failing_pages: HashSet<u32>,
    failing_details: HashSet<MovieId>,
    total_queries: Mutex<Vec<NormalizedQuery>>,
    discover_calls: Mutex<Vec<(NormalizedQuery, u32)>>,
    detail_calls: Mutex<Vec<MovieId>>,
}

impl FakeCatalog {
    fn with_pages(total_pages: u32) -> Self {
        Self {
            total_pages: Some(total_pages),
            ..Self::default()
        }
    }

    fn discovered_pages(&self) -> Vec<u32> {
        self.discover_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, page)| *page)
            .collect()
    }

    fn detail_count(&self) -> usize {
        self.detail_calls.lock().unwrap().len()
    }
}

fn movie(id: MovieId) -> Movie {
    serde_json::from_value(json!({
        "id": id,
        "title": format!("Movie {id}"),
        "overview": "",
        "vote_average": 7.25,
        "vote_count": 1200,
        "runtime": 104,
        "release_date": "1999-03-31",
        "genres": [{ "id": 28, "name": "Action" }],
    }))
    .unwrap()
}

fn page_of(page: u32) -> DiscoveryPage {
    let first = page as i32 * 100;
    DiscoveryPage {
        page,
        results: (1..=MOVIES_PER_PAGE).map(|i| movie(first + i)).collect(),
        total_pages: Some(page),
    }
}

fn page_of_movie(id: MovieId) -> u32 {
    (id / 100) as u32
}

#[async_trait::async_trait]
impl CatalogApi for FakeCatalog {
    async fn fetch_total_pages(&self, query: &NormalizedQuery) -> CatalogResult<u32> {
        self.total_queries.lock().unwrap().push(query.clone());
        self.total_pages
            .ok_or_else(|| CatalogError::Network("connection refused".to_string()))
    }

    async fn discover_page(
        &self,
        query: &NormalizedQuery,
        page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        self.discover_calls
            .lock()
            .unwrap()
            .push((query.clone(), page));
        if self.failing_pages.contains(&page) {
            return Err(CatalogError::InvalidResponse { status: 500 });
        }
        Ok(page_of(page))
    }

    async fn fetch_movie_detail(&self, id: MovieId) -> CatalogResult<Movie> {
        self.detail_calls.lock().unwrap().push(id);
        if self.failing_details.contains(&id) {
            return Err(CatalogError::InvalidResponse { status: 404 });
        }
        Ok(movie(id))
    }

    async fn fetch_taxonomy(&self, kind: TaxonomyKind) -> CatalogResult<Taxonomy> {
        match kind {
            TaxonomyKind::Genres => Ok(Taxonomy::Genres(vec![Genre {
                id: 28,
                name: "Action".to_string(),
            }])),
            _ => Err(CatalogError::NoData),
        }
    }

    async fn fetch_movie_providers(&self, _id: MovieId) -> CatalogResult<Vec<Provider>> {
        Ok(vec![Provider {
            provider_id: 8,
            provider_name: "Netflix".to_string(),
            logo_path: None,
            display_priority: Some(1),
        }])
    }

    async fn fetch_movie_list(
        &self,
        _endpoint: MovieListEndpoint,
        page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        Ok(page_of(page))
    }

    async fn search_movies(&self, _query: &str, page: u32) -> CatalogResult<DiscoveryPage> {
        Ok(page_of(page))
    }
}

/// Holds every discovery and detail call until `width` of them are waiting,
/// so a run only finishes when each stage has all its calls in flight at once.
struct GatedCatalog {
    total_pages: u32,
    discover_gate: Barrier,
    detail_gate: Barrier,
}

impl GatedCatalog {
    fn new(width: usize) -> Self {
        Self {
            total_pages: width as u32,
            discover_gate: Barrier::new(width),
            detail_gate: Barrier::new(width),
        }
    }
}

#[async_trait::async_trait]
impl CatalogApi for GatedCatalog {
    async fn fetch_total_pages(&self, _query: &NormalizedQuery) -> CatalogResult<u32> {
        Ok(self.total_pages)
    }

    async fn discover_page(
        &self,
        _query: &NormalizedQuery,
        page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        self.discover_gate.wait().await;
        Ok(page_of(page))
    }

    async fn fetch_movie_detail(&self, id: MovieId) -> CatalogResult<Movie> {
        self.detail_gate.wait().await;
        Ok(movie(id))
    }

    async fn fetch_taxonomy(&self, _kind: TaxonomyKind) -> CatalogResult<Taxonomy> {
        Err(CatalogError::NoData)
    }

    async fn fetch_movie_providers(&self, _id: MovieId) -> CatalogResult<Vec<Provider>> {
        Err(CatalogError::NoData)
    }

    async fn fetch_movie_list(
        &self,
        _endpoint: MovieListEndpoint,
        _page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        Err(CatalogError::NoData)
    }

    async fn search_movies(&self, _query: &str, _page: u32) -> CatalogResult<DiscoveryPage> {
        Err(CatalogError::NoData)
    }
}

fn randomiser_for(catalog: &Arc<FakeCatalog>) -> Arc<Randomiser> {
    let catalog: Arc<dyn CatalogApi> = catalog.clone();
    Arc::new(Randomiser::new(catalog, FilterResolver::default()).with_seed(7))
}

fn genres(ids: &[i32]) -> FilterSelection {
    FilterSelection {
        genres: ids.iter().copied().collect(),
        ..FilterSelection::default()
    }
}

#[tokio::test]
async fn samples_distinct_pages_and_fetches_one_detail_per_pick() {
    let catalog = Arc::new(FakeCatalog::with_pages(5));
    let outcome = randomiser_for(&catalog).randomise(&genres(&[28]), 3).await;

    assert!(outcome.failure.is_none());
    assert_eq!(outcome.total_pages, Some(5));

    let pages = catalog.discovered_pages();
    assert_eq!(pages.len(), 3);
    let distinct: BTreeSet<u32> = pages.iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    assert!(distinct.iter().all(|p| (1..=5).contains(p)));

    let expected = NormalizedQuery {
        with_genres: Some("28".to_string()),
        ..NormalizedQuery::default()
    };
    assert_eq!(catalog.total_queries.lock().unwrap().as_slice(), &[expected.clone()]);
    for (query, _) in catalog.discover_calls.lock().unwrap().iter() {
        assert_eq!(query, &expected);
    }

    assert_eq!(catalog.detail_count(), 3);
    assert_eq!(outcome.movies.len(), 3);
    let movie_pages: BTreeSet<u32> = outcome.movies.iter().map(|m| page_of_movie(m.id)).collect();
    assert_eq!(movie_pages, distinct);
}

#[tokio::test]
async fn total_pages_failure_stops_the_run() {
    let catalog = Arc::new(FakeCatalog::default());
    let outcome = randomiser_for(&catalog).randomise(&genres(&[28]), 3).await;

    assert!(outcome.movies.is_empty());
    assert_eq!(outcome.total_pages, None);
    assert!(matches!(outcome.failure, Some(CatalogError::Network(_))));
    assert!(catalog.discovered_pages().is_empty());
    assert_eq!(catalog.detail_count(), 0);
}

#[tokio::test]
async fn zero_pages_yields_empty_outcome_without_discovery() {
    let catalog = Arc::new(FakeCatalog::with_pages(0));
    let outcome = randomiser_for(&catalog).randomise(&genres(&[]), 3).await;

    assert!(outcome.movies.is_empty());
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.total_pages, Some(0));
    assert!(catalog.discovered_pages().is_empty());
}

#[tokio::test]
async fn failed_pages_are_skipped() {
    let catalog = Arc::new(FakeCatalog {
        failing_pages: HashSet::from([2]),
        ..FakeCatalog::with_pages(3)
    });
    let outcome = randomiser_for(&catalog).randomise(&genres(&[]), 3).await;

    assert_eq!(catalog.discovered_pages().len(), 3);
    assert_eq!(catalog.detail_count(), 2);
    assert_eq!(outcome.movies.len(), 2);
    assert!(outcome.movies.iter().all(|m| page_of_movie(m.id) != 2));
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn all_pages_failing_skips_detail_stage() {
    let catalog = Arc::new(FakeCatalog {
        failing_pages: HashSet::from([1, 2]),
        ..FakeCatalog::with_pages(2)
    });
    let outcome = randomiser_for(&catalog).randomise(&genres(&[]), 5).await;

    assert_eq!(catalog.discovered_pages().len(), 2);
    assert_eq!(catalog.detail_count(), 0);
    assert!(outcome.movies.is_empty());
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn failed_details_are_dropped() {
    let failing: HashSet<MovieId> = (1..=MOVIES_PER_PAGE).map(|i| 100 + i).collect();
    let catalog = Arc::new(FakeCatalog {
        failing_details: failing,
        ..FakeCatalog::with_pages(2)
    });
    let outcome = randomiser_for(&catalog).randomise(&genres(&[]), 2).await;

    assert_eq!(catalog.detail_count(), 2);
    assert_eq!(outcome.movies.len(), 1);
    assert_eq!(page_of_movie(outcome.movies[0].id), 2);
}

#[tokio::test]
async fn one_provider_is_used_for_every_page() {
    let catalog = Arc::new(FakeCatalog::with_pages(3));
    let selection = FilterSelection {
        providers: BTreeSet::from([8, 9, 337]),
        ..FilterSelection::default()
    };
    randomiser_for(&catalog).randomise(&selection, 3).await;

    let providers: HashSet<Option<String>> = catalog
        .discover_calls
        .lock()
        .unwrap()
        .iter()
        .map(|(q, _)| q.with_watch_providers.clone())
        .collect();
    assert_eq!(providers.len(), 1);
    let chosen = providers.into_iter().next().unwrap().unwrap();
    assert!(["8", "9", "337"].contains(&chosen.as_str()));
}

#[tokio::test]
async fn invalid_selection_never_reaches_the_catalog() {
    let catalog = Arc::new(FakeCatalog::with_pages(5));
    let selection = FilterSelection {
        languages: BTreeSet::from(["e,n".to_string()]),
        ..FilterSelection::default()
    };
    let outcome = randomiser_for(&catalog).randomise(&selection, 3).await;

    assert!(matches!(outcome.failure, Some(CatalogError::InvalidFilter(_))));
    assert!(catalog.total_queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn spawn_reports_completion_exactly_once() {
    let catalog = Arc::new(FakeCatalog::with_pages(4));
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let counter = calls.clone();
    let handle = randomiser_for(&catalog).spawn(genres(&[28]), 2, move |outcome| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(outcome.movies.len());
    });
    handle.await.unwrap();

    assert_eq!(rx.await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn discovery_and_detail_calls_are_all_in_flight_together() {
    let catalog: Arc<dyn CatalogApi> = Arc::new(GatedCatalog::new(4));
    let randomiser = Randomiser::new(catalog, FilterResolver::default()).with_seed(3);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        randomiser.randomise(&genres(&[28]), 4),
    )
    .await
    .expect("every stage call should be issued before any is awaited");

    assert!(outcome.failure.is_none());
    assert_eq!(outcome.movies.len(), 4);
}

#[tokio::test]
async fn overlapping_runs_do_not_share_results() {
    let catalog = Arc::new(FakeCatalog::with_pages(10));
    let randomiser = randomiser_for(&catalog);
    let selection = genres(&[]);

    let (a, b) = tokio::join!(
        randomiser.randomise(&selection, 2),
        randomiser.randomise(&selection, 4)
    );
    assert_eq!(a.movies.len(), 2);
    assert_eq!(b.movies.len(), 4);
    assert_eq!(catalog.detail_count(), 6);
}

fn app_with(catalog: FakeCatalog) -> Router {
    app_with_permits(catalog, 2)
}

fn app_with_permits(catalog: FakeCatalog, permits: usize) -> Router {
    let catalog = Arc::new(catalog);
    let randomiser = randomiser_for(&catalog);
    let state = AppState::new(catalog, randomiser, Preferences::default(), permits);
    build_router(state)
}

/// One-movie randomise request, keyed by a proxy header and/or a peer address.
fn randomise_from(real_ip: Option<&str>, peer: Option<SocketAddr>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/randomise")
        .header("content-type", "application/json");
    if let Some(ip) = real_ip {
        builder = builder.header("x-real-ip", ip);
    }
    if let Some(addr) = peer {
        builder = builder.extension(ConnectInfo(addr));
    }
    builder
        .body(Body::from(json!({ "count": 1 }).to_string()))
        .unwrap()
}

/// Sends requests until one is rejected; returns how many were accepted first.
async fn accepted_before_rejection(app: &Router, make: impl Fn() -> Request<Body>) -> usize {
    // Two windows' worth, in case the minute rolls over mid-test.
    let attempts = 2 * (PER_IP_LIMIT + PER_IP_BURST) as usize + 2;
    for accepted in 0..attempts {
        let res = app.clone().oneshot(make()).await.unwrap();
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(body_json(res).await["kind"], "rate_limited");
            return accepted;
        }
        assert_eq!(res.status(), StatusCode::OK);
    }
    panic!("no request was rate limited after {attempts} attempts");
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let app = app_with(FakeCatalog::with_pages(1));
    let res = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn randomise_endpoint_returns_cards() {
    let app = app_with(FakeCatalog::with_pages(5));
    let res = app
        .oneshot(json_request(
            "POST",
            "/randomise",
            json!({ "genres": [28], "eras": [1990], "count": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["total_pages"], 5);
    assert!(body["error"].is_null());
    let movies = body["movies"].as_array().unwrap();
    assert_eq!(movies.len(), 2);
    assert_eq!(movies[0]["rating"], "72%");
    assert_eq!(movies[0]["year"], "1999");
    assert_eq!(movies[0]["duration"], "104 minutes");
}

#[tokio::test]
async fn randomise_endpoint_rejects_bad_counts_and_filters() {
    let app = app_with(FakeCatalog::with_pages(5));
    let res = app
        .clone()
        .oneshot(json_request("POST", "/randomise", json!({ "count": 11 })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(json_request(
            "POST",
            "/randomise",
            json!({ "languages": ["e&n"], "count": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["kind"], "invalid_filter");
}

#[tokio::test]
async fn randomise_endpoint_reports_upstream_failure() {
    let app = app_with(FakeCatalog::default());
    let res = app
        .oneshot(json_request("POST", "/randomise", json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert!(body["movies"].as_array().unwrap().is_empty());
    assert_eq!(body["error"]["kind"], "network");
}

#[tokio::test]
async fn taxonomy_endpoint_validates_kind() {
    let app = app_with(FakeCatalog::with_pages(1));
    let res = app.clone().oneshot(get("/taxonomy/genres")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["kind"], "genres");
    assert_eq!(body["items"][0]["name"], "Action");

    let res = app.oneshot(get("/taxonomy/moods")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_movie_maps_to_not_found() {
    let app = app_with(FakeCatalog {
        failing_details: HashSet::from([404]),
        ..FakeCatalog::with_pages(1)
    });
    let res = app.oneshot(get("/movies/404")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["kind"], "invalid_response");
}

#[tokio::test]
async fn preferences_round_trip_through_the_api() {
    let app = app_with(FakeCatalog::with_pages(1));
    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/movies/550/preferences",
            json!({ "watched": true, "rating": 8 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_json(res).await,
        json!({ "watched": true, "saved": false, "rating": 8 })
    );

    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/movies/550/preferences",
            json!({ "rating": 12 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.clone().oneshot(get("/preferences/summary")).await.unwrap();
    assert_eq!(body_json(res).await["watched_count"], 1);

    let res = app.oneshot(get("/movies/550")).await.unwrap();
    let body = body_json(res).await;
    assert_eq!(body["title"], "Movie 550");
    assert_eq!(body["preferences"]["rating"], 8);
}

#[tokio::test]
async fn list_and_search_endpoints_page_through_results() {
    let app = app_with(FakeCatalog::with_pages(1));
    let res = app
        .clone()
        .oneshot(get("/lists/top_rated?page=2"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["page"], 2);
    assert_eq!(body["movies"].as_array().unwrap().len(), 3);

    let res = app.clone().oneshot(get("/lists/trending")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.clone().oneshot(get("/search?query=%20")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.oneshot(get("/search?query=heat")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn randomise_endpoint_rejects_unrepresentable_eras() {
    let app = app_with(FakeCatalog::with_pages(5));
    for era in [i32::MAX, i32::MIN] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/randomise",
                json!({ "eras": [era], "count": 1 }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["kind"], "bad_request");
    }
}

#[tokio::test]
async fn randomise_endpoint_rate_limits_per_client() {
    let app = app_with(FakeCatalog::with_pages(1));
    let accepted = accepted_before_rejection(&app, || randomise_from(Some("198.51.100.4"), None)).await;
    assert!(accepted >= (PER_IP_LIMIT + PER_IP_BURST) as usize);

    let res = app
        .oneshot(randomise_from(Some("198.51.100.5"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn clients_without_proxy_headers_are_keyed_by_peer_address() {
    let app = app_with(FakeCatalog::with_pages(1));
    let first: SocketAddr = "192.0.2.10:40000".parse().unwrap();
    let second: SocketAddr = "192.0.2.11:40000".parse().unwrap();

    accepted_before_rejection(&app, || randomise_from(None, Some(first))).await;

    let res = app
        .oneshot(randomise_from(None, Some(second)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn randomise_requests_queue_behind_the_permit() {
    let app = app_with_permits(FakeCatalog::with_pages(3), 1);
    let (a, b, c) = tokio::join!(
        app.clone().oneshot(randomise_from(Some("203.0.113.1"), None)),
        app.clone().oneshot(randomise_from(Some("203.0.113.2"), None)),
        app.clone().oneshot(randomise_from(Some("203.0.113.3"), None)),
    );
    for res in [a, b, c] {
        assert_eq!(res.unwrap().status(), StatusCode::OK);
    }
}
