use crate::config::Config;
use crate::filters::{
    current_year, era_catalog, CertificationPolicy, Era, FilterResolver, FilterSelection,
    ScoreToken,
};
use crate::models::{DiscoveryPage, Movie, MovieId, Provider};
use crate::preferences::{MoviePreferences, PreferenceError, Preferences};
use crate::randomiser::Randomiser;
use crate::tmdb::{
    CatalogApi, CatalogError, MovieListEndpoint, Taxonomy, TaxonomyKind, TmdbClient,
};
use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
pub const PER_IP_LIMIT: u32 = 30; // per minute
pub const PER_IP_BURST: u32 = 5;
const GLOBAL_LIMIT: u32 = 120; // per minute
const GLOBAL_BURST: u32 = 20;
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const MAX_OPTIONS: usize = 10;
const DEFAULT_OPTIONS: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub randomiser: Arc<Randomiser>,
    pub preferences: Preferences,
    pub rate_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
    pub global_limit: Arc<Mutex<WindowCounter>>,
    pub randomise_sem: Arc<Semaphore>,
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        randomiser: Arc<Randomiser>,
        preferences: Preferences,
        max_concurrent_randomise: usize,
    ) -> Self {
        Self {
            catalog,
            randomiser,
            preferences,
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            global_limit: Arc::new(Mutex::new(WindowCounter {
                window: 0,
                count: 0,
            })),
            randomise_sem: Arc::new(Semaphore::new(max_concurrent_randomise)),
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::from_config(&config)?);
    let policy = match catalog.fetch_taxonomy(TaxonomyKind::Certifications).await {
        Ok(Taxonomy::Certifications(list)) if !list.is_empty() => {
            CertificationPolicy::from_catalog(&list)
        }
        Ok(_) => {
            warn!(
                "No certifications listed for {}, using default policy",
                config.certification_country
            );
            CertificationPolicy::default()
        }
        Err(e) => {
            warn!("Failed to fetch certifications, using default policy: {}", e);
            CertificationPolicy::default()
        }
    };
    let resolver = FilterResolver::new(config.certification_country.clone(), policy);
    info!(
        "Blocking certifications: {}",
        resolver.policy().blocked().collect::<Vec<_>>().join(", ")
    );
    let randomiser = Arc::new(Randomiser::new(catalog.clone(), resolver));
    let state = AppState::new(
        catalog,
        randomiser,
        Preferences::default(),
        config.max_concurrent_randomise,
    );

    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/randomise", post(randomise))
        .route("/movies/:id", get(movie_detail))
        .route("/movies/:id/providers", get(movie_providers))
        .route("/movies/:id/preferences", put(update_preferences))
        .route("/preferences/summary", get(preferences_summary))
        .route("/taxonomy/:kind", get(taxonomy))
        .route("/eras", get(eras))
        .route("/lists/:endpoint", get(movie_list))
        .route("/search", get(search))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Catalog(CatalogError),
    Preference(PreferenceError),
    BadRequest(String),
    RateLimited,
    Unavailable,
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError::Catalog(e)
    }
}

impl From<PreferenceError> for ApiError {
    fn from(e: PreferenceError) -> Self {
        ApiError::Preference(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Catalog(e) => (catalog_status(&e), e.kind(), e.to_string()),
            ApiError::Preference(e) => (StatusCode::BAD_REQUEST, "invalid_preference", e.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many randomise requests".to_string(),
            ),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Randomiser is shutting down".to_string(),
            ),
        };
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

fn catalog_status(e: &CatalogError) -> StatusCode {
    match e {
        CatalogError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
        CatalogError::InvalidEndpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CatalogError::InvalidResponse { status: 404 } => StatusCode::NOT_FOUND,
        CatalogError::InvalidResponse { .. }
        | CatalogError::Network(_)
        | CatalogError::NoData
        | CatalogError::Serialization(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Deserialize)]
pub struct RandomiseRequest {
    #[serde(default)]
    pub genres: BTreeSet<i32>,
    #[serde(default)]
    pub providers: BTreeSet<i32>,
    #[serde(default)]
    pub languages: BTreeSet<String>,
    /// Decade start years, e.g. `1990`.
    #[serde(default)]
    pub eras: BTreeSet<i32>,
    #[serde(default)]
    pub scores: BTreeSet<ScoreToken>,
    pub count: Option<usize>,
}

impl RandomiseRequest {
    fn into_selection(self, current_year: i32) -> Result<(FilterSelection, usize), ApiError> {
        let count = self.count.unwrap_or(DEFAULT_OPTIONS);
        if !(1..=MAX_OPTIONS).contains(&count) {
            return Err(ApiError::BadRequest(format!(
                "count must be between 1 and {MAX_OPTIONS}"
            )));
        }
        let eras = self
            .eras
            .into_iter()
            .map(|start| {
                Era::decade(start, current_year)
                    .ok_or_else(|| ApiError::BadRequest(format!("era {start} is out of range")))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        let selection = FilterSelection {
            genres: self.genres,
            providers: self.providers,
            languages: self.languages,
            eras,
            scores: self.scores,
        };
        Ok((selection, count))
    }
}

#[derive(Debug, Serialize)]
pub struct MovieCard {
    pub id: MovieId,
    pub title: String,
    pub overview: String,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub genres: String,
    pub year: String,
    pub release_date: String,
    pub duration: String,
    pub rating: String,
    pub votes: String,
}

impl From<&Movie> for MovieCard {
    fn from(movie: &Movie) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            overview: movie.overview.clone(),
            poster_url: movie.poster_url(),
            backdrop_url: movie.backdrop_url(),
            genres: movie.genre_text(),
            year: movie.year_text(),
            release_date: movie.release_date_text(),
            duration: movie.duration_text(),
            rating: movie.rating_text(),
            votes: movie.formatted_vote_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MovieView {
    #[serde(flatten)]
    pub card: MovieCard,
    pub cast: Vec<String>,
    pub directors: Vec<String>,
    pub producers: Vec<String>,
    pub screen_writers: Vec<String>,
    pub trailers: Vec<String>,
    pub preferences: MoviePreferences,
}

impl MovieView {
    fn new(movie: &Movie, preferences: MoviePreferences) -> Self {
        let names = |crew: Vec<&crate::models::CrewMember>| {
            crew.into_iter().map(|c| c.name.clone()).collect::<Vec<_>>()
        };
        Self {
            card: MovieCard::from(movie),
            cast: movie.cast().iter().map(|c| c.name.clone()).collect(),
            directors: names(movie.directors()),
            producers: names(movie.producers()),
            screen_writers: names(movie.screen_writers()),
            trailers: movie
                .youtube_trailers()
                .into_iter()
                .filter_map(|v| v.youtube_url())
                .collect(),
            preferences,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RandomiseResponse {
    pub movies: Vec<MovieCard>,
    pub total_pages: Option<u32>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub page: u32,
    pub total_pages: Option<u32>,
    pub movies: Vec<MovieCard>,
}

impl From<DiscoveryPage> for ListResponse {
    fn from(page: DiscoveryPage) -> Self {
        Self {
            page: page.page,
            total_pages: page.total_pages,
            movies: page.results.iter().map(MovieCard::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreferenceUpdate {
    pub watched: Option<bool>,
    pub saved: Option<bool>,
    pub rating: Option<u8>,
    #[serde(default)]
    pub clear_rating: bool,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub page: Option<u32>,
}

async fn health() -> &'static str {
    "OK"
}

async fn randomise(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<RandomiseRequest>,
) -> Result<Json<RandomiseResponse>, ApiError> {
    let ip = extract_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !check_rate_limit(&state, &ip).await || !check_global_rate_limit(&state).await {
        warn!("Rate limit exceeded for {}", ip);
        return Err(ApiError::RateLimited);
    }

    let (selection, count) = request.into_selection(current_year())?;

    let _permit = state
        .randomise_sem
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Unavailable)?;

    info!("Randomising {} option(s) for {}", count, ip);
    let outcome = state.randomiser.randomise(&selection, count).await;
    let error = match outcome.failure {
        Some(e @ CatalogError::InvalidFilter(_)) => return Err(ApiError::Catalog(e)),
        Some(e) => {
            error!("Randomiser run failed: {}", e);
            Some(json!({ "kind": e.kind(), "message": e.to_string() }))
        }
        None => None,
    };

    Ok(Json(RandomiseResponse {
        movies: outcome.movies.iter().map(MovieCard::from).collect(),
        total_pages: outcome.total_pages,
        error,
    }))
}

async fn movie_detail(
    State(state): State<AppState>,
    Path(id): Path<MovieId>,
) -> Result<Json<MovieView>, ApiError> {
    let movie = state.catalog.fetch_movie_detail(id).await?;
    let preferences = state.preferences.for_movie(id);
    Ok(Json(MovieView::new(&movie, preferences)))
}

async fn movie_providers(
    State(state): State<AppState>,
    Path(id): Path<MovieId>,
) -> Result<Json<Vec<Provider>>, ApiError> {
    Ok(Json(state.catalog.fetch_movie_providers(id).await?))
}

async fn update_preferences(
    State(state): State<AppState>,
    Path(id): Path<MovieId>,
    Json(update): Json<PreferenceUpdate>,
) -> Result<Json<MoviePreferences>, ApiError> {
    if update.clear_rating {
        state.preferences.clear_rating(id);
    } else if let Some(rating) = update.rating {
        state.preferences.set_rating(id, rating)?;
    }
    if let Some(watched) = update.watched {
        if state.preferences.set_watched(id, watched) {
            info!("Movie {} watched -> {}", id, watched);
        }
    }
    if let Some(saved) = update.saved {
        state.preferences.set_saved(id, saved);
    }
    Ok(Json(state.preferences.for_movie(id)))
}

async fn preferences_summary(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "watched_count": state.preferences.watched_count() }))
}

async fn taxonomy(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Taxonomy>, ApiError> {
    let kind: TaxonomyKind = kind.parse().map_err(ApiError::BadRequest)?;
    Ok(Json(state.catalog.fetch_taxonomy(kind).await?))
}

async fn eras() -> Json<Vec<Era>> {
    Json(era_catalog(current_year()))
}

async fn movie_list(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let endpoint: MovieListEndpoint = endpoint.parse().map_err(ApiError::BadRequest)?;
    let page = params.page.unwrap_or(1).max(1);
    info!("Fetching {} list, page {}", endpoint, page);
    let page = state.catalog.fetch_movie_list(endpoint, page).await?;
    Ok(Json(ListResponse::from(page)))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let page = state
        .catalog
        .search_movies(query, params.page.unwrap_or(1).max(1))
        .await?;
    Ok(Json(ListResponse::from(page)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

/// Client key for rate limiting: proxy headers first, then the peer address.
fn extract_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn check_rate_limit(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guards = state.rate_limits.lock().await;
    if guards.len() > MAX_RATE_LIMIT_ENTRIES {
        guards.retain(|_, v| v.window == window);
    }
    let entry = guards
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 });
    if entry.window != window {
        entry.window = window;
        entry.count = 0;
    }
    if entry.count >= PER_IP_LIMIT + PER_IP_BURST {
        return false;
    }
    entry.count += 1;
    true
}

async fn check_global_rate_limit(state: &AppState) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guard = state.global_limit.lock().await;
    if guard.window != window {
        guard.window = window;
        guard.count = 0;
    }
    if guard.count >= GLOBAL_LIMIT + GLOBAL_BURST {
        return false;
    }
    guard.count += 1;
    true
}
