use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{Config, MAX_SIMILAR_K};
use crate::db::{
    create_pool, delete_player, get_player_by_id, get_player_with_stats, get_season_rows, init_database_with_pool,
    insert_player, insert_player_stat, list_players, update_player,
};
use crate::models::{
    ApiResponse, HealthStatus, ModelSummary, NewPlayer, NewPlayerStat, Player, PlayerStat, PlayerWithStats,
    SimilarPlayer,
};
use crate::services::{build_and_save, ModelError, ModelHandle, ModelStore};
use crate::utils::{validate_name, validate_season};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 500;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub model: ModelHandle,
    pub store: ModelStore,
    pub config: Config,
    /// Held while a rebuild or reload writes, reads and publishes artifacts
    pub build_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(pool: SqlitePool, model: ModelHandle, store: ModelStore, config: Config) -> Self {
        Self {
            pool,
            model,
            store,
            config,
            build_lock: Arc::new(Mutex::new(())),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(message.into())))
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Failed to {}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", context))
}

fn model_error(e: ModelError) -> ApiError {
    match e {
        ModelError::NotFound(id) => api_error(
            StatusCode::NOT_FOUND,
            format!("No such player-season in the model: {}", id),
        ),
        ModelError::ModelUnavailable => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Similarity model unavailable; build it with `build-model` or POST /api/model/rebuild",
        ),
        ModelError::EmptyDataset => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "No usable player-season rows to build a model from",
        ),
        other => internal_error("run the similarity model", other),
    }
}

pub async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;

    let store = ModelStore::new(&config.model_dir);
    let model = ModelHandle::from_store(&store);
    let bind_addr = format!("{}:{}", config.bind_host, port);

    let app = create_router(AppState::new(pool, model, store, config));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Courtsight API server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api", get(api_root))
        .route("/api/players", get(list_players_handler).post(create_player_handler))
        .route(
            "/api/players/{id}",
            get(get_player_handler)
                .put(update_player_handler)
                .delete(delete_player_handler),
        )
        .route("/api/players/{id}/stats", post(create_stat_handler))
        .route("/api/players/{id}/seasons/{season}/similar", get(similar_players_handler))
        .route("/api/model/reload", post(reload_model_handler))
        .route("/api/model/rebuild", post(rebuild_model_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
        model: state.model.current().map(|m| m.summary()),
    }))
}

async fn api_root() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("Courtsight API is running"))
}

// GET /api/players - List players
#[derive(Deserialize)]
struct ListPlayersQuery {
    skip: Option<i64>,
    limit: Option<i64>,
}

async fn list_players_handler(
    State(state): State<AppState>,
    Query(params): Query<ListPlayersQuery>,
) -> ApiResult<Vec<Player>> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    match list_players(&state.pool, skip, limit).await {
        Ok(players) => Ok(Json(ApiResponse::success(players))),
        Err(e) => Err(internal_error("list players", e)),
    }
}

fn validate_player(player: &NewPlayer) -> Result<(), ApiError> {
    if !validate_name(&player.first_name) || !validate_name(&player.last_name) {
        return Err(api_error(StatusCode::BAD_REQUEST, "first_name and last_name are required"));
    }
    if !validate_name(&player.team) {
        return Err(api_error(StatusCode::BAD_REQUEST, "team is required"));
    }
    Ok(())
}

// POST /api/players - Create a player
async fn create_player_handler(
    State(state): State<AppState>,
    Json(request): Json<NewPlayer>,
) -> ApiResult<Player> {
    validate_player(&request)?;

    match insert_player(&state.pool, &request).await {
        Ok(player) => {
            tracing::info!("Created player {} {} ({})", player.first_name, player.last_name, player.id);
            Ok(Json(ApiResponse::success(player)))
        }
        Err(e) => Err(internal_error("create player", e)),
    }
}

// GET /api/players/{id} - Player with season stats
async fn get_player_handler(
    State(state): State<AppState>,
    Path(player_id): Path<i64>,
) -> ApiResult<PlayerWithStats> {
    match get_player_with_stats(&state.pool, player_id).await {
        Ok(Some(player)) => Ok(Json(ApiResponse::success(player))),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Player not found")),
        Err(e) => Err(internal_error("fetch player", e)),
    }
}

// PUT /api/players/{id} - Update a player
async fn update_player_handler(
    State(state): State<AppState>,
    Path(player_id): Path<i64>,
    Json(request): Json<NewPlayer>,
) -> ApiResult<Player> {
    validate_player(&request)?;

    match update_player(&state.pool, player_id, &request).await {
        Ok(Some(player)) => Ok(Json(ApiResponse::success(player))),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Player not found")),
        Err(e) => Err(internal_error("update player", e)),
    }
}

// DELETE /api/players/{id} - Delete a player and their stats
async fn delete_player_handler(
    State(state): State<AppState>,
    Path(player_id): Path<i64>,
) -> ApiResult<i64> {
    match delete_player(&state.pool, player_id).await {
        Ok(true) => Ok(Json(ApiResponse::success(player_id))),
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, "Player not found")),
        Err(e) => Err(internal_error("delete player", e)),
    }
}

// POST /api/players/{id}/stats - Add a season stat line
async fn create_stat_handler(
    State(state): State<AppState>,
    Path(player_id): Path<i64>,
    Json(request): Json<NewPlayerStat>,
) -> ApiResult<PlayerStat> {
    if !validate_season(&request.season) {
        return Err(api_error(StatusCode::BAD_REQUEST, "season is required"));
    }

    match get_player_by_id(&state.pool, player_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "Player not found")),
        Err(e) => return Err(internal_error("fetch player", e)),
    }

    match insert_player_stat(&state.pool, player_id, &request).await {
        Ok(stat) => Ok(Json(ApiResponse::success(stat))),
        Err(e) => Err(internal_error("create stat line", e)),
    }
}

// GET /api/players/{id}/seasons/{season}/similar - Nearest player-seasons
#[derive(Deserialize)]
struct SimilarQuery {
    k: Option<usize>,
}

async fn similar_players_handler(
    State(state): State<AppState>,
    Path((player_id, season)): Path<(i64, String)>,
    Query(params): Query<SimilarQuery>,
) -> ApiResult<Vec<SimilarPlayer>> {
    let player = match get_player_by_id(&state.pool, player_id).await {
        Ok(Some(player)) => player,
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "Player not found")),
        Err(e) => return Err(internal_error("fetch player", e)),
    };

    let model = state.model.get().map_err(model_error)?;
    let k = params.k.unwrap_or(state.config.similar_default_k).clamp(1, MAX_SIMILAR_K);

    match model.similar_players(&player.first_name, &player.last_name, &season, k) {
        Ok(similar) => Ok(Json(ApiResponse::success(similar))),
        Err(ModelError::NotFound(id)) => {
            let mut message = format!("No such player-season in the model: {}", id);
            let hints = model.suggestions(&id, 3);
            if !hints.is_empty() {
                message.push_str(&format!(" (did you mean {}?)", hints.join(", ")));
            }
            Err(api_error(StatusCode::NOT_FOUND, message))
        }
        Err(e) => Err(model_error(e)),
    }
}

// POST /api/model/reload - Re-read published artifacts from disk
async fn reload_model_handler(State(state): State<AppState>) -> ApiResult<ModelSummary> {
    let _build = state.build_lock.lock().await;
    let store = state.store.clone();
    let loaded = tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|e| internal_error("reload the similarity model", e))?;

    match loaded {
        Ok(Some(model)) => {
            let summary = model.summary();
            state.model.publish(model);
            tracing::info!("Reloaded similarity model {}", summary.build_id);
            Ok(Json(ApiResponse::success(summary)))
        }
        Ok(None) => Err(model_error(ModelError::ModelUnavailable)),
        Err(e) => Err(model_error(e)),
    }
}

// POST /api/model/rebuild - Rebuild from the database, publish, and swap in
#[derive(Debug, Serialize)]
struct RebuildResponse {
    model: ModelSummary,
    rejected_rows: usize,
}

async fn rebuild_model_handler(State(state): State<AppState>) -> ApiResult<RebuildResponse> {
    // One build at a time, so the published model is always the one on disk
    let _build = state.build_lock.lock().await;
    let rows = get_season_rows(&state.pool)
        .await
        .map_err(|e| internal_error("load season rows", e))?;

    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || build_and_save(rows, &store))
        .await
        .map_err(|e| internal_error("rebuild the similarity model", e))?
        .map_err(model_error)?;

    let response = RebuildResponse {
        model: outcome.model.summary(),
        rejected_rows: outcome.rejected.len(),
    };
    state.model.publish(outcome.model);
    tracing::info!(
        "Published similarity model {} ({} rows)",
        response.model.build_id,
        response.model.rows
    );

    Ok(Json(ApiResponse::success(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::feature_builder::FeatureMatrix;
    use crate::services::similarity::SimilarityModel;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app(model: ModelHandle, model_dir: &std::path::Path) -> (Router, SqlitePool) {
        let pool = test_pool().await;
        let state = AppState::new(pool.clone(), model, ModelStore::new(model_dir), Config::default());
        (create_router(state), pool)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn mock_model() -> SimilarityModel {
        let features = FeatureMatrix::from_rows(
            &["x", "y"],
            vec![
                ("Player A (2024)".to_string(), vec![1.0, 0.0]),
                ("Player C (2024)".to_string(), vec![0.95, 0.05]),
                ("Player B (2024)".to_string(), vec![0.0, 1.0]),
            ],
        )
        .unwrap();
        SimilarityModel::build(features).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_player() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(ModelHandle::empty(), dir.path()).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/players",
            Some(json!({"first_name": "Caitlin", "last_name": "Clark", "team": "Indiana Fever"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["first_name"], "Caitlin");
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/players/{}/stats", id),
            Some(json!({"season": "2024", "points_per_game": 19.2, "assists_per_game": 8.4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, &format!("/api/players/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["first_name"], "Caitlin");
        assert_eq!(body["data"]["stats"][0]["season"], "2024");
        assert_eq!(body["data"]["stats"][0]["points_per_game"], 19.2);
    }

    #[tokio::test]
    async fn test_missing_player_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(ModelHandle::empty(), dir.path()).await;

        let (status, body) = send(&app, Method::GET, "/api/players/99999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Player not found");

        let (status, _) = send(&app, Method::DELETE, "/api/players/99999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/players/99999/stats",
            Some(json!({"season": "2024"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(ModelHandle::empty(), dir.path()).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/players",
            Some(json!({"first_name": " ", "last_name": "Clark", "team": "IND"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_and_delete_player() {
        let dir = tempfile::tempdir().unwrap();
        let (app, pool) = app(ModelHandle::empty(), dir.path()).await;
        let player = insert_player(
            &pool,
            &NewPlayer {
                first_name: "Kelsey".into(),
                last_name: "Plum".into(),
                team: "LVA".into(),
            },
        )
        .await
        .unwrap();

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/players/{}", player.id),
            Some(json!({"first_name": "Kelsey", "last_name": "Plum", "team": "LAS"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["team"], "LAS");

        let (status, _) = send(&app, Method::DELETE, &format!("/api/players/{}", player.id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/api/players", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_similar_players_from_loaded_model() {
        let dir = tempfile::tempdir().unwrap();
        let (app, pool) = app(ModelHandle::with_model(mock_model()), dir.path()).await;
        let player = insert_player(
            &pool,
            &NewPlayer {
                first_name: "Player".into(),
                last_name: "A".into(),
                team: "Team A".into(),
            },
        )
        .await
        .unwrap();

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/players/{}/seasons/2024/similar", player.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["player_season_id"], "Player C (2024)");
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/players/{}/seasons/2024/similar?k=1", player.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/players/{}/seasons/2019/similar", player.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Player A (2019)"));
    }

    #[tokio::test]
    async fn test_similar_players_without_model_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let (app, pool) = app(ModelHandle::empty(), dir.path()).await;
        let player = insert_player(
            &pool,
            &NewPlayer {
                first_name: "Player".into(),
                last_name: "A".into(),
                team: "Team A".into(),
            },
        )
        .await
        .unwrap();

        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/api/players/{}/seasons/2024/similar", player.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["model"].is_null());
    }

    #[tokio::test]
    async fn test_rebuild_publishes_model_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::empty();
        let (app, pool) = app(handle.clone(), dir.path()).await;

        let (status, _) = send(&app, Method::POST, "/api/model/rebuild", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!handle.is_loaded());

        for (first, last, ppg, rpg) in [("Caitlin", "Clark", 19.2, 5.7), ("Angel", "Reese", 13.6, 13.1), ("Aliyah", "Boston", 14.0, 12.0)] {
            let player = insert_player(
                &pool,
                &NewPlayer {
                    first_name: first.into(),
                    last_name: last.into(),
                    team: "T".into(),
                },
            )
            .await
            .unwrap();
            insert_player_stat(
                &pool,
                player.id,
                &NewPlayerStat {
                    season: "2024".into(),
                    points_per_game: ppg,
                    rebounds_per_game: rpg,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let (status, body) = send(&app, Method::POST, "/api/model/rebuild", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["model"]["rows"], 3);
        assert!(handle.is_loaded());
        assert!(dir.path().join(crate::services::model_store::INDEX_FILE).exists());

        let (status, body) = send(&app, Method::POST, "/api/model/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows"], 3);
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_publish_what_is_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::empty();
        let (app, pool) = app(handle.clone(), dir.path()).await;

        for (first, last, ppg) in [("Jackie", "Young", 16.0), ("Chelsea", "Gray", 15.0), ("Kelsey", "Plum", 17.8)] {
            let player = insert_player(
                &pool,
                &NewPlayer {
                    first_name: first.into(),
                    last_name: last.into(),
                    team: "LVA".into(),
                },
            )
            .await
            .unwrap();
            insert_player_stat(
                &pool,
                player.id,
                &NewPlayerStat {
                    season: "2023".into(),
                    points_per_game: ppg,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let (first, second) = tokio::join!(
            send(&app, Method::POST, "/api/model/rebuild", None),
            send(&app, Method::POST, "/api/model/rebuild", None)
        );
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);

        let on_disk = ModelStore::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(handle.get().unwrap().build_id(), on_disk.build_id());
    }
}
