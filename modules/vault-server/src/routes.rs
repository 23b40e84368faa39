use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, warn};
use uuid::Uuid;

use vault_watchers::{BroadcastNotifier, WatcherError, WatcherService, WatcherSettings};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WatcherService>,
    pub notifier: BroadcastNotifier,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health))
        .route("/watchers", get(list_watchers).post(create_watcher))
        .route(
            "/watchers/{id}",
            get(get_watcher).put(update_watcher).delete(delete_watcher),
        )
        .route("/watchers/{id}/pause", patch(pause_watcher))
        .route("/watchers/{id}/resume", patch(resume_watcher))
        .route("/ws", get(websocket))
        .layer(cors)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(WatcherError);

impl From<WatcherError> for ApiError {
    fn from(e: WatcherError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WatcherError::InvalidSource(_)
            | WatcherError::UnsupportedSource(_)
            | WatcherError::DuplicateWatcher(_)
            | WatcherError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            WatcherError::NotFound(_) => StatusCode::NOT_FOUND,
            WatcherError::TerminalWatcher { .. } | WatcherError::IllegalTransition { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Watcher request failed");
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Knobs as sent by the UI. Absent numbers count as zero so they fail
/// validation with a 400 rather than a body rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsBody {
    pub description: Option<String>,
    pub request_interval: Option<i64>,
    pub items_per_request: Option<i32>,
    pub inactivity_timeout: Option<i64>,
}

impl From<SettingsBody> for WatcherSettings {
    fn from(body: SettingsBody) -> Self {
        WatcherSettings {
            description: body.description.filter(|d| !d.trim().is_empty()),
            request_interval: body.request_interval.unwrap_or(0),
            items_per_request: body.items_per_request.unwrap_or(0),
            inactivity_timeout: body.inactivity_timeout.unwrap_or(0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateWatcherBody {
    pub url: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsBody,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

async fn list_watchers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_watchers().await)
}

async fn create_watcher(
    State(state): State<AppState>,
    Json(body): Json<CreateWatcherBody>,
) -> ApiResult<impl IntoResponse> {
    let url = body
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| WatcherError::InvalidSettings("No url provided".into()))?;
    let record = state
        .service
        .create_watcher(&url, body.settings.into())
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_watcher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_watcher(id).await?))
}

async fn update_watcher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SettingsBody>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.update_watcher(id, body.into()).await?))
}

async fn delete_watcher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.service.delete_watcher(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_watcher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let record = state.service.pause_watcher(id).await?;
    Ok(Json(record.ok_or(WatcherError::NotFound(id))?))
}

async fn resume_watcher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let record = state.service.resume_watcher_detached(id).await?;
    Ok(Json(record.ok_or(WatcherError::NotFound(id))?))
}

// ---------------------------------------------------------------------------
// Websocket
// ---------------------------------------------------------------------------

async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.notifier.subscribe();
    ws.on_upgrade(move |socket| relay_events(socket, events))
}

/// Forward every watcher event to the socket as JSON text until either side goes away.
async fn relay_events(mut socket: WebSocket, mut events: broadcast::Receiver<vault_watchers::WatcherEvent>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Websocket listener lagged behind watcher events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Websocket listener disconnected");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use vault_watchers::testing::{
        board_record, thread_html, MemoryWatcherStore, MockFetcher, MockIngestor,
    };
    use vault_watchers::{ParserFactory, WatcherRecord, WatcherStatus};

    use super::*;

    const THREAD_URL: &str = "https://boards.4chan.org/wg/thread/7891234";

    async fn app(records: Vec<WatcherRecord>) -> Router {
        let fetcher = MockFetcher::new().on_page(THREAD_URL, thread_html("wg", &["1.jpg"], false));
        let factory = ParserFactory::new(Arc::new(fetcher), Arc::new(MockIngestor::new()))
            .with_courtesy_delay(Duration::ZERO);
        let notifier = BroadcastNotifier::new(16);
        let service = WatcherService::new(
            "vault-test",
            Arc::new(MemoryWatcherStore::new().with_records(records)),
            Arc::new(notifier.clone()),
            factory,
        );
        service.init().await.unwrap();
        build_router(
            AppState {
                service: Arc::new(service),
                notifier,
            },
            &[],
        )
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_body() -> serde_json::Value {
        json!({
            "url": THREAD_URL,
            "description": "walls",
            "requestInterval": 60000,
            "itemsPerRequest": 3,
            "inactivityTimeout": 3600000
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = app(vec![]).await.oneshot(empty_request(Method::GET, "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_returns_persisted_shape() {
        let resp = app(vec![]).await
            .oneshot(json_request(Method::POST, "/watchers", create_body()))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["url"], THREAD_URL);
        assert_eq!(json["sourceType"], "board-thread");
        assert_eq!(json["status"], "running");
        assert_eq!(json["itemsPerRequest"], 3);
        assert_eq!(json["description"], "walls");
    }

    #[tokio::test]
    async fn duplicate_create_is_bad_request() {
        let app = app(vec![]).await;
        let first = app
            .clone()
            .oneshot(json_request(Method::POST, "/watchers", create_body()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(json_request(Method::POST, "/watchers", create_body()))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(second).await["error"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        let app = app(vec![]).await;

        let no_url = app
            .clone()
            .oneshot(json_request(Method::POST, "/watchers", json!({"requestInterval": 1000})))
            .await
            .unwrap();
        assert_eq!(no_url.status(), StatusCode::BAD_REQUEST);

        let no_interval = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/watchers",
                json!({"url": THREAD_URL, "itemsPerRequest": 1, "inactivityTimeout": 1000}),
            ))
            .await
            .unwrap();
        assert_eq!(no_interval.status(), StatusCode::BAD_REQUEST);

        let mut bad_source = create_body();
        bad_source["url"] = json!("https://example.com/pics");
        let resp = app
            .oneshot(json_request(Method::POST, "/watchers", bad_source))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let app = app(vec![]).await;
        let uri = format!("/watchers/{}", Uuid::new_v4());

        let get = app.clone().oneshot(empty_request(Method::GET, &uri)).await.unwrap();
        assert_eq!(get.status(), StatusCode::NOT_FOUND);

        let put = app
            .oneshot(json_request(
                Method::PUT,
                &uri,
                json!({"requestInterval": 1000, "itemsPerRequest": 1, "inactivityTimeout": 1000}),
            ))
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let mut older = board_record("https://boards.4chan.org/wg/thread/1");
        older.status = WatcherStatus::Paused;
        older.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let mut newer = board_record("https://boards.4chan.org/wg/thread/2");
        newer.status = WatcherStatus::Paused;

        let app = app(vec![older.clone(), newer.clone()]).await;
        let resp = app.oneshot(empty_request(Method::GET, "/watchers")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let ids: Vec<String> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|w| w["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec![newer.id.to_string(), older.id.to_string()]);
    }

    #[tokio::test]
    async fn resume_of_finished_watcher_conflicts() {
        let mut finished = board_record(THREAD_URL);
        finished.status = WatcherStatus::Finished;
        let app = app(vec![finished.clone()]).await;

        let resp = app
            .oneshot(empty_request(
                Method::PATCH,
                &format!("/watchers/{}/resume", finished.id),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn pause_then_delete() {
        let mut paused = board_record(THREAD_URL);
        paused.status = WatcherStatus::Paused;
        let app = app(vec![paused.clone()]).await;
        let uri = format!("/watchers/{}", paused.id);

        let resp = app
            .clone()
            .oneshot(empty_request(Method::PATCH, &format!("{uri}/pause")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "paused");

        let resp = app.clone().oneshot(empty_request(Method::DELETE, &uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app.oneshot(empty_request(Method::GET, &uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
