//! HTTP and websocket front end

use crate::config::ServerConfig;
use crate::pool::SessionPool;
use crate::session_task::{run_session, EventSink, Inbound, SessionSettings};
use crate::watcher::IndexWatcher;
use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tunematch_core::audio::decode_pcm_s16le;
use tunematch_core::{
    duration_bucket, identify_clip, AudioError, CacheKey, FingerprintSummary, IndexHandle,
    ServerEvent,
};

const CACHE_KEY_HEADER: &str = "x-cache-key";
const INDEX_STATUS_HEADER: &str = "x-index-status";

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub index: Arc<IndexHandle>,
    pub pool: Arc<SessionPool>,
    pub settings: Arc<SessionSettings>,
}

impl AppState {
    pub fn new(config: ServerConfig, index: Arc<IndexHandle>) -> Self {
        Self {
            pool: Arc::new(SessionPool::new(config.max_sessions)),
            settings: Arc::new(SessionSettings::from_config(&config)),
            config: Arc::new(config),
            index,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/identify", post(identify))
        .route("/cache-key", post(cache_key))
        .route("/health", get(health))
        .with_state(state)
}

/// Load the index, start the watcher and serve until Ctrl-C
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let index = Arc::new(IndexHandle::new());
    let watcher = Arc::new(IndexWatcher::new(
        config.index_path.clone(),
        index.clone(),
        config.engine.clone(),
    ));
    match watcher.check_once() {
        Ok(Some(version)) => log::info!("Serving index v{}", version),
        Ok(None) => {}
        Err(e) => log::warn!(
            "Starting without an index ({}): {}",
            config.index_path.display(),
            e
        ),
    }
    tokio::spawn(watcher.run(config.index_poll_interval()));

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    log::info!(
        "Listening on ws://{}/ws ({} session slots)",
        listener.local_addr()?,
        config.max_sessions
    );

    serve_listener(listener, AppState::new(config, index)).await
}

/// Serve on an already bound listener until Ctrl-C
pub async fn serve_listener(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutdown signal received");
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    let mut sink = WsSink { sender };

    let permit = match state.pool.try_admit() {
        Ok(permit) => permit,
        Err(e) => {
            log::warn!("Rejecting session: {}", e);
            if sink.send(ServerEvent::error(e.to_string())).await.is_ok() {
                let _ = sink.sender.send(Message::Close(None)).await;
            }
            return;
        }
    };

    let inbound = receiver.filter_map(|message| future::ready(to_inbound(message)));
    let summary = run_session(
        permit.session_id,
        inbound,
        &mut sink,
        state.index.clone(),
        &state.settings,
    )
    .await;

    if summary.skipped_windows > 0 {
        log::debug!(
            "Session {} skipped {} windows at close",
            summary.session_id,
            summary.skipped_windows
        );
    }
    let _ = sink.sender.close().await;
    drop(permit);
}

fn to_inbound(message: Result<Message, axum::Error>) -> Option<Inbound> {
    match message {
        Ok(Message::Binary(bytes)) => Some(Inbound::Audio(bytes.to_vec())),
        Ok(Message::Text(text)) => Some(Inbound::Text(text.to_string())),
        Ok(Message::Close(_)) => Some(Inbound::Close),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Inbound::Disconnected(e.to_string())),
    }
}

struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send(&mut self, event: ServerEvent) -> anyhow::Result<()> {
        let text = event.to_json()?;
        self.sender.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

/// Errors of the request/response endpoints
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid audio: {0}")]
    Audio(#[from] AudioError),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Audio(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::debug!("Request failed: {}", self);
        (self.status(), Json(ServerEvent::error(self.to_string()))).into_response()
    }
}

/// Identify a whole s16le clip; the response is cacheable under its key
///
/// Without a loaded index the answer is an empty match set that the edge
/// must not store.
async fn identify(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let samples = decode_pcm_s16le(&body)?;
    let Some(index) = state.index.snapshot() else {
        log::info!("No index loaded, answering {} byte clip with no matches", body.len());
        let headers = [
            (HeaderName::from_static(INDEX_STATUS_HEADER), "unavailable"),
            (header::CACHE_CONTROL, "no-store"),
        ];
        return Ok((headers, Json(ServerEvent::matches(Vec::new()))).into_response());
    };

    let engine = state.config.engine.clone();
    let report = tokio::task::spawn_blocking(move || identify_clip(&samples, &engine, &index))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let bucket = duration_bucket(report.duration_secs, state.config.duration_bucket_secs);
    let key = CacheKey::derive(&report.summary, state.config.engine.sample_rate, bucket);
    log::info!(
        "Identified {:.1}s clip: {} matches (key {})",
        report.duration_secs,
        report.matches.len(),
        key
    );

    let headers = [
        (HeaderName::from_static(CACHE_KEY_HEADER), key.to_string()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.config.cache_ttl_secs),
        ),
    ];
    Ok((headers, Json(ServerEvent::matches(report.matches))).into_response())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeyRequest {
    pub summary_hex: String,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKeyResponse {
    pub cache_key: CacheKey,
    pub duration_bucket: u32,
}

async fn cache_key(
    State(state): State<AppState>,
    Json(request): Json<CacheKeyRequest>,
) -> Result<Json<CacheKeyResponse>, ApiError> {
    let summary = FingerprintSummary::from_hex(&request.summary_hex)
        .map_err(|e| ApiError::BadRequest(format!("summary_hex: {}", e)))?;
    let bucket = duration_bucket(request.duration_secs, state.config.duration_bucket_secs);
    Ok(Json(CacheKeyResponse {
        cache_key: CacheKey::derive(&summary, request.sample_rate, bucket),
        duration_bucket: bucket,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub index_version: Option<u64>,
    pub active_sessions: usize,
    pub max_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        index_version: state.index.current_version(),
        active_sessions: state.pool.active(),
        max_sessions: state.pool.limit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tunematch_core::audio::encode_pcm_s16le;
    use tunematch_core::{synth, EngineConfig, Extractor, IndexBuilder, TrackInfo};

    fn state_with_track(config: ServerConfig) -> (AppState, Vec<f32>) {
        let extractor = Extractor::new(&config.engine);
        let track = synth::melody(1, 60.0, config.engine.sample_rate);
        let mut builder = IndexBuilder::new(&config.engine);
        builder.add_track(
            TrackInfo {
                track_id: 1,
                title: "A".to_string(),
                duration_ms: 60_000,
                source_path: String::new(),
            },
            &extractor.fingerprint_track(&track),
        );
        let index = Arc::new(IndexHandle::with_index(builder.build(2)));
        (AppState::new(config, index), track)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_index_and_sessions() {
        let state = AppState::new(ServerConfig::default(), Arc::new(IndexHandle::new()));
        let _permit = state.pool.try_admit().unwrap();

        let Json(health) = health(State(state)).await;
        assert_eq!(health.index_version, None);
        assert_eq!(health.active_sessions, 1);
        assert_eq!(health.max_sessions, 64);
    }

    #[tokio::test]
    async fn test_identify_sets_cache_headers() {
        let (state, track) = state_with_track(ServerConfig::default());
        let clip = encode_pcm_s16le(&track[20 * 8_000..25 * 8_000]);

        let response = identify(State(state.clone()), Bytes::from(clip.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let key = response.headers()[CACHE_KEY_HEADER].to_str().unwrap().to_string();
        assert_eq!(key.len(), 32);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL].to_str().unwrap(),
            "public, max-age=300"
        );

        match body_json::<ServerEvent>(response).await {
            ServerEvent::Match { data } => {
                assert_eq!(data.matches.len(), 1);
                assert_eq!(data.matches[0].title, "A");
                assert!((19.0..21.0).contains(&data.matches[0].start_time));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let again = identify(State(state), Bytes::from(clip)).await.unwrap();
        assert_eq!(again.headers()[CACHE_KEY_HEADER].to_str().unwrap(), key);
    }

    #[tokio::test]
    async fn test_identify_rejects_bad_input() {
        let (state, _) = state_with_track(ServerConfig::default());
        let err = identify(State(state), Bytes::from_static(&[1, 2, 3]))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_identify_without_index_is_empty_and_uncached() {
        let (_, track) = state_with_track(ServerConfig::default());
        let empty = AppState::new(ServerConfig::default(), Arc::new(IndexHandle::new()));
        let clip = encode_pcm_s16le(&track[20 * 8_000..25 * 8_000]);

        let response = identify(State(empty), Bytes::from(clip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL].to_str().unwrap(),
            "no-store"
        );
        assert_eq!(
            response.headers()[INDEX_STATUS_HEADER].to_str().unwrap(),
            "unavailable"
        );
        assert!(response.headers().get(CACHE_KEY_HEADER).is_none());

        match body_json::<ServerEvent>(response).await {
            ServerEvent::Match { data } => assert!(data.matches.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cache_key_endpoint() {
        let state = AppState::new(ServerConfig::default(), Arc::new(IndexHandle::new()));
        let request = CacheKeyRequest {
            summary_hex: "00010203".to_string(),
            sample_rate: 8000,
            duration_secs: 12.0,
        };

        let Json(response) = cache_key(State(state.clone()), Json(request.clone()))
            .await
            .unwrap();
        assert_eq!(response.duration_bucket, 2);
        assert_eq!(
            response.cache_key,
            CacheKey::derive(&FingerprintSummary::from_bytes(vec![0, 1, 2, 3]), 8000, 2)
        );

        let bad = CacheKeyRequest {
            summary_hex: "xyz".to_string(),
            ..request
        };
        let err = cache_key(State(state), Json(bad)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    async fn spawn_server(state: AppState) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_listener(listener, state));
        addr
    }

    async fn next_event<S>(ws: &mut S) -> ServerEvent
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(30), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = message {
                return ServerEvent::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_stream_is_identified() {
        let (state, track) = state_with_track(ServerConfig::default());
        let addr = spawn_server(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        match next_event(&mut ws).await {
            ServerEvent::Status { index_version, .. } => assert_eq!(index_version, Some(2)),
            other => panic!("expected status, got {:?}", other),
        }

        for second in 30..33 {
            let chunk = encode_pcm_s16le(&track[second * 8_000..(second + 1) * 8_000]);
            ws.send(WsMessage::Binary(chunk.into())).await.unwrap();
        }

        let result = loop {
            if let ServerEvent::Match { data } = next_event(&mut ws).await {
                break data.matches[0].clone();
            }
        };
        assert_eq!(result.title, "A");
        assert_eq!(result.index_version, 2);
        assert!((29.0..31.0).contains(&result.start_time));

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_websocket_rejected_at_capacity() {
        let config = ServerConfig {
            max_sessions: 1,
            ..Default::default()
        };
        let addr = spawn_server(AppState::new(config, Arc::new(IndexHandle::new()))).await;
        let url = format!("ws://{}/ws", addr);

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_event(&mut first).await.kind(), "status");

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        match next_event(&mut second).await {
            ServerEvent::Error { message } => assert!(message.contains("capacity"), "{}", message),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_engine_defaults_flow_into_settings() {
        let state = AppState::new(ServerConfig::default(), Arc::new(IndexHandle::new()));
        assert_eq!(state.settings.engine, EngineConfig::default());
        assert_eq!(state.settings.max_in_flight_windows, 2);
        assert_eq!(state.settings.outbound_queue, 32);
    }
}
