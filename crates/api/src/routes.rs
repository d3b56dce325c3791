use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tickwise_core::{IndicatorSpec, InstanceId, Sample};
use tickwise_engine::EngineError;
use tracing::warn;

type ApiResponse = (StatusCode, Json<Value>);

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Indicator registry
        .route("/indicators", get(list_indicators).post(register_indicator))
        .route(
            "/indicators/{id}",
            get(get_indicator).delete(deregister_indicator),
        )
        .route("/indicators/{id}/reset", post(reset_indicator))
        // Feed ingestion
        .route("/samples", post(publish_samples))
        // Scheduler
        .route("/stats", get(stats))
        .route("/scheduler", get(scheduler_status))
}

fn error_response(status: StatusCode, message: impl ToString) -> ApiResponse {
    (status, Json(json!({ "error": message.to_string() })))
}

fn engine_error(e: EngineError) -> ApiResponse {
    match e {
        EngineError::Config(e) => error_response(StatusCode::BAD_REQUEST, e),
        other => {
            warn!(error = %other, "Registry operation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other)
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> ApiResponse {
    let scheduler = state.scheduler.state();
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "scheduler": scheduler,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "error": e.to_string(),
                "scheduler": scheduler,
            })),
        ),
    }
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

async fn list_indicators(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.registry.list_active() {
        Ok(list) => (StatusCode::OK, Json(to_value(list))),
        Err(e) => engine_error(e),
    }
}

async fn register_indicator(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<IndicatorSpec>,
) -> ApiResponse {
    let existing = match state.registry.find(&spec) {
        Ok(id) => id,
        Err(e) => return engine_error(e),
    };
    match state.registry.register(spec.clone()) {
        Ok(id) => {
            let status = if existing.is_some() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(json!({ "id": id, "spec": spec })))
        }
        Err(e) => engine_error(e),
    }
}

async fn get_indicator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResponse {
    match state.registry.get(InstanceId(id)) {
        Ok(Some(descriptor)) => (StatusCode::OK, Json(to_value(descriptor))),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Indicator not found"),
        Err(e) => engine_error(e),
    }
}

async fn deregister_indicator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResponse {
    match state.registry.deregister(InstanceId(id)) {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "status": "deregistered", "id": id })),
        ),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Indicator not found"),
        Err(e) => engine_error(e),
    }
}

async fn reset_indicator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResponse {
    match state.registry.reset(InstanceId(id)) {
        Ok(true) => (StatusCode::OK, Json(json!({ "status": "reset", "id": id }))),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Indicator not found"),
        Err(e) => engine_error(e),
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SampleInput {
    symbol: String,
    price: f64,
    #[serde(default)]
    volume: f64,
    /// Defaults to receive time.
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SampleBatch {
    One(SampleInput),
    Many(Vec<SampleInput>),
}

async fn publish_samples(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<SampleBatch>,
) -> ApiResponse {
    let inputs = match batch {
        SampleBatch::One(input) => vec![input],
        SampleBatch::Many(inputs) => inputs,
    };
    if inputs.iter().any(|s| s.symbol.trim().is_empty()) {
        return error_response(StatusCode::BAD_REQUEST, "Symbol must not be empty");
    }

    let received_at = Utc::now();
    let mut accepted = 0usize;
    let mut ignored = 0usize;
    for input in inputs {
        let sample = Sample::new(
            input.symbol,
            input.price,
            input.volume,
            input.timestamp.unwrap_or(received_at),
        );
        match state.feed.publish(sample) {
            Ok(true) => accepted += 1,
            Ok(false) => ignored += 1,
            Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": accepted, "ignored": ignored })),
    )
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

async fn stats(State(state): State<Arc<AppState>>) -> ApiResponse {
    (StatusCode::OK, Json(to_value(state.scheduler.stats())))
}

async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResponse {
    let generation = match state.registry.generation() {
        Ok(generation) => generation,
        Err(e) => return engine_error(e),
    };
    (
        StatusCode::OK,
        Json(json!({
            "state": state.scheduler.state(),
            "instances": state.registry.len(),
            "generation": generation,
            "symbols": state.feed.symbols(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use crate::{build_router, AppState};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tickwise_core::TimeSeriesStore;
    use tickwise_data::MemoryStore;
    use tickwise_engine::{
        IndicatorRegistry, LatestSampleFeed, Scheduler, SchedulerConfig, WriterConfig,
    };
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let registry = Arc::new(IndicatorRegistry::new());
        let feed = Arc::new(LatestSampleFeed::new());
        let store: Arc<dyn TimeSeriesStore> = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            WriterConfig::default(),
            Arc::clone(&registry),
            feed.clone(),
            Arc::clone(&store),
        ));
        Arc::new(AppState::new(registry, feed, scheduler, store))
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = build_router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state();
        let (status, body) = send(&state, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler"], "stopped");
    }

    #[tokio::test]
    async fn test_register_get_reset_delete() {
        let state = test_state();
        let spec = json!({ "symbol": "BTC_USDT", "type": "ema", "period": 20 });

        let (status, body) = send(&state, Method::POST, "/api/indicators", Some(spec.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_u64().unwrap();

        // Same spec again is the same instance
        let (status, body) = send(&state, Method::POST, "/api/indicators", Some(spec)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"].as_u64(), Some(id));

        let uri = format!("/api/indicators/{}", id);
        let (status, body) = send(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "ema");
        assert_eq!(body["ready"], false);

        let (status, _) = send(&state, Method::POST, &format!("{}/reset", uri), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(&state, Method::GET, "/api/indicators", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_invalid_indicator_rejected() {
        let state = test_state();
        let spec = json!({ "symbol": "BTC_USDT", "type": "sma", "period": 0 });
        let (status, body) = send(&state, Method::POST, "/api/indicators", Some(spec)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sma"));
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_publish_samples() {
        let state = test_state();
        let batch = json!([
            { "symbol": "BTC_USDT", "price": 42000.0, "volume": 0.5, "timestamp": "2024-01-01T00:00:01Z" },
            { "symbol": "BTC_USDT", "price": 41999.0, "timestamp": "2024-01-01T00:00:00Z" },
        ]);
        let (status, body) = send(&state, Method::POST, "/api/samples", Some(batch)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], 1);
        assert_eq!(body["ignored"], 1);

        let single = json!({ "symbol": "ETH_USDT", "price": 2000.0 });
        let (status, _) = send(&state, Method::POST, "/api/samples", Some(single)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (_, body) = send(&state, Method::GET, "/api/scheduler", None).await;
        assert_eq!(body["symbols"], json!(["BTC_USDT", "ETH_USDT"]));
        assert_eq!(body["state"], "stopped");

        let empty = json!({ "symbol": "", "price": 1.0 });
        let (status, _) = send(&state, Method::POST, "/api/samples", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats() {
        let state = test_state();
        let (status, body) = send(&state, Method::GET, "/api/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticks"], 0);
        assert_eq!(body["rows_written"], 0);
    }
}
