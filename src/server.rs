//! ==============================================================================
//! server.rs - http api
//! ==============================================================================
//!
//! routes:
//!     GET  /api/data               current snapshot, broker first, local cache second
//!     GET  /api/toggle?device=     flip pump or fan through the broker
//!     POST /api/logs               partial sensor report from the field device
//!     GET  /api/readings?limit=    history, newest first
//!
//! shared state:
//!     `AppContext` is cloned into every handler. the two pieces of mutable
//!     state (device mirror inside the gateway, sensor cache here) each sit
//!     behind a tokio mutex; the readings store is a connection pool.
//!
//! ==============================================================================

use crate::cache::{SensorCache, SensorReport};
use crate::domain::{CachedSnapshot, Device, NewReading, Reading, Snapshot, Source, LOCAL_CACHE_SOURCE};
use crate::error::ApiError;
use crate::gateway::GatewayClient;
use crate::store::{ReadingsStore, DEFAULT_LIMIT};

use axum::{
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppContext {
    pub gateway: Arc<GatewayClient>,
    pub sensors: Arc<Mutex<SensorCache>>,
    pub store: ReadingsStore,
}

impl AppContext {
    pub fn new(gateway: GatewayClient, store: ReadingsStore) -> Self {
        Self { gateway: Arc::new(gateway), sensors: Arc::new(Mutex::new(SensorCache::default())), store }
    }

    /// append a reading; failures are logged and never reach the client
    async fn record(&self, reading: NewReading) {
        let source = reading.source.as_str();
        if let Err(e) = self.store.append(&reading).await {
            warn!("[STORE] Failed to save reading from {}: {}", source, e);
        }
    }
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/data", get(data_handler))
        .route("/api/toggle", get(toggle_handler))
        .route("/api/logs", post(logs_handler))
        .route("/api/readings", get(readings_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ==============================================================================
// handlers
// ==============================================================================

/// broker snapshot, or the cached device report when the broker is down
pub async fn get_current(ctx: &AppContext) -> Result<Response, ApiError> {
    match ctx.gateway.fetch_current().await {
        Ok(snapshot) => {
            ctx.record(NewReading::from_snapshot(&snapshot, Source::Blynk)).await;
            debug!("[API DATA] {:?}", snapshot);
            Ok(Json::<Snapshot>(snapshot).into_response())
        }
        Err(e) => {
            warn!("[API DATA] Failed to fetch from broker: {}", e);
            let cached = ctx.sensors.lock().await.read_snapshot();
            let Some(values) = cached else {
                return Err(ApiError::Unavailable);
            };
            let devices = ctx.gateway.devices().await;
            let fallback = CachedSnapshot {
                snapshot: values.to_snapshot(devices),
                source: LOCAL_CACHE_SOURCE,
                timestamp: values.timestamp,
            };
            debug!("[API DATA - FALLBACK] {:?}", fallback);
            Ok(Json(fallback).into_response())
        }
    }
}

async fn data_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    get_current(&ctx).await
}

#[derive(Deserialize)]
struct ToggleParams {
    #[serde(default)]
    device: String,
}

/// GET /api/toggle?device=pump|fan
async fn toggle_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<ToggleParams>,
) -> Result<Json<Value>, ApiError> {
    let device: Device = params.device.parse().map_err(ApiError::InvalidDevice)?;

    match ctx.gateway.toggle_device(device).await {
        Ok(on) => {
            let mut body = Map::new();
            body.insert(device.as_str().to_string(), Value::Bool(on));
            Ok(Json(Value::Object(body)))
        }
        Err(e) => {
            warn!("[API TOGGLE] Failed to toggle {}: {}", device, e);
            Err(ApiError::Upstream(e))
        }
    }
}

/// merge a field-device report into the cache and log the merged state
pub async fn ingest_report(ctx: &AppContext, body: &[u8]) -> Result<(), ApiError> {
    let report = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) if !map.is_empty() => SensorReport::from_json(&map),
        _ => return Err(ApiError::EmptyReport),
    };
    info!("[DEVICE LOG] {:?}", report);

    let merged = {
        let mut sensors = ctx.sensors.lock().await;
        sensors.ingest(report);
        sensors.clone()
    };
    let devices = ctx.gateway.devices().await;

    ctx.record(NewReading {
        temperature: merged.temperature,
        humidity: merged.humidity,
        soil: merged.soil,
        pump: devices.pump,
        fan: devices.fan,
        source: Source::Esp32,
    })
    .await;
    Ok(())
}

/// POST /api/logs
async fn logs_handler(State(ctx): State<AppContext>, body: Bytes) -> Result<Json<Value>, ApiError> {
    ingest_report(&ctx, &body).await?;
    Ok(Json(json!({ "status": "success" })))
}

/// non-integer limits silently fall back to the default
pub fn parse_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(DEFAULT_LIMIT)
}

#[derive(Deserialize)]
struct ReadingsParams {
    limit: Option<String>,
}

/// GET /api/readings?limit=N
async fn readings_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<ReadingsParams>,
) -> Json<Vec<Reading>> {
    let limit = parse_limit(params.limit.as_deref());
    match ctx.store.list_recent(limit).await {
        Ok(readings) => Json(readings),
        Err(e) => {
            // an unreadable history is shown as empty rather than failing the page
            warn!("[API READINGS] Failed to query readings: {}", e);
            Json(Vec::new())
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::broker::BrokerResponse;
    use crate::config::ChannelConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn context(broker: Arc<MockBroker>) -> AppContext {
        let gateway = GatewayClient::new(broker, ChannelConfig::default());
        AppContext::new(gateway, ReadingsStore::in_memory().await.unwrap())
    }

    async fn call(ctx: &AppContext, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(ctx.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_logs(body: &str) -> Request<Body> {
        Request::post("/api/logs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_data_from_broker_is_recorded() {
        let broker = Arc::new(MockBroker::with_batch(json!({
            "V3": 25.04, "V4": 60, "V5": 72, "V6": 0, "V7": 1
        })));
        let ctx = context(broker).await;

        let (status, body) = call(&ctx, get_req("/api/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "temperature": 25.0, "humidity": 60.0, "soil": 72,
                "soilStatus": "wet", "pump": false, "fan": true
            })
        );

        let history = ctx.store.list_recent(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, Source::Blynk);
        assert_eq!(history[0].soil, Some(72));
        assert!(history[0].fan);
    }

    #[tokio::test]
    async fn test_data_unavailable_when_broker_down_and_cache_empty() {
        let ctx = context(Arc::new(MockBroker::unreachable())).await;

        let (status, body) = call(&ctx, get_req("/api/data")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
        assert!(ctx.store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_data_falls_back_to_cache() {
        let ctx = context(Arc::new(MockBroker::unreachable())).await;

        let (status, _) = call(
            &ctx,
            post_logs(r#"{"temperature": 22.46, "humidity": 51, "moisture": 35, "timestamp": "2025-06-01 10:00"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&ctx, get_req("/api/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "local-cache");
        assert_eq!(body["temperature"], 22.5);
        assert_eq!(body["soil"], 35);
        assert_eq!(body["soilStatus"], "dry");
        assert_eq!(body["pump"], false);
        assert_eq!(body["timestamp"], "2025-06-01 10:00");
    }

    #[tokio::test]
    async fn test_toggle_flips_and_reports() {
        let broker = Arc::new(MockBroker::default());
        broker.script_update(Ok(BrokerResponse::ok("")));
        let ctx = context(broker.clone()).await;

        let (status, body) = call(&ctx, get_req("/api/toggle?device=Pump")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "pump": true }));

        let (_, body) = call(&ctx, get_req("/api/toggle?device=pump")).await;
        assert_eq!(body, json!({ "pump": false }));
        assert_eq!(broker.calls(), vec!["update V6=1", "update V6=0"]);
    }

    #[tokio::test]
    async fn test_toggle_invalid_device_makes_no_broker_call() {
        let broker = Arc::new(MockBroker::default());
        let ctx = context(broker.clone()).await;

        let (status, body) = call(&ctx, get_req("/api/toggle?device=light")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("light"));

        let (status, _) = call(&ctx, get_req("/api/toggle")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_broker_failure_is_500() {
        let broker = Arc::new(MockBroker::default());
        broker.script_update(Ok(BrokerResponse { status: 503, body: "busy".into() }));
        let ctx = context(broker).await;

        let (status, body) = call(&ctx, get_req("/api/toggle?device=fan")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "broker returned HTTP 503: busy");
        assert!(!ctx.gateway.devices().await.fan);
    }

    #[tokio::test]
    async fn test_logs_rejects_empty_bodies() {
        let ctx = context(Arc::new(MockBroker::default())).await;
        for body in ["", "{}", "null", "[1,2]", "not json"] {
            let (status, json) = call(&ctx, post_logs(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
            assert_eq!(json["status"], "error");
        }
        assert!(ctx.store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logs_records_merged_state() {
        let ctx = context(Arc::new(MockBroker::default())).await;

        call(&ctx, post_logs(r#"{"temperature": 20, "humidity": 40, "soil": 10}"#)).await;
        let (status, body) = call(&ctx, post_logs(r#"{"temperature": 22.5, "humidity": "n/a"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "success" }));

        let history = ctx.store.list_recent(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, Source::Esp32);
        assert_eq!(history[0].temperature, Some(22.5));
        assert_eq!(history[0].humidity, Some(40.0));
        assert_eq!(history[0].soil, Some(10));
    }

    #[tokio::test]
    async fn test_readings_limit() {
        let ctx = context(Arc::new(MockBroker::default())).await;
        for t in ["1", "2", "3"] {
            call(&ctx, post_logs(&format!(r#"{{"temperature": {}}}"#, t))).await;
        }

        let (status, body) = call(&ctx, get_req("/api/readings?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["temperature"], 3.0);
        assert_eq!(rows[1]["temperature"], 2.0);
        assert_eq!(rows[0]["source"], "esp32");
        assert!(rows[0]["timestamp"].as_str().unwrap().contains('T'));

        let (_, body) = call(&ctx, get_req("/api/readings?limit=lots")).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), 100);
        assert_eq!(parse_limit(Some("25")), 25);
        assert_eq!(parse_limit(Some(" 7 ")), 7);
        assert_eq!(parse_limit(Some("2.5")), 100);
        assert_eq!(parse_limit(Some("")), 100);
    }
}
