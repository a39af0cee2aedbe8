//! HTTP front end
//!
//! `POST /api/v1/sensor-data` synthesizes, attests and submits one record;
//! `GET /health` reports liveness.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tce_core::{
    AttestationSink, Correlation, ErrorKind, KeyId, KeyProvider, Oracle, OracleError,
    OracleRequest, OracleResponse, SynthesisRequest,
};
use tower_http::trace::TraceLayer;

/// State shared across handlers
pub struct AppState<P> {
    pub oracle: Oracle<P>,
    pub sink: Arc<dyn AttestationSink>,
}

pub type SharedState<P> = Arc<AppState<P>>;

pub fn create_router<P: KeyProvider + 'static>(state: SharedState<P>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sensor-data", post(sensor_data::<P>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataRequest {
    #[serde(rename = "shipment_id")]
    pub shipment_id: String,
    #[serde(default)]
    pub tce_id: Option<String>,
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub mass_kg: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub prev_tce_ids: Vec<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub key_id: Option<KeyId>,
}

impl From<SensorDataRequest> for OracleRequest {
    fn from(req: SensorDataRequest) -> Self {
        let mut synthesis = SynthesisRequest::new(req.shipment_id).prev_tce_ids(req.prev_tce_ids);
        if let Some(id) = req.tce_id {
            synthesis = synthesis.record_id(id);
        }
        if let Some(mass) = req.mass_kg {
            synthesis = synthesis.mass_kg(mass);
        }
        if let Some(distance) = req.distance_km {
            synthesis = synthesis.distance_km(distance);
        }
        if let Some(start) = req.start_time {
            synthesis = synthesis.start_time(start);
        }

        let mut request = OracleRequest::new(synthesis).correlation(req.correlation);
        if let Some(id) = req.key_id {
            request = request.key_id(id);
        }
        request
    }
}

/// POST /api/v1/sensor-data
async fn sensor_data<P: KeyProvider + 'static>(
    State(state): State<SharedState<P>>,
    Json(req): Json<SensorDataRequest>,
) -> Result<Json<OracleResponse>, ApiError> {
    let request = OracleRequest::from(req);
    let response = state
        .oracle
        .attest_and_submit(&request, state.sink.as_ref())
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

/// Maps pipeline failures onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(OracleError);

impl From<OracleError> for ApiError {
    fn from(e: OracleError) -> Self {
        ApiError(e)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::InvariantViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::KeyNotFound => StatusCode::NOT_FOUND,
        ErrorKind::SinkSubmissionError => StatusCode::BAD_GATEWAY,
        ErrorKind::SerializationError | ErrorKind::CryptoLoadError | ErrorKind::SigningError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = %kind, "sensor-data request failed");
        }
        let body = ErrorBody {
            error: kind,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tce_core::{
        KeyStore, MemoryKeyProvider, MemorySink, SigningConfig, Verifier,
    };
    use tower::ServiceExt;

    fn state(pool: u32) -> SharedState<MemoryKeyProvider> {
        let keys = KeyStore::new(MemoryKeyProvider::new()).with_key_bits(1024);
        let oracle = Oracle::new(keys, SigningConfig::default())
            .with_pool_size(pool)
            .with_seed(3);
        if pool > 0 {
            oracle.init().unwrap();
        }
        Arc::new(AppState {
            oracle,
            sink: Arc::new(MemorySink::new()),
        })
    }

    async fn post_json(
        router: Router,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sensor-data")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(state(0))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sensor_data_round_trip() {
        let (status, body) = post_json(
            create_router(state(1)),
            serde_json::json!({
                "shipment_id": "SHIP_1",
                "tceId": "TCE_42",
                "camundaProcessInstanceKey": "2251799813685249",
                "camundaActivityId": "Activity_sensor",
                "massKg": 5000.0,
                "distanceKm": 300.0,
                "keyId": "sensor1"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tceId"], "TCE_42");
        assert_eq!(body["shipmentId"], "SHIP_1");
        assert_eq!(body["camundaProcessInstanceKey"], "2251799813685249");
        assert_eq!(body["camundaActivityId"], "Activity_sensor");
        assert_eq!(body["keyId"], "sensor1");
        assert_eq!(body["receipt"]["proof"].as_str().unwrap().len(), 64);

        let record: serde_json::Value =
            serde_json::from_str(body["activityDataJson"].as_str().unwrap()).unwrap();
        assert_eq!(record["transportActivity"], "1500.000");

        let response: OracleResponse = serde_json::from_value(body).unwrap();
        Verifier::new().verify(&response.attestation).unwrap();
    }

    #[tokio::test]
    async fn test_empty_pool_is_404() {
        let (status, body) = post_json(
            create_router(state(0)),
            serde_json::json!({ "shipment_id": "SHIP_1" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "KeyNotFound");
    }

    #[tokio::test]
    async fn test_invalid_mass_is_400() {
        let (status, body) = post_json(
            create_router(state(1)),
            serde_json::json!({ "shipment_id": "SHIP_1", "massKg": -5.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidInput");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvariantViolation), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::SinkSubmissionError), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::CryptoLoadError), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
