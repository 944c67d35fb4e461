use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::error::WatcherError;
use crate::logging::{ErrorLogger, LogContext};
use crate::models::Transaction;
use crate::service::{ServiceStatus, WatchService};

const INVALID_SUBSCRIBE_PAYLOAD: &str = "Invalid payload. Address is required.";
const MISSING_ADDRESS_PARAM: &str = "Address query parameter is required";
const SUBSCRIBE_FAILED: &str = "Failed to subscribe";
const INTERNAL_ERROR: &str = "something went wrong at server side";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Server error: {0}")]
    Server(String),
}

impl From<&ApiError> for StatusCode {
    fn from(error: &ApiError) -> Self {
        match error {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        let message = match self {
            ApiError::BadRequest(message) | ApiError::Internal(message) | ApiError::Server(message) => message,
        };
        (status, Json(ApiResponse::<()>::failure(message))).into_response()
    }
}

/// Envelope shared by every endpoint
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body of `POST /subscribe`
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub address: Option<String>,
}

/// Query parameters for `GET /transactions`
#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub address: Option<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WatchService>,
}

/// Build the API router
pub fn router(service: Arc<WatchService>) -> Router {
    Router::new()
        .route("/current-block", get(get_current_block))
        .route("/subscribe", post(subscribe))
        .route("/transactions", get(get_transactions))
        .route("/status", get(get_status))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(AppState { service })
}

/// HTTP API server
pub struct ApiServer {
    service: Arc<WatchService>,
    pub host: String,
    pub port: u16,
}

impl ApiServer {
    pub fn new(service: Arc<WatchService>, host: String, port: u16) -> Self {
        Self { service, host, port }
    }

    pub async fn bind(&self) -> Result<TcpListener, ApiError> {
        let addr = format!("{}:{}", self.host, self.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ApiError::Server(format!("Failed to bind to {}: {}", addr, e)))
    }

    /// Serve on `listener` until `shutdown` resolves, then stop accepting and
    /// wait for in-flight requests
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            log::info!("HTTP API server listening on {}", addr);
        }

        axum::serve(listener, router(self.service))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApiError::Server(format!("Server error: {}", e)))?;

        log::info!("HTTP API server stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn start<F>(self, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

fn internal_error(error: &WatcherError, operation: &str) -> ApiError {
    ErrorLogger::log_error(error, Some(LogContext::new("api", operation)));
    ApiError::Internal(INTERNAL_ERROR.to_string())
}

/// GET /current-block - Number of the last fully processed block
pub async fn get_current_block(State(state): State<AppState>) -> Result<Json<ApiResponse<u64>>, ApiError> {
    let number = state
        .service
        .current_block()
        .map_err(|e| internal_error(&e, "current_block"))?;
    Ok(Json(ApiResponse::success(number)))
}

/// POST /subscribe - Start watching an address
pub async fn subscribe(State(state): State<AppState>, body: Bytes) -> Result<Json<ApiResponse<String>>, ApiError> {
    let request: SubscribeRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest(INVALID_SUBSCRIBE_PAYLOAD.to_string()))?;

    let address = request
        .address
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(INVALID_SUBSCRIBE_PAYLOAD.to_string()))?;

    match state.service.subscribe(&address) {
        Ok(_) => Ok(Json(ApiResponse::success("Subscription successful".to_string()))),
        Err(e) if e.is_client_error() => Err(ApiError::BadRequest(INVALID_SUBSCRIBE_PAYLOAD.to_string())),
        Err(e) => {
            ErrorLogger::log_error(&e, Some(LogContext::new("api", "subscribe").with_address(&address)));
            Err(ApiError::Internal(SUBSCRIBE_FAILED.to_string()))
        }
    }
}

/// GET /transactions - Recent transfers of an address
pub async fn get_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>, ApiError> {
    let address = query
        .address
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(MISSING_ADDRESS_PARAM.to_string()))?;

    match state.service.transactions(&address).await {
        Ok(transactions) => Ok(Json(ApiResponse::success(transactions))),
        Err(e) if e.is_client_error() => Err(ApiError::BadRequest(e.to_string())),
        Err(e) => Err(internal_error(&e, "transactions")),
    }
}

/// GET /status - Listener state and watch counts
pub async fn get_status(State(state): State<AppState>) -> Result<Json<ApiResponse<ServiceStatus>>, ApiError> {
    let status = state.service.status().map_err(|e| internal_error(&e, "status"))?;
    Ok(Json(ApiResponse::success(status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_omits_absent_fields() {
        let ok = serde_json::to_value(ApiResponse::success(7u64)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 7}));

        let failed = serde_json::to_value(ApiResponse::<()>::failure("nope")).unwrap();
        assert_eq!(failed, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            StatusCode::from(&ApiError::BadRequest("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StatusCode::from(&ApiError::Internal("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_subscribe_request_accepts_missing_address() {
        let request: SubscribeRequest = serde_json::from_str("{}").unwrap();
        assert!(request.address.is_none());
    }
}
