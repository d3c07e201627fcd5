// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! HTTP presentation layer
//!
//! Serves the single-page comparison UI and the JSON endpoints behind it.
//! Blank input is rejected here, before any model is touched.

mod handlers;

pub use handlers::*;

use crate::datasets::{DatasetCatalog, DatasetRecord};
use crate::pipeline::ComparisonPipeline;
use crate::registry::ModelInfo;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Bind(_)
            | ServerError::Io(_)
            | ServerError::Inference(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body: ApiResponse<()> = ApiResponse::error(&self.to_string(), &request_id());
        (status, Json(body)).into_response()
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    /// User-visible warning or failure message
    pub error: Option<String>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: request_id.to_string(),
        }
    }

    pub fn error(message: &str, request_id: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            request_id: request_id.to_string(),
        }
    }
}

/// Generate a request ID
pub fn request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

// =============================================================================
// Request/Response DTOs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub device: String,
    pub datasets_loaded: bool,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetQuery {
    /// Display name or kebab-case id; defaults to "All Combined"
    pub view: Option<String>,
    pub samples: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetViewResponse {
    pub view: String,
    pub total_records: usize,
    pub records: Vec<DatasetRecord>,
}

// =============================================================================
// State and routing
// =============================================================================

/// Shared handler state; everything in it is read-only or internally locked
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ComparisonPipeline>,
    pub datasets: Option<Arc<DatasetCatalog>>,
    sample_rng: Arc<Mutex<ChaCha8Rng>>,
    started: Instant,
}

impl AppState {
    pub fn new(pipeline: ComparisonPipeline, datasets: Option<DatasetCatalog>, seed: u64) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            datasets: datasets.map(Arc::new),
            sample_rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn catalog(&self) -> Result<&DatasetCatalog> {
        self.datasets
            .as_deref()
            .ok_or_else(|| ServerError::NotFound("no dataset directory configured".to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health_check))
        .route("/api/detect", post(detect))
        .route("/api/generate", post(generate))
        .route("/api/datasets", get(dataset_view))
        .route("/api/datasets/export/fake-text", get(export_fake_text))
        .route("/api/datasets/export/detector-csv", get(export_detector_csv))
        .with_state(state)
}

/// Bind `address` and serve until the process is stopped
pub async fn serve(state: AppState, address: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Bind(format!("{}: {}", address, e)))?;
    tracing::info!("Serving comparison UI on http://{}", address);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
