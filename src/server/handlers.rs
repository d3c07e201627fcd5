// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! HTTP request handlers
//!
//! Inference runs on the blocking pool; the async workers only validate and
//! marshal.

use super::{
    request_id, ApiResponse, AppState, DatasetQuery, DatasetViewResponse, DetectRequest,
    GenerateRequest, HealthResponse, Result, ServerError,
};
use crate::datasets::{
    clamp_sample_count, sample_records, DatasetView, DatasetRecord, DETECTOR_CSV_EXPORT,
    FAKE_TEXT_EXPORT, SAMPLE_COUNT_DEFAULT,
};
use crate::pipeline::{
    is_blank, ClassificationResult, ComparisonPipeline, GenerationParams, GenerationResult,
    SideBySide, EMPTY_PROMPT_WARNING, EMPTY_TEXT_WARNING, MAX_LENGTH_RANGE, TEMPERATURE_RANGE,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// Single-page comparison UI
pub async fn index() -> Html<&'static str> {
    Html(include_str!("page.html"))
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        device: state.pipeline.registry().device_name().to_string(),
        datasets_loaded: state.datasets.is_some(),
        models: state.pipeline.registry().models(),
    };

    (StatusCode::OK, Json(health))
}

/// Run `job` against the pipeline off the async workers
async fn run_blocking<T, F>(pipeline: Arc<ComparisonPipeline>, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ComparisonPipeline) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || job(&pipeline))
        .await
        .map_err(|e| ServerError::Internal(format!("inference task aborted: {}", e)))?
        .map_err(|e| ServerError::Inference(format!("{:#}", e)))
}

/// Classify the submitted text with both detectors
pub async fn detect(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<SideBySide<ClassificationResult>>>> {
    let Json(payload) = payload?;
    if is_blank(&payload.text) {
        return Err(ServerError::Validation(EMPTY_TEXT_WARNING.to_string()));
    }

    let text = payload.text;
    let results = run_blocking(state.pipeline.clone(), move |p| p.compare_detection(&text)).await?;
    Ok(Json(ApiResponse::success(results, &request_id())))
}

/// Continue the prompt with both generators and score each output
pub async fn generate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<SideBySide<GenerationResult>>>> {
    let Json(payload) = payload?;
    if is_blank(&payload.prompt) {
        return Err(ServerError::Validation(EMPTY_PROMPT_WARNING.to_string()));
    }

    let defaults = GenerationParams::default();
    let params = GenerationParams {
        max_length: payload.max_length.unwrap_or(defaults.max_length),
        temperature: payload.temperature.unwrap_or(defaults.temperature),
    };
    if !params.within_ui_bounds() {
        return Err(ServerError::Validation(format!(
            "max_length must be within {}..={} and temperature within {}..={}",
            MAX_LENGTH_RANGE.0, MAX_LENGTH_RANGE.1, TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1
        )));
    }

    let prompt = payload.prompt;
    let results =
        run_blocking(state.pipeline.clone(), move |p| p.compare_generation(&prompt, params)).await?;
    Ok(Json(ApiResponse::success(results, &request_id())))
}

/// Random sample of one dataset view
pub async fn dataset_view(
    State(state): State<AppState>,
    query: std::result::Result<Query<DatasetQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<DatasetViewResponse>>> {
    let Query(query) = query?;
    let catalog = state.catalog()?;
    let view = match query.view.as_deref() {
        Some(name) => name
            .parse::<DatasetView>()
            .map_err(|e| ServerError::Validation(e.to_string()))?,
        None => DatasetView::AllCombined,
    };
    let samples = clamp_sample_count(query.samples.unwrap_or(SAMPLE_COUNT_DEFAULT));

    let selected = catalog.view(view);
    let records: Vec<DatasetRecord> = {
        let mut rng = state.sample_rng.lock();
        sample_records(&selected, samples, &mut *rng)
            .into_iter()
            .cloned()
            .collect()
    };

    let response = DatasetViewResponse {
        view: view.display_name().to_string(),
        total_records: selected.len(),
        records,
    };
    Ok(Json(ApiResponse::success(response, &request_id())))
}

fn attachment(filename: &str, content_type: &'static str, body: String) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", filename);
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

/// Fake records from both sources as newline-joined plain text
pub async fn export_fake_text(State(state): State<AppState>) -> Result<Response> {
    let body = state.catalog()?.export_fake_text();
    Ok(attachment(FAKE_TEXT_EXPORT, "text/plain; charset=utf-8", body))
}

/// Combined records as `text,label` CSV for detector training
pub async fn export_detector_csv(State(state): State<AppState>) -> Result<Response> {
    let body = state
        .catalog()?
        .export_detector_csv()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(attachment(DETECTOR_CSV_EXPORT, "text/csv; charset=utf-8", body))
}
