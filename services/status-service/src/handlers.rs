use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::ErrorResponse;
use crate::service;
use crate::state::AppState;

const JSON_UTF8: &str = "application/json; charset=utf-8";

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    // Ready once the data directory is reachable.
    match tokio::fs::metadata(state.store.root()).await {
        Ok(metadata) if metadata.is_dir() => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn status(State(state): State<AppState>) -> Response {
    match service::current_status(&state).await {
        Ok(snapshot) => json_response(StatusCode::OK, snapshot),
        Err(err) => json_response(err.status, err.body),
    }
}

pub async fn history(State(state): State<AppState>) -> Response {
    match service::history_index(&state).await {
        Ok(index) => json_response(StatusCode::OK, index),
        Err(err) => json_response(err.status, err.body),
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = service::unreadable_body(&state, &headers, &rejection);
            return json_response(err.status, err.body);
        }
    };
    match service::ingest(&state, &headers, &body).await {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => json_response(err.status, err.body),
    }
}

pub async fn not_found() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        ErrorResponse::new("Endpoint não encontrado"),
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8))],
        Json(body),
    )
        .into_response()
}
