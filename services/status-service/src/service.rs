use axum::extract::rejection::BytesRejection;
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ledger::Recorded;
use crate::models::{AdapterHealth, ErrorResponse, HistoryIndexResponse, IngestResponse};
use crate::state::AppState;
use crate::store::{StoreError, StoreResult};
use crate::validation::{type_name, validate};

pub const CURRENT_SLOT: &str = "status.json";
pub const API_KEY_HEADER: &str = "x-api-key";

const STORE_FAILURE_MESSAGE: &str = "Falha interna ao gravar o estado";
const READ_FAILURE_MESSAGE: &str = "Falha interna ao ler o estado";

pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(message),
        }
    }

    fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Chave de API inválida")
    }

    fn malformed() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "JSON inválido")
    }

    fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

pub fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if state.config.api_key_matches(presented) {
        return Ok(());
    }
    tracing::warn!(
        key_present = presented.is_some(),
        "status submission rejected: invalid api key"
    );
    Err(ServiceError::forbidden())
}

/// Parses a request body that must hold a single JSON object.
pub fn parse_snapshot(body: &[u8]) -> Result<Map<String, Value>, ServiceError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => {
            tracing::debug!(kind = type_name(&other), "status submission is not an object");
            Err(ServiceError::malformed())
        }
        Err(err) => {
            tracing::debug!(error = %err, "status submission is not valid json");
            Err(ServiceError::malformed())
        }
    }
}

/// Maps a body that could not be buffered. The key is still checked first.
pub fn unreadable_body(
    state: &AppState,
    headers: &HeaderMap,
    rejection: &BytesRejection,
) -> ServiceError {
    if let Err(err) = authorize(state, headers) {
        return err;
    }
    let status = rejection.status();
    tracing::info!(
        status = status.as_u16(),
        error = %rejection,
        "status submission body rejected"
    );
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::new(status, "Pedido demasiado grande")
    } else {
        ServiceError::new(status, "JSON inválido")
    }
}

pub async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<IngestResponse, ServiceError> {
    authorize(state, headers)?;
    let fields = parse_snapshot(body)?;

    let mut snapshot = Value::Object(fields);
    if let Err(err) = validate(&snapshot) {
        tracing::info!(violations = ?err.violations, "status submission failed validation");
        return Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            format!("Schema inválido: {err}"),
        ));
    }

    let now = now_ms();
    if let Value::Object(fields) = &mut snapshot {
        fields
            .entry("generated_at")
            .or_insert_with(|| Value::from(now));
    }

    let recorded = persist(state, &snapshot, now).await.map_err(|err| {
        tracing::error!(error = %err, "status persistence failed");
        ServiceError::internal(STORE_FAILURE_MESSAGE)
    })?;

    log_adapters(&snapshot);
    tracing::info!(
        entry = recorded.entry.as_str(),
        total = recorded.total,
        "status updated"
    );

    Ok(IngestResponse {
        status: "ok",
        ficheiro: recorded.entry,
        total_historicos: recorded.total,
    })
}

async fn persist(state: &AppState, snapshot: &Value, now: u64) -> StoreResult<Recorded> {
    state.ledger.record(CURRENT_SLOT, snapshot, now).await
}

pub async fn current_status(state: &AppState) -> Result<Value, ServiceError> {
    match state.store.read(CURRENT_SLOT).await {
        Ok(snapshot) => Ok(snapshot),
        Err(StoreError::NotFound(_)) => Err(ServiceError::new(
            StatusCode::NOT_FOUND,
            "status.json não encontrado",
        )),
        Err(err) => {
            tracing::error!(error = %err, "reading current status failed");
            Err(ServiceError::internal(READ_FAILURE_MESSAGE))
        }
    }
}

pub async fn history_index(state: &AppState) -> Result<HistoryIndexResponse, ServiceError> {
    match state.ledger.index().await {
        Ok(historicos) => Ok(HistoryIndexResponse { historicos }),
        Err(err) => {
            tracing::error!(error = %err, "reading history index failed");
            Err(ServiceError::internal(READ_FAILURE_MESSAGE))
        }
    }
}

fn log_adapters(snapshot: &Value) {
    let Some(adapters) = snapshot.get("adapters").and_then(Value::as_object) else {
        return;
    };
    for (adapter, record) in adapters {
        let health = match serde_json::from_value::<AdapterHealth>(record.clone()) {
            Ok(health) => health,
            Err(err) => {
                tracing::debug!(
                    adapter = adapter.as_str(),
                    error = %err,
                    "adapter health record not understood"
                );
                continue;
            }
        };
        let response_time = health.response_time.as_ref().map(ToString::to_string);
        let execution_duration = health.execution_duration.as_ref().map(ToString::to_string);
        tracing::debug!(
            adapter = adapter.as_str(),
            status = health.status.as_deref().unwrap_or("-"),
            items = health.items,
            last_check = health.last_check.as_deref(),
            response_time = response_time.as_deref(),
            execution_duration = execution_duration.as_deref(),
            error = health.error.as_deref(),
            error_type = health.error_type.as_deref(),
            "adapter health"
        );
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
