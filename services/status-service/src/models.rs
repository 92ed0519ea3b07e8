use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub ficheiro: String,
    pub total_historicos: usize,
}

#[derive(Serialize)]
pub struct HistoryIndexResponse {
    pub historicos: Vec<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub mensagem: String,
}

impl ErrorResponse {
    pub fn new(mensagem: impl Into<String>) -> Self {
        Self {
            status: "erro",
            mensagem: mensagem.into(),
        }
    }
}

/// Per-adapter health record carried in the optional `adapters` block.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterHealth {
    pub status: Option<String>,
    pub items: Option<i64>,
    pub last_check: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub response_time: Option<Timing>,
    pub execution_duration: Option<Timing>,
}

/// Producers send durations either as milliseconds or as preformatted text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Timing {
    Millis(i64),
    Text(String),
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Millis(value) => write!(f, "{value}ms"),
            Timing::Text(value) => write!(f, "{value}"),
        }
    }
}
