//! Normalization of heterogeneous upstream payloads
//!
//! Upstream services disagree on status vocabulary and on where they put
//! summaries, papers, and artifacts. Everything is mapped into one shape
//! before it is stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::{JobKind, JobStatus};

/// Map an upstream status string onto the canonical four states
pub fn normalize_status(raw: &str) -> JobStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" | "queued" => JobStatus::Pending,
        "processing" | "running" | "in_progress" => JobStatus::Running,
        "completed" | "success" | "succeeded" => JobStatus::Completed,
        _ => JobStatus::Failed,
    }
}

/// Stable shape stored for every polled job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub papers: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Look a key up at the top level, then inside `result`/`data`/`output`
fn lookup<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    payload
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| {
            ["result", "data", "output"]
                .iter()
                .filter_map(|wrapper| payload.get(*wrapper))
                .find_map(|inner| inner.get(key).filter(|v| !v.is_null()))
        })
}

fn string_at(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| lookup(payload, k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn array_at(payload: &Value, keys: &[&str]) -> Option<Vec<Value>> {
    keys.iter()
        .filter_map(|k| lookup(payload, k))
        .find_map(|v| v.as_array().cloned())
}

/// Upstream job identifier from a start response
pub fn extract_external_id(payload: &Value) -> Option<String> {
    string_at(payload, &["job_id", "id", "task_id", "run_id"])
}

/// Raw status string reported by the upstream, if any
pub fn extract_status(payload: &Value) -> Option<String> {
    string_at(payload, &["status", "state"])
}

/// Error code and message, from either an `error` object, an `error`
/// string, or flat `error_code`/`error_message` fields
fn extract_error(payload: &Value) -> (Option<String>, Option<String>) {
    match payload.get("error") {
        Some(Value::Object(obj)) => {
            let obj = Value::Object(obj.clone());
            (
                string_at(&obj, &["code", "type"]),
                string_at(&obj, &["message", "detail"]),
            )
        }
        Some(Value::String(msg)) if !msg.is_empty() => (
            string_at(payload, &["error_code"]),
            Some(msg.clone()),
        ),
        _ => (
            string_at(payload, &["error_code"]),
            string_at(payload, &["error_message", "message"]),
        ),
    }
}

/// Normalize a status/result payload fetched from an upstream job
pub fn normalize_payload(kind: JobKind, payload: &Value) -> NormalizedResult {
    let raw_status = extract_status(payload);
    let status = raw_status
        .as_deref()
        .map(normalize_status)
        .unwrap_or(JobStatus::Failed);

    let (mut error_code, mut error_message) = extract_error(payload);
    if status == JobStatus::Failed && error_code.is_none() {
        error_code = Some(match raw_status.as_deref() {
            Some(_) => "upstream_failed".to_string(),
            None => "upstream_missing_status".to_string(),
        });
        if error_message.is_none() {
            error_message = Some(match raw_status.as_deref() {
                Some(s) => format!("Upstream reported status '{}'", s),
                None => "Upstream payload carried no status".to_string(),
            });
        }
    }

    let papers = match kind {
        JobKind::Literature => array_at(payload, &["papers", "results", "documents"]),
        JobKind::Analysis => array_at(payload, &["papers"]),
    };

    NormalizedResult {
        status,
        summary: string_at(payload, &["summary", "answer", "report"]),
        papers,
        artifacts: array_at(payload, &["artifacts", "files", "outputs"]),
        raw: Some(payload.clone()),
        error_code,
        error_message,
    }
}
