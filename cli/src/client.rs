//! HTTP and event-feed client for the agentlab server
//!
//! Every request goes through the shared retry policy: network failures,
//! 429 and 5xx are retried with backoff, other errors return at once. A 5xx
//! whose body says the server already gave up on its upstream is final.

use agentlab::models::{CritiqueRequest, PageQuery, ProposeTaskRequest, StartJobRequest};
use agentlab::providers::{
    retry, send_json, JobView, RetryError, RetryPolicy, Retryable, UpstreamError,
};
use agentlab::voting::{VoteListing, VoteReceipt};
use futures::StreamExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} ({status}): {detail}")]
    Api {
        status: u16,
        kind: String,
        detail: String,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: UpstreamError },

    #[error(transparent)]
    Transport(UpstreamError),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid server URL: {0}")]
    Url(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Error kinds the server returns after its own upstream retries are done
const FINAL_KINDS: &[&str] = &["upstream_unavailable", "exhausted"];

/// Read a field of the server's `{error, detail}` body
fn body_field(body: &str, key: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

/// One failed call to the server
#[derive(Debug)]
struct CallError(UpstreamError);

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        if let UpstreamError::Status { body, .. } = &self.0 {
            if let Some(kind) = body_field(body, "error") {
                if FINAL_KINDS.contains(&kind.as_str()) {
                    return false;
                }
            }
        }
        self.0.is_retryable()
    }
}

impl From<RetryError<UpstreamError>> for ClientError {
    fn from(err: RetryError<UpstreamError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => ClientError::Exhausted { attempts, last },
            RetryError::Aborted(UpstreamError::Status { status, body }) => ClientError::Api {
                status,
                kind: body_field(&body, "error").unwrap_or_else(|| format!("http_{}", status)),
                detail: body_field(&body, "detail").unwrap_or(body),
            },
            RetryError::Aborted(other) => ClientError::Transport(other),
        }
    }
}

impl From<RetryError<CallError>> for ClientError {
    fn from(err: RetryError<CallError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => RetryError::Exhausted {
                attempts,
                last: last.0,
            },
            RetryError::Aborted(e) => RetryError::Aborted(e.0),
        }
        .into()
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Event feed URL for a lab, derived from the server's HTTP base URL
pub fn events_url(server: &str, lab_id: Uuid) -> Result<Url> {
    let mut url = Url::parse(server).map_err(|e| ClientError::Url(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Url(format!("cannot use {} for a WebSocket", server)))?;
    url.set_path(&format!("/labs/{}/events", lab_id));
    Ok(url)
}

/// Client for one agent identity
pub struct LabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    policy: RetryPolicy,
}

impl LabClient {
    pub fn new(base_url: &str, token: &str, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            policy,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let value = retry(&self.policy, |attempt| {
            if attempt > 0 {
                tracing::info!("Retrying {} {} (attempt {})", method, path, attempt + 1);
            }
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token);
            if let Some(body) = &body {
                request = request.json(body);
            }
            async move { send_json(request).await.map_err(CallError) }
        })
        .await?;

        serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
    }

    // Tasks

    pub async fn list_tasks(&self, lab_id: Uuid, status: Option<&str>) -> Result<Value> {
        let path = match status {
            Some(status) => format!("/labs/{}/tasks?status={}", lab_id, status),
            None => format!("/labs/{}/tasks", lab_id),
        };
        self.call(Method::GET, &path, None).await
    }

    pub async fn propose(&self, lab_id: Uuid, request: &ProposeTaskRequest) -> Result<Value> {
        let body = json!({
            "title": request.title,
            "description": request.description,
            "task_type": request.task_type,
        });
        self.call(Method::POST, &format!("/labs/{}/tasks", lab_id), Some(body))
            .await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Value> {
        self.call(Method::GET, &format!("/tasks/{}", task_id), None)
            .await
    }

    pub async fn pick_up(&self, task_id: Uuid) -> Result<Value> {
        self.call(Method::POST, &format!("/tasks/{}/pick-up", task_id), None)
            .await
    }

    pub async fn complete(&self, task_id: Uuid, result: Value) -> Result<Value> {
        self.call(
            Method::POST,
            &format!("/tasks/{}/complete", task_id),
            Some(json!({ "result": result })),
        )
        .await
    }

    pub async fn critique(&self, task_id: Uuid, request: &CritiqueRequest) -> Result<Value> {
        let body = json!({
            "content": request.content,
            "severity": request.severity,
            "issues": request.issues,
        });
        self.call(Method::POST, &format!("/tasks/{}/critiques", task_id), Some(body))
            .await
    }

    pub async fn start_voting(&self, task_id: Uuid) -> Result<Value> {
        self.call(Method::POST, &format!("/tasks/{}/start-voting", task_id), None)
            .await
    }

    pub async fn vote(
        &self,
        task_id: Uuid,
        vote: &str,
        reasoning: Option<&str>,
    ) -> Result<VoteReceipt> {
        self.call(
            Method::POST,
            &format!("/tasks/{}/votes", task_id),
            Some(json!({ "vote": vote, "reasoning": reasoning })),
        )
        .await
    }

    pub async fn votes(&self, task_id: Uuid) -> Result<VoteListing> {
        self.call(Method::GET, &format!("/tasks/{}/votes", task_id), None)
            .await
    }

    // Jobs

    pub async fn start_job(&self, task_id: Uuid, request: &StartJobRequest) -> Result<JobView> {
        let body = serde_json::to_value(request).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.call(Method::POST, &format!("/tasks/{}/jobs", task_id), Some(body))
            .await
    }

    pub async fn poll_job(&self, job_id: Uuid) -> Result<JobView> {
        self.call(Method::POST, &format!("/jobs/{}/poll", job_id), None)
            .await
    }

    pub async fn artifacts(&self, task_id: Uuid, page: PageQuery) -> Result<Value> {
        self.call(
            Method::GET,
            &format!(
                "/tasks/{}/artifacts?page={}&per_page={}",
                task_id, page.page, page.per_page
            ),
            None,
        )
        .await
    }

    /// Stream a lab's events, calling `callback` with each decoded frame
    /// until it returns false or the server closes the feed
    pub async fn follow_events<F>(&self, lab_id: Uuid, mut callback: F) -> Result<()>
    where
        F: FnMut(Value) -> bool,
    {
        let url = events_url(&self.base_url, lab_id)?;
        let mut request = url.as_str().into_client_request()?;
        let auth = format!("Bearer {}", self.token)
            .parse()
            .map_err(|_| ClientError::Url("token is not a valid header value".to_string()))?;
        request.headers_mut().insert("authorization", auth);

        tracing::info!("Connecting to {}", url);
        let (mut ws_stream, _) = tokio_tungstenite::connect_async(request).await?;

        while let Some(frame) = ws_stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(event) => {
                        if !callback(event) {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse event: {} - {}", e, text),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
