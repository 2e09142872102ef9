//! External job proxy: upstream clients, retry, payload normalization and
//! reconciliation of provider jobs

pub mod client;
pub mod job;
pub mod normalize;
pub mod reconciler;
pub mod retry;

pub use client::{send_json, ProviderClient, UpstreamError};
pub use job::{JobKind, JobStatus, JobView, ProviderJob};
pub use normalize::{normalize_payload, normalize_status, NormalizedResult};
pub use reconciler::JobReconciler;
pub use retry::{retry, retry_with, RetryError, RetryPolicy, Retryable};
