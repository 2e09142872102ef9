//! Artifact view over task results and provider jobs
//!
//! Artifacts are not stored. They are derived on read from the `artifacts`
//! array of a task's result and of its latest matching provider job, then
//! deduplicated on `(task_id, name, type, path_or_url)`, case-insensitively.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::{Task, TaskLifecycle};
use crate::models::PageQuery;
use crate::providers::{JobKind, ProviderJob};

pub const MAX_PER_PAGE: usize = 100;

const NAME_KEYS: &[&str] = &["name", "filename", "title", "label"];
const TYPE_KEYS: &[&str] = &["type", "kind", "format", "mime_type"];
const LOCATION_KEYS: &[&str] = &["path", "url", "s3_path", "s3_key", "location", "file", "href"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary", "caption"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    TaskResult,
    ProviderJob,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSource::TaskResult => "task_result",
            ArtifactSource::ProviderJob => "provider_job",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub task_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub source: ArtifactSource,
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub path_or_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    fn dedup_key(&self) -> (String, String, String, String) {
        (
            self.task_id.to_string(),
            self.name.to_lowercase(),
            self.artifact_type.to_lowercase(),
            self.path_or_url.to_lowercase(),
        )
    }

    /// Whether `self` should replace `other` on a key collision
    fn supersedes(&self, other: &Artifact) -> bool {
        match (self.source, other.source) {
            (ArtifactSource::TaskResult, ArtifactSource::ProviderJob) => true,
            (ArtifactSource::ProviderJob, ArtifactSource::TaskResult) => false,
            _ => self.updated_at > other.updated_at,
        }
    }
}

fn first_text(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| entry.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Where an artifact list came from, and the timestamps its entries inherit
#[derive(Debug, Clone, Copy)]
pub struct ArtifactOrigin {
    pub source: ArtifactSource,
    pub task_id: Uuid,
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactOrigin {
    pub fn task_result(task: &Task) -> Self {
        Self {
            source: ArtifactSource::TaskResult,
            task_id: task.id,
            job_id: None,
            created_at: task.created_at,
            updated_at: task.completed_at.unwrap_or(task.updated_at),
        }
    }

    pub fn provider_job(job: &ProviderJob) -> Self {
        Self {
            source: ArtifactSource::ProviderJob,
            task_id: job.task_id,
            job_id: Some(job.id),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }

    fn composite_id(&self, index: usize) -> String {
        format!(
            "{}:{}:{}:{}",
            self.source.as_str(),
            self.task_id,
            self.job_id.map(|id| id.to_string()).unwrap_or_default(),
            index
        )
    }
}

/// Normalize one raw artifact list. A bare string entry is read as a
/// location.
pub fn normalize_entries(entries: &[Value], origin: ArtifactOrigin) -> Vec<Artifact> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let (name, artifact_type, path_or_url, description, explicit_id) = match entry {
                Value::Object(_) => (
                    first_text(entry, NAME_KEYS),
                    first_text(entry, TYPE_KEYS),
                    first_text(entry, LOCATION_KEYS),
                    first_text(entry, DESCRIPTION_KEYS),
                    first_text(entry, &["id", "artifact_id"]),
                ),
                Value::String(s) if !s.trim().is_empty() => {
                    let location = s.trim().to_string();
                    let name = location
                        .rsplit('/')
                        .find(|segment| !segment.is_empty())
                        .map(str::to_string);
                    (name, None, Some(location), None, None)
                }
                _ => return None,
            };

            Some(Artifact {
                artifact_id: explicit_id.unwrap_or_else(|| origin.composite_id(index)),
                task_id: origin.task_id,
                job_id: origin.job_id,
                source: origin.source,
                name: name.unwrap_or_else(|| format!("artifact-{}", index + 1)),
                artifact_type: artifact_type.unwrap_or_else(|| "UNKNOWN".to_string()),
                path_or_url: path_or_url.unwrap_or_default(),
                description,
                created_at: origin.created_at,
                updated_at: origin.updated_at,
            })
        })
        .collect()
}

pub fn from_task(task: &Task) -> Vec<Artifact> {
    task.result
        .as_ref()
        .and_then(|r| r.get("artifacts"))
        .and_then(Value::as_array)
        .map(|entries| normalize_entries(entries, ArtifactOrigin::task_result(task)))
        .unwrap_or_default()
}

pub fn from_job(job: &ProviderJob) -> Vec<Artifact> {
    job.normalized_result
        .as_ref()
        .and_then(|r| r.artifacts.as_deref())
        .map(|entries| normalize_entries(entries, ArtifactOrigin::provider_job(job)))
        .unwrap_or_default()
}

/// Deduplicate and order newest first. Task-result entries win over
/// provider entries on collision; otherwise the later `updated_at` wins.
pub fn merge(artifacts: impl IntoIterator<Item = Artifact>) -> Vec<Artifact> {
    let mut by_key: HashMap<(String, String, String, String), Artifact> = HashMap::new();

    for artifact in artifacts {
        let key = artifact.dedup_key();
        match by_key.get(&key) {
            Some(existing) if !artifact.supersedes(existing) => {}
            _ => {
                by_key.insert(key, artifact);
            }
        }
    }

    let mut merged: Vec<Artifact> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.artifact_id.cmp(&b.artifact_id))
            .then_with(|| a.dedup_key().cmp(&b.dedup_key()))
    });
    merged
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPage {
    pub items: Vec<Artifact>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Slice a merged list; `page` is 1-based and `per_page` is capped
pub fn paginate(items: Vec<Artifact>, query: PageQuery) -> ArtifactPage {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
    let total = items.len();
    let start = (page - 1).saturating_mul(per_page);

    ArtifactPage {
        items: items.into_iter().skip(start).take(per_page).collect(),
        total,
        page,
        per_page,
    }
}

/// Merged artifact view for one task
/// Merged artifacts of a task, readable by active members of its lab
pub async fn list_for_task(
    lifecycle: &TaskLifecycle,
    task_id: Uuid,
    agent_id: Uuid,
    query: PageQuery,
) -> Result<ArtifactPage> {
    let store = lifecycle.store();
    let task = store.get_task(task_id).await?;
    lifecycle.active_membership(task.lab_id, agent_id).await?;
    let job = store
        .latest_job_for_task(task_id, &JobKind::for_task_type(task.task_type))
        .await?;

    let mut all = from_task(&task);
    if let Some(job) = &job {
        all.extend(from_job(job));
    }

    Ok(paginate(merge(all), query))
}
