//! Database store for labs, tasks, votes and provider jobs
//!
//! Every status mutation is either a conditional update guarded by the
//! expected current status or runs inside a transaction, so concurrent
//! callers can never both win the same transition.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::lab::{Membership, MembershipStatus, Role};
use crate::lifecycle::{Task, TaskStatus};
use crate::models::{Critique, Lab};
use crate::providers::{JobKind, JobStatus, NormalizedResult, ProviderJob};
use crate::voting::{quorum, Tally, Vote, VoteReceipt, VoteSummary, VoteValue};

const TASK_COLUMNS: &str = "id, lab_id, title, description, task_type, status, proposed_by, \
     assigned_to, result, verification_score, verification, created_at, updated_at, \
     started_at, completed_at, resolved_at";

const JOB_COLUMNS: &str = "id, task_id, kind, external_job_id, status, normalized_result, \
     raw_result, error_code, error_message, created_at, updated_at, completed_at";

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Lab operations

    /// Create a lab; its creator joins as `pi` in the same transaction
    pub async fn create_lab(&self, slug: &str, name: &str, created_by: Uuid) -> Result<Lab> {
        let lab = Lab {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.to_string(),
            created_by,
            created_at: Utc::now(),
        };
        let membership = Membership::new(lab.id, created_by, Role::Pi);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO labs (id, slug, name, created_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(lab.id.to_string())
        .bind(&lab.slug)
        .bind(&lab.name)
        .bind(created_by.to_string())
        .bind(lab.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_to_conflict(e, format!("Lab slug '{}' already exists", slug)))?;

        insert_membership(&mut tx, &membership).await?;
        tx.commit().await?;

        Ok(lab)
    }

    pub async fn get_lab(&self, id: Uuid) -> Result<Lab> {
        let row = sqlx::query_as::<_, LabRow>(
            r#"
            SELECT id, slug, name, created_by, created_at
            FROM labs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lab {} not found", id)))?;

        row.try_into()
    }

    // Membership operations

    /// Join a lab, or rejoin after leaving. Joining while already active
    /// is a conflict.
    pub async fn join_lab(&self, lab_id: Uuid, agent_id: Uuid, role: Role) -> Result<Membership> {
        self.get_lab(lab_id).await?;
        let membership = Membership::new(lab_id, agent_id, role);

        let result = sqlx::query(
            r#"
            INSERT INTO memberships (id, lab_id, agent_id, role, status, joined_at, left_at)
            VALUES (?, ?, ?, ?, 'active', ?, NULL)
            ON CONFLICT (lab_id, agent_id) DO UPDATE
                SET role = excluded.role,
                    status = 'active',
                    joined_at = excluded.joined_at,
                    left_at = NULL
                WHERE memberships.status = 'left'
            "#,
        )
        .bind(membership.id.to_string())
        .bind(lab_id.to_string())
        .bind(agent_id.to_string())
        .bind(role.as_str())
        .bind(membership.joined_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Agent {} is already an active member of lab {}",
                agent_id, lab_id
            )));
        }

        self.get_membership(lab_id, agent_id)
            .await?
            .ok_or_else(|| AppError::Internal("Membership vanished after join".to_string()))
    }

    pub async fn leave_lab(&self, lab_id: Uuid, agent_id: Uuid) -> Result<Membership> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE memberships SET status = 'left', left_at = ?
            WHERE lab_id = ? AND agent_id = ? AND status = 'active'
            "#,
        )
        .bind(now)
        .bind(lab_id.to_string())
        .bind(agent_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Agent {} has no active membership in lab {}",
                agent_id, lab_id
            )));
        }

        self.get_membership(lab_id, agent_id)
            .await?
            .ok_or_else(|| AppError::Internal("Membership vanished after leave".to_string()))
    }

    /// Membership in any status, if the agent ever joined
    pub async fn get_membership(&self, lab_id: Uuid, agent_id: Uuid) -> Result<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT id, lab_id, agent_id, role, status, joined_at, left_at
            FROM memberships
            WHERE lab_id = ? AND agent_id = ?
            "#,
        )
        .bind(lab_id.to_string())
        .bind(agent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn list_active_members(&self, lab_id: Uuid) -> Result<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT id, lab_id, agent_id, role, status, joined_at, left_at
            FROM memberships
            WHERE lab_id = ? AND status = 'active'
            ORDER BY joined_at ASC
            "#,
        )
        .bind(lab_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Token operations

    pub async fn insert_agent_token(&self, token: &str, agent_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_tokens (token, agent_id, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(token)
        .bind(agent_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, "Token already registered".to_string()))?;

        Ok(())
    }

    pub async fn agent_for_token(&self, token: &str) -> Result<Option<Uuid>> {
        let agent_id: Option<String> =
            sqlx::query_scalar("SELECT agent_id FROM agent_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        agent_id.map(|s| parse_uuid(&s)).transpose()
    }

    // Task operations

    pub async fn create_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, lab_id, title, description, task_type, status, proposed_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.lab_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.proposed_by.to_string())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        let mut conn = self.pool.acquire().await?;
        fetch_task(&mut conn, id).await
    }

    pub async fn list_tasks(&self, lab_id: Uuid, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let sql = match status {
            Some(_) => format!(
                "SELECT {} FROM tasks WHERE lab_id = ? AND status = ? ORDER BY created_at ASC, rowid ASC",
                TASK_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM tasks WHERE lab_id = ? ORDER BY created_at ASC, rowid ASC",
                TASK_COLUMNS
            ),
        };

        let mut query = sqlx::query_as::<_, TaskRow>(&sql).bind(lab_id.to_string());
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Assign a proposed, unassigned task to `agent_id`.
    ///
    /// The assignment is a single compare-and-set; of two concurrent
    /// callers exactly one succeeds and the other gets `Conflict`. A repeat
    /// call by the current assignee returns the task unchanged.
    pub async fn assign_task(&self, task_id: Uuid, agent_id: Uuid) -> Result<Task> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'in_progress', assigned_to = ?, started_at = ?, updated_at = ?
            WHERE id = ? AND status = 'proposed' AND assigned_to IS NULL
            "#,
        )
        .bind(agent_id.to_string())
        .bind(now)
        .bind(now)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        let task = self.get_task(task_id).await?;
        if result.rows_affected() == 1 {
            return Ok(task);
        }

        match task.assigned_to {
            Some(holder) if holder == agent_id && task.status == TaskStatus::InProgress => Ok(task),
            Some(holder) if holder != agent_id => Err(AppError::Conflict(format!(
                "Task {} is already assigned to {}",
                task_id, holder
            ))),
            _ => Err(AppError::InvalidState(format!(
                "Cannot pick up task {} in status {}",
                task_id,
                task.status.as_str()
            ))),
        }
    }

    /// Record a result and its score, moving `in_progress -> completed`
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        result: &serde_json::Value,
        score: f64,
        verification: &serde_json::Value,
    ) -> Result<Task> {
        let now = Utc::now();

        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', result = ?, verification_score = ?, verification = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(to_json_text(result)?)
        .bind(score)
        .bind(to_json_text(verification)?)
        .bind(now)
        .bind(now)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        let task = self.get_task(task_id).await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Cannot complete task {} in status {}",
                task_id,
                task.status.as_str()
            )));
        }
        Ok(task)
    }

    /// Move a task to `to` if its current status is one of `from`
    pub async fn transition_task(
        &self,
        task_id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<Task> {
        if from.is_empty() {
            return Err(AppError::InvalidState(format!(
                "Status {} is not reachable",
                to.as_str()
            )));
        }

        let now = Utc::now();
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE tasks SET status = ?, updated_at = ?, resolved_at = CASE WHEN ? THEN ? ELSE resolved_at END \
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(now)
            .bind(to.is_terminal())
            .bind(now)
            .bind(task_id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }
        let updated = query.execute(&self.pool).await?;

        let task = self.get_task(task_id).await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Cannot move task {} from {} to {}",
                task_id,
                task.status.as_str(),
                to.as_str()
            )));
        }
        Ok(task)
    }

    // Critique operations

    /// File a critique. The first critique on a completed task opens the
    /// critique period; later ones are recorded without a status change.
    pub async fn add_critique(&self, critique: &Critique) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let task_id = critique.task_id.to_string();

        // Take the write lock before reading so the status check and the
        // insert see the same row.
        let touched = sqlx::query(
            r#"
            UPDATE tasks SET updated_at = ?
            WHERE id = ? AND status IN ('completed', 'critique_period')
            "#,
        )
        .bind(critique.created_at)
        .bind(&task_id)
        .execute(&mut *tx)
        .await?;

        let task = fetch_task(&mut tx, critique.task_id).await?;
        if touched.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Cannot critique task {} in status {}",
                critique.task_id,
                task.status.as_str()
            )));
        }

        if task.status == TaskStatus::Completed {
            sqlx::query("UPDATE tasks SET status = 'critique_period' WHERE id = ? AND status = 'completed'")
                .bind(&task_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO critiques (id, task_id, author_id, content, severity, issues, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(critique.id.to_string())
        .bind(&task_id)
        .bind(critique.author_id.to_string())
        .bind(&critique.content)
        .bind(critique.severity.as_deref())
        .bind(critique.issues.as_ref().map(|v| to_json_text(v)).transpose()?)
        .bind(critique.created_at)
        .execute(&mut *tx)
        .await?;

        let task = fetch_task(&mut tx, critique.task_id).await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn list_critiques(&self, task_id: Uuid) -> Result<Vec<Critique>> {
        let rows = sqlx::query_as::<_, CritiqueRow>(
            r#"
            SELECT id, task_id, author_id, content, severity, issues, created_at
            FROM critiques
            WHERE task_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Vote operations

    /// Record or replace an agent's ballot and resolve the task if quorum
    /// is reached, all in one transaction.
    pub async fn cast_vote(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        value: VoteValue,
        reasoning: Option<&str>,
    ) -> Result<VoteReceipt> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE tasks SET updated_at = updated_at WHERE id = ? AND status = 'voting'")
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?;

        if touched.rows_affected() == 0 {
            let task = fetch_task(&mut tx, task_id).await?;
            return Err(if task.status.is_resolved() {
                AppError::Conflict(format!(
                    "Voting on task {} is closed ({})",
                    task_id,
                    task.status.as_str()
                ))
            } else {
                AppError::InvalidState(format!(
                    "Task {} is not open for voting (status {})",
                    task_id,
                    task.status.as_str()
                ))
            });
        }

        sqlx::query(
            r#"
            INSERT INTO votes (id, task_id, agent_id, vote, reasoning, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (task_id, agent_id) DO UPDATE
                SET vote = excluded.vote,
                    reasoning = excluded.reasoning,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task_id.to_string())
        .bind(agent_id.to_string())
        .bind(value.as_str())
        .bind(reasoning)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let vote = fetch_vote(&mut tx, task_id, agent_id).await?;
        let (summary, resolved) = resolve_in_tx(&mut tx, task_id).await?;
        tx.commit().await?;

        Ok(VoteReceipt {
            vote,
            summary,
            resolved,
        })
    }

    /// Re-run the resolution check for a task in `voting`. Returns the
    /// summary and whether this call resolved it.
    pub async fn resolve_voting(&self, task_id: Uuid) -> Result<(VoteSummary, bool)> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE tasks SET updated_at = updated_at WHERE id = ? AND status = 'voting'")
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?;

        let outcome = if touched.rows_affected() == 0 {
            (summarize(&mut tx, task_id).await?, false)
        } else {
            resolve_in_tx(&mut tx, task_id).await?
        };
        tx.commit().await?;

        Ok(outcome)
    }

    pub async fn vote_summary(&self, task_id: Uuid) -> Result<VoteSummary> {
        let mut conn = self.pool.acquire().await?;
        summarize(&mut conn, task_id).await
    }

    pub async fn list_votes(&self, task_id: Uuid) -> Result<Vec<Vote>> {
        let rows = sqlx::query_as::<_, VoteRow>(
            r#"
            SELECT id, task_id, agent_id, vote, reasoning, created_at, updated_at
            FROM votes
            WHERE task_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Provider job operations

    pub async fn create_job(&self, job: &ProviderJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_jobs (id, task_id, kind, external_job_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.task_id.to_string())
        .bind(job.kind.as_str())
        .bind(job.external_job_id.as_deref())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<ProviderJob> {
        let sql = format!("SELECT {} FROM provider_jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Provider job {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_jobs_for_task(&self, task_id: Uuid) -> Result<Vec<ProviderJob>> {
        let sql = format!(
            "SELECT {} FROM provider_jobs WHERE task_id = ? ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Most recent job of any of `kinds` for a task
    pub async fn latest_job_for_task(
        &self,
        task_id: Uuid,
        kinds: &[JobKind],
    ) -> Result<Option<ProviderJob>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM provider_jobs WHERE task_id = ? AND kind IN ({}) \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            JOB_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, JobRow>(&sql).bind(task_id.to_string());
        for kind in kinds {
            query = query.bind(kind.as_str());
        }
        let row = query.fetch_optional(&self.pool).await?;

        row.map(|r| r.try_into()).transpose()
    }

    /// Write a poll result. Only non-terminal jobs are updated, so a
    /// terminal status is written exactly once. Returns the stored job and
    /// whether this call changed it.
    pub async fn update_job_poll(
        &self,
        job_id: Uuid,
        normalized: &NormalizedResult,
        raw: &serde_json::Value,
    ) -> Result<(ProviderJob, bool)> {
        let now = Utc::now();
        let completed_at = normalized.status.is_terminal().then_some(now);

        let updated = sqlx::query(
            r#"
            UPDATE provider_jobs
            SET status = ?, normalized_result = ?, raw_result = ?, error_code = ?,
                error_message = ?, updated_at = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(normalized.status.as_str())
        .bind(to_json_text(normalized)?)
        .bind(to_json_text(raw)?)
        .bind(normalized.error_code.as_deref())
        .bind(normalized.error_message.as_deref())
        .bind(now)
        .bind(completed_at)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        let job = self.get_job(job_id).await?;
        Ok((job, updated.rows_affected() == 1))
    }
}

// Transaction helpers

async fn insert_membership(conn: &mut SqliteConnection, membership: &Membership) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO memberships (id, lab_id, agent_id, role, status, joined_at, left_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(membership.id.to_string())
    .bind(membership.lab_id.to_string())
    .bind(membership.agent_id.to_string())
    .bind(membership.role.as_str())
    .bind(membership.status.as_str())
    .bind(membership.joined_at)
    .bind(membership.left_at)
    .execute(conn)
    .await?;

    Ok(())
}

async fn fetch_task(conn: &mut SqliteConnection, id: Uuid) -> Result<Task> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

    row.try_into()
}

async fn fetch_vote(conn: &mut SqliteConnection, task_id: Uuid, agent_id: Uuid) -> Result<Vote> {
    let row = sqlx::query_as::<_, VoteRow>(
        r#"
        SELECT id, task_id, agent_id, vote, reasoning, created_at, updated_at
        FROM votes
        WHERE task_id = ? AND agent_id = ?
        "#,
    )
    .bind(task_id.to_string())
    .bind(agent_id.to_string())
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// Tally the current ballots of active lab members. Votes of agents who
/// have since left the lab are ignored.
async fn summarize(conn: &mut SqliteConnection, task_id: Uuid) -> Result<VoteSummary> {
    let task = fetch_task(&mut *conn, task_id).await?;

    let values: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT v.vote
        FROM votes v
        JOIN memberships m
          ON m.agent_id = v.agent_id AND m.lab_id = ? AND m.status = 'active'
        WHERE v.task_id = ?
        "#,
    )
    .bind(task.lab_id.to_string())
    .bind(task_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM memberships WHERE lab_id = ? AND status = 'active'",
    )
    .bind(task.lab_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    let votes = values
        .iter()
        .map(|v| {
            v.parse::<VoteValue>()
                .map_err(|e| AppError::Internal(format!("Invalid vote: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let active_members = usize::try_from(active).unwrap_or(0);
    Ok(VoteSummary {
        tally: Tally::from_votes(votes),
        quorum: quorum(active_members),
        active_members,
        status: task.status,
    })
}

/// Recompute the tally and, if quorum is met, close voting. Must run
/// inside a transaction that already holds the task's write lock.
async fn resolve_in_tx(conn: &mut SqliteConnection, task_id: Uuid) -> Result<(VoteSummary, bool)> {
    let mut summary = summarize(&mut *conn, task_id).await?;

    let Some(outcome) = summary.tally.outcome(summary.quorum) else {
        return Ok((summary, false));
    };

    let now = Utc::now();
    let updated = sqlx::query(
        r#"
        UPDATE tasks SET status = ?, resolved_at = ?, updated_at = ?
        WHERE id = ? AND status = 'voting'
        "#,
    )
    .bind(outcome.as_str())
    .bind(now)
    .bind(now)
    .bind(task_id.to_string())
    .execute(&mut *conn)
    .await?;

    let resolved = updated.rows_affected() == 1;
    if resolved {
        summary.status = outcome;
        tracing::info!(
            "Task {} resolved {} ({} approve / {} reject, quorum {})",
            task_id,
            outcome.as_str(),
            summary.tally.approve,
            summary.tally.reject,
            summary.quorum
        );
    }
    Ok((summary, resolved))
}

fn unique_to_conflict(err: sqlx::Error, message: String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message),
        _ => AppError::Database(err),
    }
}

fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to encode JSON column: {}", e)))
}

fn from_json_text<T: serde::de::DeserializeOwned>(text: Option<String>) -> Result<Option<T>> {
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| AppError::Internal(format!("Invalid JSON column: {}", e)))
    })
    .transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
struct LabRow {
    id: String,
    slug: String,
    name: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LabRow> for Lab {
    type Error = AppError;

    fn try_from(row: LabRow) -> Result<Self> {
        Ok(Lab {
            id: parse_uuid(&row.id)?,
            slug: row.slug,
            name: row.name,
            created_by: parse_uuid(&row.created_by)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    id: String,
    lab_id: String,
    agent_id: String,
    role: String,
    status: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = AppError;

    fn try_from(row: MembershipRow) -> Result<Self> {
        Ok(Membership {
            id: parse_uuid(&row.id)?,
            lab_id: parse_uuid(&row.lab_id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            role: row
                .role
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid role: {}", e)))?,
            status: row
                .status
                .parse::<MembershipStatus>()
                .map_err(|e| AppError::Internal(format!("Invalid membership status: {}", e)))?,
            joined_at: row.joined_at,
            left_at: row.left_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    lab_id: String,
    title: String,
    description: String,
    task_type: String,
    status: String,
    proposed_by: String,
    assigned_to: Option<String>,
    result: Option<String>,
    verification_score: Option<f64>,
    verification: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: parse_uuid(&row.id)?,
            lab_id: parse_uuid(&row.lab_id)?,
            title: row.title,
            description: row.description,
            task_type: row
                .task_type
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid task type: {}", e)))?,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            proposed_by: parse_uuid(&row.proposed_by)?,
            assigned_to: parse_opt_uuid(row.assigned_to)?,
            result: from_json_text(row.result)?,
            verification_score: row.verification_score,
            verification: from_json_text(row.verification)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CritiqueRow {
    id: String,
    task_id: String,
    author_id: String,
    content: String,
    severity: Option<String>,
    issues: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CritiqueRow> for Critique {
    type Error = AppError;

    fn try_from(row: CritiqueRow) -> Result<Self> {
        Ok(Critique {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            author_id: parse_uuid(&row.author_id)?,
            content: row.content,
            severity: row.severity,
            issues: from_json_text(row.issues)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    id: String,
    task_id: String,
    agent_id: String,
    vote: String,
    reasoning: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = AppError;

    fn try_from(row: VoteRow) -> Result<Self> {
        Ok(Vote {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            vote: row
                .vote
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid vote: {}", e)))?,
            reasoning: row.reasoning,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    task_id: String,
    kind: String,
    external_job_id: Option<String>,
    status: String,
    normalized_result: Option<String>,
    raw_result: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ProviderJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(ProviderJob {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid job kind: {}", e)))?,
            external_job_id: row.external_job_id,
            status: row
                .status
                .parse::<JobStatus>()
                .map_err(|e| AppError::Internal(format!("Invalid job status: {}", e)))?,
            normalized_result: from_json_text(row.normalized_result)?,
            raw_result: from_json_text(row.raw_result)?,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
