use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::oncall::{HistoryChange, NewTask, Task, TaskAssignment, TaskStatus};
use crate::types::{IssueNumber, RepoId, ResponderId, ScheduleId, TaskId};

use super::{Result, Storage, StorageError, parse_column};

const TASK_COLUMNS: &str = "id, schedule_id, repo, issue_number, title, description, status, \
     assignee_id, created_at, assigned_at, acked_at, completed_at";

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let issue: i64 = row.try_get("issue_number")?;
    Ok(Task {
        id: TaskId(row.try_get("id")?),
        schedule_id: ScheduleId(row.try_get("schedule_id")?),
        repo: parse_column::<RepoId>(row.try_get("repo")?, "tasks.repo")?,
        issue: IssueNumber(u64::try_from(issue).map_err(|_| StorageError::InvalidValue {
            column: "tasks.issue_number",
            value: issue.to_string(),
        })?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: parse_column(row.try_get("status")?, "tasks.status")?,
        assignee: row
            .try_get::<Option<i64>, _>("assignee_id")?
            .map(ResponderId),
        created_at: row.try_get("created_at")?,
        assigned_at: row.try_get("assigned_at")?,
        acked_at: row.try_get("acked_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> Result<TaskAssignment> {
    Ok(TaskAssignment {
        task_id: TaskId(row.try_get("task_id")?),
        responder_id: ResponderId(row.try_get("responder_id")?),
        assigned_at: row.try_get("assigned_at")?,
        acked_at: row.try_get("acked_at")?,
        ended_at: row.try_get("ended_at")?,
        end_reason: row
            .try_get::<Option<String>, _>("end_reason")?
            .map(|r| parse_column(r, "task_assignments.end_reason"))
            .transpose()?,
    })
}

impl Storage {
    /// Inserts a new `pending` task.
    ///
    /// Fails with a database error if an open task already exists for the
    /// same schedule, repository, and issue.
    pub async fn insert_task(&self, new: &NewTask) -> Result<Task> {
        let sql = format!(
            "INSERT INTO tasks (schedule_id, repo, issue_number, title, description, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.schedule_id.0)
            .bind(new.repo.full_name())
            .bind(new.issue.0 as i64)
            .bind(&new.title)
            .bind(&new.description)
            .bind(TaskStatus::Pending.as_str())
            .bind(Utc::now())
            .fetch_one(self.pool())
            .await?;
        task_from_row(&row)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(task_from_row)
            .transpose()
    }

    /// The open task for an issue within one schedule, if any.
    pub async fn find_open_task(
        &self,
        schedule: ScheduleId,
        repo: &RepoId,
        issue: IssueNumber,
    ) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE schedule_id = ? AND repo = ? AND issue_number = ? AND status != 'completed'"
        );
        sqlx::query(&sql)
            .bind(schedule.0)
            .bind(repo.full_name())
            .bind(issue.0 as i64)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(task_from_row)
            .transpose()
    }

    /// Open tasks for an issue across all schedules.
    pub async fn find_open_tasks_for_issue(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
    ) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE repo = ? AND issue_number = ? AND status != 'completed' ORDER BY id"
        );
        sqlx::query(&sql)
            .bind(repo.full_name())
            .bind(issue.0 as i64)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    /// Tasks in `status`, optionally restricted to one schedule, oldest first.
    pub async fn list_tasks_by_status(
        &self,
        schedule: Option<ScheduleId>,
        status: TaskStatus,
    ) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = ? AND (? IS NULL OR schedule_id = ?) ORDER BY id"
        );
        let schedule = schedule.map(|s| s.0);
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(schedule)
            .bind(schedule)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    /// Assigned (not yet acknowledged) tasks whose current assignment started
    /// before `cutoff`.
    pub async fn list_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        // Timestamps are stored as text with variable precision, so compare in Rust.
        let mut tasks: Vec<Task> = self
            .list_tasks_by_status(None, TaskStatus::Assigned)
            .await?
            .into_iter()
            .filter(|t| t.assigned_at.is_some_and(|at| at < cutoff))
            .collect();
        tasks.sort_by_key(|t| t.assigned_at);
        Ok(tasks)
    }

    /// Writes a task's mutable fields, optionally the owning schedule's
    /// rotation index, and the history changes, in one transaction.
    pub async fn save_task_state(
        &self,
        task: &Task,
        schedule_index: Option<usize>,
        changes: &[HistoryChange],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE tasks SET status = ?, assignee_id = ?, assigned_at = ?, acked_at = ?, \
             completed_at = ? WHERE id = ?",
        )
        .bind(task.status.as_str())
        .bind(task.assignee.map(|r| r.0))
        .bind(task.assigned_at)
        .bind(task.acked_at)
        .bind(task.completed_at)
        .bind(task.id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "task",
                key: task.id.to_string(),
            });
        }

        if let Some(index) = schedule_index {
            sqlx::query("UPDATE schedules SET current_index = ?, updated_at = ? WHERE id = ?")
                .bind(index as i64)
                .bind(Utc::now())
                .bind(task.schedule_id.0)
                .execute(&mut *tx)
                .await?;
        }

        for change in changes {
            match *change {
                HistoryChange::Open { responder, at } => {
                    sqlx::query(
                        "INSERT INTO task_assignments (task_id, responder_id, assigned_at) \
                         VALUES (?, ?, ?)",
                    )
                    .bind(task.id.0)
                    .bind(responder.0)
                    .bind(at)
                    .execute(&mut *tx)
                    .await?;
                }
                HistoryChange::Ack { at } => {
                    sqlx::query(
                        "UPDATE task_assignments SET acked_at = ? \
                         WHERE task_id = ? AND ended_at IS NULL",
                    )
                    .bind(at)
                    .bind(task.id.0)
                    .execute(&mut *tx)
                    .await?;
                }
                HistoryChange::Close { at, reason } => {
                    sqlx::query(
                        "UPDATE task_assignments SET ended_at = ?, end_reason = ? \
                         WHERE task_id = ? AND ended_at IS NULL",
                    )
                    .bind(at)
                    .bind(reason.as_str())
                    .bind(task.id.0)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(
            task = %task.id,
            status = %task.status,
            history_changes = changes.len(),
            "Saved task state"
        );
        Ok(())
    }

    /// Assignment history for a task, oldest first.
    pub async fn task_history(&self, task: TaskId) -> Result<Vec<TaskAssignment>> {
        sqlx::query(
            "SELECT task_id, responder_id, assigned_at, acked_at, ended_at, end_reason \
             FROM task_assignments WHERE task_id = ? ORDER BY id",
        )
        .bind(task.0)
        .fetch_all(self.pool())
        .await?
        .iter()
        .map(assignment_from_row)
        .collect()
    }
}
