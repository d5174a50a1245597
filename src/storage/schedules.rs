use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::oncall::{Member, Responder, RotationPolicy, Schedule};
use crate::types::{ResponderId, ScheduleId};

use super::{Result, Storage, StorageError, parse_column, to_index};

const SCHEDULE_COLUMNS: &str = "id, name, policy, enabled, current_index, created_at, updated_at";

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    Ok(Schedule {
        id: ScheduleId(row.try_get("id")?),
        name: row.try_get("name")?,
        policy: parse_column(row.try_get("policy")?, "schedules.policy")?,
        enabled: row.try_get("enabled")?,
        current_index: to_index(row.try_get("current_index")?, "schedules.current_index")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Storage {
    /// Creates a schedule or updates the policy and enabled flag of an existing one.
    pub async fn upsert_schedule(
        &self,
        name: &str,
        policy: RotationPolicy,
        enabled: bool,
    ) -> Result<Schedule> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO schedules (name, policy, enabled, current_index, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
                 policy = excluded.policy, \
                 enabled = excluded.enabled, \
                 updated_at = excluded.updated_at \
             RETURNING {SCHEDULE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .bind(policy.as_str())
            .bind(enabled)
            .bind(now)
            .bind(now)
            .fetch_one(self.pool())
            .await?;
        schedule_from_row(&row)
    }

    pub async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(schedule_from_row)
            .transpose()
    }

    pub async fn get_schedule_by_name(&self, name: &str) -> Result<Option<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE name = ?");
        sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(schedule_from_row)
            .transpose()
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY id");
        sqlx::query(&sql)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(schedule_from_row)
            .collect()
    }

    /// Replaces a schedule's membership with `responders`, in order, at
    /// positions `0..n`. An out-of-range rotation index is reset to 0.
    pub async fn set_schedule_members(
        &self,
        schedule: ScheduleId,
        responders: &[ResponderId],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM schedule_members WHERE schedule_id = ?")
            .bind(schedule.0)
            .execute(&mut *tx)
            .await?;

        for (position, responder) in responders.iter().enumerate() {
            sqlx::query(
                "INSERT INTO schedule_members (schedule_id, responder_id, position) VALUES (?, ?, ?)",
            )
            .bind(schedule.0)
            .bind(responder.0)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            "UPDATE schedules SET \
                 current_index = CASE WHEN current_index >= ? THEN 0 ELSE current_index END, \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(responders.len() as i64)
        .bind(Utc::now())
        .bind(schedule.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "schedule",
                key: schedule.to_string(),
            });
        }

        tx.commit().await?;
        debug!(schedule = %schedule, members = responders.len(), "Replaced schedule membership");
        Ok(())
    }

    /// Moves the rotation cursor outside of a task update.
    #[cfg(test)]
    pub(crate) async fn set_schedule_index(&self, schedule: ScheduleId, index: usize) -> Result<()> {
        let updated = sqlx::query("UPDATE schedules SET current_index = ?, updated_at = ? WHERE id = ?")
            .bind(index as i64)
            .bind(Utc::now())
            .bind(schedule.0)
            .execute(self.pool())
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "schedule",
                key: schedule.to_string(),
            });
        }
        Ok(())
    }

    /// Members ordered by position.
    pub async fn list_members(&self, schedule: ScheduleId) -> Result<Vec<Member>> {
        let rows = sqlx::query(
            "SELECT m.position, r.id, r.login, r.display_name, r.active, r.created_at \
             FROM schedule_members m JOIN responders r ON r.id = m.responder_id \
             WHERE m.schedule_id = ? ORDER BY m.position",
        )
        .bind(schedule.0)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Member {
                    position: to_index(row.try_get("position")?, "schedule_members.position")?,
                    responder: Responder {
                        id: ResponderId(row.try_get("id")?),
                        login: row.try_get("login")?,
                        display_name: row.try_get("display_name")?,
                        active: row.try_get("active")?,
                        created_at: row.try_get("created_at")?,
                    },
                })
            })
            .collect()
    }
}
