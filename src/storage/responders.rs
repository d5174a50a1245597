use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::oncall::Responder;
use crate::types::ResponderId;

use super::{Result, Storage, StorageError};

const RESPONDER_COLUMNS: &str = "id, login, display_name, active, created_at";

pub(super) fn responder_from_row(row: &SqliteRow) -> Result<Responder> {
    Ok(Responder {
        id: ResponderId(row.try_get("id")?),
        login: row.try_get("login")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Storage {
    /// Inserts a responder, or refreshes the display name of an existing one.
    /// The active flag of an existing responder is left alone.
    pub async fn upsert_responder(&self, login: &str, display_name: &str) -> Result<Responder> {
        let sql = format!(
            "INSERT INTO responders (login, display_name, active, created_at) \
             VALUES (?, ?, 1, ?) \
             ON CONFLICT(login) DO UPDATE SET display_name = excluded.display_name \
             RETURNING {RESPONDER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(login)
            .bind(display_name)
            .bind(Utc::now())
            .fetch_one(self.pool())
            .await?;
        responder_from_row(&row)
    }

    pub async fn set_responder_active(&self, login: &str, active: bool) -> Result<Responder> {
        let sql = format!(
            "UPDATE responders SET active = ? WHERE login = ? RETURNING {RESPONDER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(active)
            .bind(login)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "responder",
                key: login.to_string(),
            })?;
        responder_from_row(&row)
    }

    pub async fn get_responder(&self, id: ResponderId) -> Result<Option<Responder>> {
        let sql = format!("SELECT {RESPONDER_COLUMNS} FROM responders WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(responder_from_row)
            .transpose()
    }

    pub async fn get_responder_by_login(&self, login: &str) -> Result<Option<Responder>> {
        let sql = format!("SELECT {RESPONDER_COLUMNS} FROM responders WHERE login = ?");
        sqlx::query(&sql)
            .bind(login)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(responder_from_row)
            .transpose()
    }
}
