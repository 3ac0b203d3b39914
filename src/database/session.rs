use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::Session;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn list_sessions(&self, document_id: &str) -> Result<Vec<Session>, AppError>;
    /// Insert or replace a presence row. A row carrying an older `last_seen`
    /// than the stored one is ignored and the stored row is returned.
    async fn upsert_session(&self, session: &Session) -> Result<Session, AppError>;
    /// Deleting an id that is already gone is not an error.
    async fn delete_session(&self, id: &Uuid) -> Result<(), AppError>;
    /// Removes every session last seen before `older_than`; returns how many went.
    async fn delete_stale_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait::async_trait]
impl SessionRepository for PostgresRepository {
    async fn list_sessions(&self, document_id: &str) -> Result<Vec<Session>, AppError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, name, color, document_id, cursor_x, cursor_y, last_seen
            FROM user_sessions
            WHERE document_id = $1
            ORDER BY last_seen DESC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn upsert_session(&self, session: &Session) -> Result<Session, AppError> {
        let written = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO user_sessions (id, name, color, document_id, cursor_x, cursor_y, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                color = EXCLUDED.color,
                document_id = EXCLUDED.document_id,
                cursor_x = EXCLUDED.cursor_x,
                cursor_y = EXCLUDED.cursor_y,
                last_seen = EXCLUDED.last_seen
            WHERE user_sessions.last_seen <= EXCLUDED.last_seen
            RETURNING id, name, color, document_id, cursor_x, cursor_y, last_seen
            "#,
        )
        .bind(session.id)
        .bind(&session.name)
        .bind(&session.color)
        .bind(session.document_id.as_deref())
        .bind(session.cursor_x)
        .bind(session.cursor_y)
        .bind(session.last_seen)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(written) = written {
            return Ok(written);
        }

        // Conflict guard rejected an out-of-order write; report what is stored.
        let stored = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, name, color, document_id, cursor_x, cursor_y, last_seen
            FROM user_sessions
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn delete_session(&self, id: &Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM user_sessions WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_stale_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE last_seen < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
