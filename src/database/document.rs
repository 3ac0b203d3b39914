use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::document::{Document, DocumentPatch, DocumentRequest};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError>;
    /// The most recently updated document, used when the default document is requested.
    async fn get_latest_document(&self) -> Result<Option<Document>, AppError>;
    async fn list_documents(&self) -> Result<Vec<Document>, AppError>;
    /// Fails with `DocumentAlreadyExists` when the requested id is taken.
    async fn create_document(&self, request: &DocumentRequest) -> Result<Document, AppError>;
    /// Replaces the fields present in `patch`; the store stamps `updated_at`.
    async fn update_document(&self, id: &str, patch: &DocumentPatch) -> Result<Document, AppError>;
    async fn delete_document(&self, id: &str) -> Result<(), AppError>;
}

#[async_trait::async_trait]
impl DocumentRepository for PostgresRepository {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, title, content, created_at, updated_at
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(document)
    }

    async fn get_latest_document(&self) -> Result<Option<Document>, AppError> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, title, content, created_at, updated_at
            FROM documents
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(document)
    }

    async fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        let documents = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, title, content, created_at, updated_at
            FROM documents
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    async fn create_document(&self, request: &DocumentRequest) -> Result<Document, AppError> {
        let id = request.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (id, title, content)
            VALUES ($1, $2, $3)
            RETURNING id, title, content, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(&request.title)
        .bind(request.content.as_deref().unwrap_or(""))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(document) => Ok(document),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => Err(AppError::DocumentAlreadyExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_document(&self, id: &str, patch: &DocumentPatch) -> Result<Document, AppError> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents
            SET title = COALESCE($2, title),
                content = COALESCE($3, content),
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, content, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.title.as_deref())
        .bind(patch.content.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        document.ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
    }

    async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM documents WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
