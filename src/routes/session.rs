use crate::database::document::DocumentRepository;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::session::{Session, SessionRequest, SessionResponse};
use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, put};
use rocket_okapi::openapi;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

/// Register or refresh a presence row. `last_seen` is stamped by the server;
/// a write older than the stored row leaves it unchanged.
#[openapi(tag = "Sessions")]
#[put("/<id>", data = "<payload>")]
pub async fn upsert_session(pool: &State<PgPool>, id: &str, payload: Json<SessionRequest>) -> Result<Json<SessionResponse>, AppError> {
    payload.validate()?;
    let session_id = Uuid::parse_str(id)?;
    let repo = PostgresRepository { pool: pool.inner().clone() };

    if let Some(document_id) = payload.document_id.as_deref()
        && repo.get_document(document_id).await?.is_none()
    {
        return Err(AppError::NotFound(format!("Document {} not found", document_id)));
    }

    let session = Session {
        id: session_id,
        name: payload.name.clone(),
        color: payload.color.clone(),
        document_id: payload.document_id.clone(),
        cursor_x: payload.cursor.x,
        cursor_y: payload.cursor.y,
        last_seen: Utc::now(),
    };
    let stored = repo.upsert_session(&session).await?;
    Ok(Json(SessionResponse::from(&stored)))
}

/// Leave a document. Deleting an unknown session succeeds.
#[openapi(tag = "Sessions")]
#[delete("/<id>")]
pub async fn delete_session(pool: &State<PgPool>, id: &str) -> Result<Status, AppError> {
    let session_id = Uuid::parse_str(id)?;
    let repo = PostgresRepository { pool: pool.inner().clone() };
    repo.delete_session(&session_id).await?;
    Ok(Status::NoContent)
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![upsert_session, delete_session]
}
