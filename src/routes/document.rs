use crate::config::Config;
use crate::database::document::DocumentRepository;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::document::{Document, DocumentPatch, DocumentRequest, DocumentResponse};
use crate::models::export::ExportFormat;
use crate::models::session::SessionResponse;
use crate::service::document::DocumentService;
use crate::service::export::export_document;
use rocket::http::{ContentType, Header, Status};
use rocket::serde::json::Json;
use rocket::{Responder, State, delete, get, patch, post};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::openapi;
use rocket_okapi::response::OpenApiResponderInner;
use sqlx::PgPool;
use validator::Validate;

async fn find_document(repo: &PostgresRepository, id: &str) -> Result<Document, AppError> {
    repo.get_document(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
}

/// List documents, most recently updated first
#[openapi(tag = "Documents")]
#[get("/")]
pub async fn list_documents(pool: &State<PgPool>) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let documents = repo.list_documents().await?;
    Ok(Json(documents.iter().map(DocumentResponse::from).collect()))
}

/// Create a document. Without content the body is seeded from the title.
#[openapi(tag = "Documents")]
#[post("/", data = "<payload>")]
pub async fn create_document(pool: &State<PgPool>, payload: Json<DocumentRequest>) -> Result<(Status, Json<DocumentResponse>), AppError> {
    let request = if payload.content.is_some() {
        payload.into_inner()
    } else {
        DocumentRequest {
            id: payload.id.clone(),
            ..DocumentRequest::titled(&payload.title)
        }
    };
    request.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let document = repo.create_document(&request).await?;
    Ok((Status::Created, Json(DocumentResponse::from(&document))))
}

/// Open the document a shareable link points at, creating it on first use
#[openapi(tag = "Documents")]
#[get("/open?<doc>")]
pub async fn open_document(pool: &State<PgPool>, config: &State<Config>, doc: Option<String>) -> Result<Json<DocumentResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let default_id = config.session.default_document_id.as_str();
    let requested = doc.filter(|id| !id.trim().is_empty()).unwrap_or_else(|| default_id.to_string());

    let document = DocumentService::new(&repo, default_id).resolve(&requested).await?;
    Ok(Json(DocumentResponse::from(&document)))
}

#[openapi(tag = "Documents")]
#[get("/<id>")]
pub async fn get_document(pool: &State<PgPool>, id: &str) -> Result<Json<DocumentResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let document = find_document(&repo, id).await?;
    Ok(Json(DocumentResponse::from(&document)))
}

/// Replace the title and/or the content of a document
#[openapi(tag = "Documents")]
#[patch("/<id>", data = "<payload>")]
pub async fn update_document(pool: &State<PgPool>, id: &str, payload: Json<DocumentPatch>) -> Result<Json<DocumentResponse>, AppError> {
    payload.validate()?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("Nothing to update".to_string()));
    }

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let document = repo.update_document(id, &payload).await?;
    Ok(Json(DocumentResponse::from(&document)))
}

/// Delete a document together with its presence rows
#[openapi(tag = "Documents")]
#[delete("/<id>")]
pub async fn delete_document(pool: &State<PgPool>, id: &str) -> Result<Status, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    repo.delete_document(id).await?;
    Ok(Status::NoContent)
}

#[derive(Responder)]
pub struct ExportDownload {
    body: String,
    content_type: ContentType,
    disposition: Header<'static>,
}

impl OpenApiResponderInner for ExportDownload {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        responses.responses.insert(
            "200".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Exported document as an attachment".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

/// Download a document as HTML, plain text or Markdown (defaults to HTML)
#[openapi(tag = "Documents")]
#[get("/<id>/export?<format>")]
pub async fn export(pool: &State<PgPool>, id: &str, format: Option<ExportFormat>) -> Result<ExportDownload, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let document = find_document(&repo, id).await?;
    let exported = export_document(&document, format.unwrap_or(ExportFormat::Html));

    Ok(ExportDownload {
        content_type: exported.format.content_type(),
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename*=UTF-8''{}", urlencoding::encode(&exported.file_name)),
        ),
        body: exported.body,
    })
}

/// Presence on a document, most recently seen first
#[openapi(tag = "Documents")]
#[get("/<id>/sessions")]
pub async fn list_document_sessions(pool: &State<PgPool>, id: &str) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let sessions = repo.list_sessions(id).await?;
    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        list_documents,
        create_document,
        open_document,
        get_document,
        update_document,
        delete_document,
        export,
        list_document_sessions
    ]
}
