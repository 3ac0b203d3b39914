use crate::database::document::DocumentRepository;
use crate::error::app_error::AppError;
use crate::models::document::{Document, DocumentRequest};
use tracing::{debug, info, warn};
use validator::Validate;

pub struct DocumentService<'a, R: ?Sized> {
    repository: &'a R,
    default_document_id: &'a str,
}

impl<'a, R: DocumentRepository + ?Sized> DocumentService<'a, R> {
    pub fn new(repository: &'a R, default_document_id: &'a str) -> Self {
        DocumentService {
            repository,
            default_document_id,
        }
    }

    /// Find the document a view should open for `requested`.
    ///
    /// 1. An existing row with that id wins.
    /// 2. The default id falls back to the most recently updated document.
    /// 3. Any other id is created with the welcome content, so a fresh shared
    ///    link works for whoever opens it first.
    /// 4. If creation fails the default fallback applies.
    ///
    /// Anyone holding a link can therefore create documents; sessions are anonymous.
    pub async fn resolve(&self, requested: &str) -> Result<Document, AppError> {
        if let Some(document) = self.repository.get_document(requested).await? {
            return Ok(document);
        }

        if requested == self.default_document_id {
            debug!(document_id = requested, "default document missing, opening most recent");
            return self.most_recent().await;
        }

        let request = DocumentRequest::welcome(requested);
        let created = match request.validate() {
            Ok(()) => self.repository.create_document(&request).await,
            Err(e) => Err(e.into()),
        };

        match created {
            Ok(document) => {
                info!(document_id = %document.id, "created document for shared link");
                Ok(document)
            }
            // Someone else opened the same link first.
            Err(AppError::DocumentAlreadyExists(_)) => match self.repository.get_document(requested).await? {
                Some(document) => Ok(document),
                None => self.most_recent().await,
            },
            Err(err) => {
                warn!(document_id = requested, error = %err, "could not create shared document, falling back");
                self.most_recent().await
            }
        }
    }

    /// The "new document" action with a server-generated id.
    pub async fn create_titled(&self, title: &str) -> Result<Document, AppError> {
        let request = DocumentRequest::titled(title);
        request.validate()?;
        let document = self.repository.create_document(&request).await?;
        info!(document_id = %document.id, "document created");
        Ok(document)
    }

    async fn most_recent(&self) -> Result<Document, AppError> {
        self.repository.get_latest_document().await?.ok_or(AppError::DocumentUnavailable)
    }
}
