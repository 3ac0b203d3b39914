pub mod document;
pub mod postgres_repository;
pub mod session;

use crate::database::document::DocumentRepository;
use crate::database::session::SessionRepository;

/// Both halves of the shared backend: the Document Store and the Presence Store.
pub trait CollabStore: DocumentRepository + SessionRepository + Send + Sync {}

impl<T> CollabStore for T where T: DocumentRepository + SessionRepository + Send + Sync {}
