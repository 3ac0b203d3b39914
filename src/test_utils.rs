use crate::capabilities::{Clipboard, Clock, UrlState};
use crate::database::document::DocumentRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, FeedHub, Subscription, SubscriptionId, Table};
use crate::models::document::{Document, DocumentPatch, DocumentRequest};
use crate::models::session::{CursorPosition, Session};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, watch};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn session_at(name: &str, document_id: &str, last_seen: DateTime<Utc>) -> Session {
    Session {
        id: Uuid::new_v4(),
        name: name.to_string(),
        color: "#3B82F6".to_string(),
        document_id: Some(document_id.to_string()),
        cursor_x: CursorPosition::ORIGIN.x,
        cursor_y: CursorPosition::ORIGIN.y,
        last_seen,
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(epoch())
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *lock(&self.now) += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(chrono::Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    sessions: HashMap<Uuid, Session>,
}

/// In-memory Document and Presence store. Every accepted write is published
/// into `hub()`, the same way the database triggers feed `PgChangeFeed`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    hub: FeedHub,
    clock: ManualClock,
}

impl MemoryStore {
    pub fn hub(&self) -> FeedHub {
        self.hub.clone()
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Seeds a document directly, stamped with the store clock.
    pub fn insert_document(&self, id: &str, title: &str, content: &str) -> Document {
        let now = self.clock.now();
        let document = Document {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        lock(&self.state).documents.insert(document.id.clone(), document.clone());
        self.publish_document(ChangeKind::Insert, &document);
        document
    }

    pub fn insert_session(&self, session: Session) {
        let kind = match lock(&self.state).sessions.insert(session.id, session.clone()) {
            Some(_) => ChangeKind::Update,
            None => ChangeKind::Insert,
        };
        self.publish_session(kind, &session);
    }

    /// Writes without publishing, as if the notification had been lost.
    pub fn replace_document_quietly(&self, document: Document) {
        lock(&self.state).documents.insert(document.id.clone(), document);
    }

    pub fn insert_session_quietly(&self, session: Session) {
        lock(&self.state).sessions.insert(session.id, session);
    }

    pub fn session(&self, id: &Uuid) -> Option<Session> {
        lock(&self.state).sessions.get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    fn publish_document(&self, kind: ChangeKind, document: &Document) {
        self.hub.publish(&ChangeEvent::Document {
            kind,
            document_id: document.id.clone(),
            document: (kind != ChangeKind::Delete).then(|| document.clone()),
        });
    }

    fn publish_session(&self, kind: ChangeKind, session: &Session) {
        self.hub.publish(&ChangeEvent::Session {
            kind,
            session_id: session.id,
            document_id: session.document_id.clone(),
        });
    }
}

#[async_trait::async_trait]
impl DocumentRepository for MemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        Ok(lock(&self.state).documents.get(id).cloned())
    }

    async fn get_latest_document(&self) -> Result<Option<Document>, AppError> {
        Ok(lock(&self.state).documents.values().max_by_key(|d| d.updated_at).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        let mut documents: Vec<Document> = lock(&self.state).documents.values().cloned().collect();
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }

    async fn create_document(&self, request: &DocumentRequest) -> Result<Document, AppError> {
        let id = request.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = self.clock.now();
        let document = Document {
            id: id.clone(),
            title: request.title.clone(),
            content: request.content.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        {
            let mut state = lock(&self.state);
            if state.documents.contains_key(&id) {
                return Err(AppError::DocumentAlreadyExists(id));
            }
            state.documents.insert(id, document.clone());
        }

        self.publish_document(ChangeKind::Insert, &document);
        Ok(document)
    }

    async fn update_document(&self, id: &str, patch: &DocumentPatch) -> Result<Document, AppError> {
        let updated = {
            let mut state = lock(&self.state);
            let document = state
                .documents
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))?;
            if let Some(title) = &patch.title {
                document.title = title.clone();
            }
            if let Some(content) = &patch.content {
                document.content = content.clone();
            }
            document.updated_at = self.clock.now();
            document.clone()
        };

        self.publish_document(ChangeKind::Update, &updated);
        Ok(updated)
    }

    async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        let (removed, cascaded) = {
            let mut state = lock(&self.state);
            let removed = state.documents.remove(id);
            let cascaded: Vec<Session> = state.sessions.values().filter(|s| s.document_id.as_deref() == Some(id)).cloned().collect();
            for session in &cascaded {
                state.sessions.remove(&session.id);
            }
            (removed, cascaded)
        };

        for session in &cascaded {
            self.publish_session(ChangeKind::Delete, session);
        }
        if let Some(document) = removed {
            self.publish_document(ChangeKind::Delete, &document);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionRepository for MemoryStore {
    async fn list_sessions(&self, document_id: &str) -> Result<Vec<Session>, AppError> {
        let mut sessions: Vec<Session> = lock(&self.state)
            .sessions
            .values()
            .filter(|s| s.document_id.as_deref() == Some(document_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(sessions)
    }

    async fn upsert_session(&self, session: &Session) -> Result<Session, AppError> {
        let kind = {
            let mut state = lock(&self.state);
            let kind = match state.sessions.get(&session.id) {
                Some(stored) if stored.last_seen > session.last_seen => return Ok(stored.clone()),
                Some(_) => ChangeKind::Update,
                None => ChangeKind::Insert,
            };
            state.sessions.insert(session.id, session.clone());
            kind
        };

        self.publish_session(kind, session);
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &Uuid) -> Result<(), AppError> {
        let removed = lock(&self.state).sessions.remove(id);
        if let Some(session) = removed {
            self.publish_session(ChangeKind::Delete, &session);
        }
        Ok(())
    }

    async fn delete_stale_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let removed: Vec<Session> = {
            let mut state = lock(&self.state);
            let stale: Vec<Uuid> = state.sessions.values().filter(|s| s.is_stale(older_than)).map(|s| s.id).collect();
            stale.iter().filter_map(|id| state.sessions.remove(id)).collect()
        };

        for session in &removed {
            self.publish_session(ChangeKind::Delete, session);
        }
        Ok(removed.len() as u64)
    }
}

/// Wraps a `MemoryStore`, logging every call by operation name. Operations can
/// be switched to fail with `StoreUnavailable`.
#[derive(Clone)]
pub struct RecordingStore {
    inner: MemoryStore,
    calls: Arc<Mutex<Vec<&'static str>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    fail_all: Arc<AtomicBool>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            failing: Arc::default(),
            fail_all: Arc::default(),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|call| **call == operation).count()
    }

    pub fn fail_operation(&self, operation: &str) {
        lock(&self.failing).insert(operation.to_string());
    }

    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        lock(&self.failing).clear();
    }

    fn record(&self, operation: &'static str) -> Result<(), AppError> {
        lock(&self.calls).push(operation);
        if self.fail_all.load(Ordering::SeqCst) || lock(&self.failing).contains(operation) {
            return Err(AppError::StoreUnavailable(format!("{} rejected by test double", operation)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentRepository for RecordingStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        self.record("get_document")?;
        self.inner.get_document(id).await
    }

    async fn get_latest_document(&self) -> Result<Option<Document>, AppError> {
        self.record("get_latest_document")?;
        self.inner.get_latest_document().await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        self.record("list_documents")?;
        self.inner.list_documents().await
    }

    async fn create_document(&self, request: &DocumentRequest) -> Result<Document, AppError> {
        self.record("create_document")?;
        self.inner.create_document(request).await
    }

    async fn update_document(&self, id: &str, patch: &DocumentPatch) -> Result<Document, AppError> {
        self.record("update_document")?;
        self.inner.update_document(id, patch).await
    }

    async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        self.record("delete_document")?;
        self.inner.delete_document(id).await
    }
}

#[async_trait::async_trait]
impl SessionRepository for RecordingStore {
    async fn list_sessions(&self, document_id: &str) -> Result<Vec<Session>, AppError> {
        self.record("list_sessions")?;
        self.inner.list_sessions(document_id).await
    }

    async fn upsert_session(&self, session: &Session) -> Result<Session, AppError> {
        self.record("upsert_session")?;
        self.inner.upsert_session(session).await
    }

    async fn delete_session(&self, id: &Uuid) -> Result<(), AppError> {
        self.record("delete_session")?;
        self.inner.delete_session(id).await
    }

    async fn delete_stale_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        self.record("delete_stale_sessions")?;
        self.inner.delete_stale_sessions(older_than).await
    }
}

/// URL double: a bare `doc` value plus the history of in-place replacements.
#[derive(Default)]
pub struct MemoryUrl {
    param: Mutex<Option<String>>,
    replaced: Mutex<Vec<String>>,
}

impl MemoryUrl {
    pub fn with_document(document_id: &str) -> Self {
        Self {
            param: Mutex::new(Some(document_id.to_string())),
            ..Self::default()
        }
    }

    pub fn replacements(&self) -> Vec<String> {
        lock(&self.replaced).clone()
    }
}

impl UrlState for MemoryUrl {
    fn document_param(&self) -> Option<String> {
        lock(&self.param).clone()
    }

    fn replace_document_param(&self, document_id: &str) {
        *lock(&self.param) = Some(document_id.to_string());
        lock(&self.replaced).push(document_id.to_string());
    }
}

#[derive(Default)]
pub struct FailingClipboard;

#[async_trait::async_trait]
impl Clipboard for FailingClipboard {
    async fn write_text(&self, _text: &str) -> Result<(), AppError> {
        Err(AppError::Clipboard("clipboard permission denied".to_string()))
    }
}

/// Feed whose `subscribe` parks until `open` is called, to hold a join
/// half-way through.
#[derive(Clone)]
pub struct GatedFeed {
    hub: FeedHub,
    entered: Arc<Notify>,
    gate: Arc<watch::Sender<bool>>,
}

impl GatedFeed {
    pub fn new(hub: FeedHub) -> Self {
        Self {
            hub,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(watch::channel(false).0),
        }
    }

    /// Resolves once some caller is parked in `subscribe`.
    pub async fn wait_for_subscriber(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait::async_trait]
impl ChangeFeed for GatedFeed {
    async fn subscribe(&self, table: Table, filter: ChangeFilter) -> Result<Subscription, AppError> {
        self.entered.notify_one();
        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(AppError::Feed("gate dropped".to_string()));
        }
        self.hub.subscribe(table, filter).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AppError> {
        self.hub.unsubscribe(id).await
    }
}
