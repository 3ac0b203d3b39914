//! Session Controller: one participant's live view of one document.
//!
//! `start` joins (Initializing -> Active) and `close` tears down
//! (Active -> Closing -> Closed). While active, local intent is written to the
//! stores and remote changes arrive through the Change Feed. Both flow into
//! the [`SessionSnapshot`] observed through [`SessionController::watch`].
//!
//! Consistency is last-write-wins throughout. Cursor rows converge on the
//! write with the newest `last_seen`. Content is replaced wholesale by the
//! debounced commit. A remote document update replaces the local copy even
//! while a local edit is pending, so the next commit may carry content that
//! predates it.

use crate::capabilities::{Clipboard, Clock, SystemClock, UrlState, share_link};
use crate::config::SessionConfig;
use crate::database::CollabStore;
use crate::database::document::DocumentRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, Subscription, SubscriptionId, Table};
use crate::models::document::{Document, DocumentPatch};
use crate::models::export::{ExportFormat, ExportedDocument};
use crate::models::session::{CursorPosition, Participant, Session};
use crate::service::debounce::Debouncer;
use crate::service::document::DocumentService;
use crate::service::export::{export_document, to_plain_text};
use crate::service::identity::generate_identity;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Active,
    Closing,
    Closed,
}

/// Reactive state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Stays true when joining fails; there is no separate error state.
    pub is_loading: bool,
    pub current_user: Option<Participant>,
    pub users: Vec<Participant>,
    pub document: Option<Document>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Initializing,
            is_loading: true,
            current_user: None,
            users: Vec::new(),
            document: None,
        }
    }
}

/// Everything a controller talks to. Built once per process and shared
/// between the views it spawns.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn CollabStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub clock: Arc<dyn Clock>,
    pub url: Arc<dyn UrlState>,
    pub clipboard: Arc<dyn Clipboard>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(
        store: Arc<dyn CollabStore>,
        feed: Arc<dyn ChangeFeed>,
        url: Arc<dyn UrlState>,
        clipboard: Arc<dyn Clipboard>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            feed,
            clock: Arc::new(SystemClock),
            url,
            clipboard,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    context: SessionContext,
    state: watch::Sender<SessionSnapshot>,
    /// Own presence row as last written.
    session: Mutex<Option<Session>>,
}

impl Shared {
    async fn reload_presence(&self, document_id: &str) -> Result<(), AppError> {
        let sessions = self.context.store.list_sessions(document_id).await?;
        let users: Vec<Participant> = sessions.iter().map(Participant::from).collect();
        trace!(document_id, participants = users.len(), "presence reloaded");
        self.state.send_modify(|snapshot| snapshot.users = users);
        Ok(())
    }

    fn apply_remote_document(&self, document: Document) {
        self.state.send_if_modified(|snapshot| {
            let replace = matches!(&snapshot.document, Some(current) if current.id == document.id && *current != document);
            if replace {
                snapshot.document = Some(document);
            }
            replace
        });
    }

    async fn sweep(&self) -> Result<u64, AppError> {
        let cutoff = self.context.clock.now() - self.context.config.stale_after();
        let removed = self.context.store.delete_stale_sessions(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "stale sessions swept");
        }
        Ok(removed)
    }
}

/// Resources owned while Active. Dropping it stops every background task and
/// discards a pending content commit.
struct Runtime {
    document_id: String,
    session_id: Uuid,
    subscriptions: Vec<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
    content: Debouncer<String>,
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Who owns the view's resources. Only one `start` may be joining at a time.
enum Lifecycle {
    Idle,
    /// `start` is between resolving and going Active. `close` marks it
    /// cancelled and the joining call releases what it acquired.
    Joining { cancelled: bool },
    Running(Runtime),
    Finished,
}

pub struct SessionController {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl SessionController {
    pub fn new(context: SessionContext) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                context,
                state,
                session: Mutex::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Join the document named by the URL, or the default one.
    ///
    /// On failure the snapshot stays `Initializing` with `is_loading` set and
    /// the error is returned. Calling `start` again retries the join.
    ///
    /// A second `start` while one is joining fails with `SessionInactive`. If
    /// `close` runs during the join, the joined session is torn down here and
    /// the view ends `Closed` instead of `Active`.
    pub async fn start(&self) -> Result<(), AppError> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if !matches!(*lifecycle, Lifecycle::Idle) {
                return Err(AppError::SessionInactive);
            }
            *lifecycle = Lifecycle::Joining { cancelled: false };
        }

        let joined = self.join().await;

        // Settle ownership under the lock; any release happens after it is dropped.
        let (cancelled, joined) = {
            let mut lifecycle = lock(&self.lifecycle);
            let cancelled = matches!(*lifecycle, Lifecycle::Joining { cancelled: true });
            let joined = match joined {
                Ok(runtime) if !cancelled => {
                    self.shared.context.url.replace_document_param(&runtime.document_id);
                    info!(document_id = %runtime.document_id, session_id = %runtime.session_id, "session active");
                    *lifecycle = Lifecycle::Running(runtime);
                    Ok(None)
                }
                Ok(runtime) => {
                    *lifecycle = Lifecycle::Finished;
                    Ok(Some(runtime))
                }
                Err(err) => {
                    *lifecycle = if cancelled { Lifecycle::Finished } else { Lifecycle::Idle };
                    Err(err)
                }
            };
            (cancelled, joined)
        };

        match joined {
            Ok(None) => {
                self.shared.state.send_modify(|snapshot| {
                    snapshot.status = SessionStatus::Active;
                    snapshot.is_loading = false;
                });
                Ok(())
            }
            Ok(Some(runtime)) => {
                debug!(session_id = %runtime.session_id, "view closed while joining, releasing session");
                let released = self.release(runtime).await;
                self.mark_closed();
                released.and(Err(AppError::SessionInactive))
            }
            Err(err) if cancelled => {
                self.mark_closed();
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "failed to join document session, view stays loading");
                Err(err)
            }
        }
    }

    async fn join(&self) -> Result<Runtime, AppError> {
        let context = &self.shared.context;
        let default_id = context.config.default_document_id.as_str();
        let requested = context
            .url
            .document_param()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| default_id.to_string());
        debug!(requested = %requested, "joining document");

        let document = DocumentService::new(context.store.as_ref(), default_id).resolve(&requested).await?;

        let identity = generate_identity();
        let session = Session {
            id: identity.id,
            name: identity.name,
            color: identity.color,
            document_id: Some(document.id.clone()),
            cursor_x: CursorPosition::ORIGIN.x,
            cursor_y: CursorPosition::ORIGIN.y,
            last_seen: context.clock.now(),
        };
        let session = context.store.upsert_session(&session).await?;

        match self.subscribe_and_load(&document, &session).await {
            Ok(runtime) => Ok(runtime),
            Err(err) => {
                // Leave no presence row behind for a view that never became active.
                if let Err(cleanup) = context.store.delete_session(&session.id).await {
                    debug!(session_id = %session.id, error = %cleanup, "could not remove session after failed join");
                }
                Err(err)
            }
        }
    }

    async fn subscribe_and_load(&self, document: &Document, session: &Session) -> Result<Runtime, AppError> {
        let context = &self.shared.context;
        let filter = ChangeFilter::Document(document.id.clone());

        let presence = context.feed.subscribe(Table::UserSessions, filter.clone()).await?;
        let changes = match context.feed.subscribe(Table::Documents, filter).await {
            Ok(changes) => changes,
            Err(err) => {
                let _ = context.feed.unsubscribe(presence.id()).await;
                return Err(err);
            }
        };
        let subscriptions = vec![presence.id(), changes.id()];

        // Subscribed first so no change between the load and the listener is lost.
        if let Err(err) = self.shared.reload_presence(&document.id).await {
            for id in &subscriptions {
                let _ = context.feed.unsubscribe(*id).await;
            }
            return Err(err);
        }

        *lock(&self.shared.session) = Some(session.clone());
        self.shared.state.send_modify(|snapshot| {
            snapshot.current_user = Some(Participant::from(session));
            snapshot.document = Some(document.clone());
        });

        let tasks = vec![
            tokio::spawn(follow_presence(self.shared.clone(), presence, document.id.clone())),
            tokio::spawn(follow_document(self.shared.clone(), changes, document.id.clone())),
            tokio::spawn(sweep_periodically(self.shared.clone())),
        ];

        Ok(Runtime {
            document_id: document.id.clone(),
            session_id: session.id,
            subscriptions,
            tasks,
            content: content_committer(context, &document.id),
        })
    }

    fn ensure_active(&self) -> Result<(), AppError> {
        match self.shared.state.borrow().status {
            SessionStatus::Active => Ok(()),
            _ => Err(AppError::SessionInactive),
        }
    }

    fn current_document(&self) -> Result<Document, AppError> {
        self.ensure_active()?;
        self.shared.state.borrow().document.clone().ok_or(AppError::SessionInactive)
    }

    /// Move the local cursor now, then write it with a fresh `last_seen`.
    pub async fn update_cursor(&self, position: CursorPosition) -> Result<(), AppError> {
        self.ensure_active()?;
        let now = self.shared.context.clock.now();
        let session = {
            let mut guard = lock(&self.shared.session);
            let session = guard.as_mut().ok_or(AppError::SessionInactive)?;
            *session = session.with_cursor(position, now);
            session.clone()
        };

        self.shared.state.send_modify(|snapshot| {
            if let Some(user) = snapshot.current_user.as_mut() {
                user.cursor = position;
                user.last_seen = now;
            }
        });

        if let Err(err) = self.shared.context.store.upsert_session(&session).await {
            warn!(session_id = %session.id, error = %err, "cursor update not stored");
            return Err(err);
        }
        Ok(())
    }

    /// Replace the local content now; the store sees it after the debounce window.
    pub fn edit_content(&self, content: impl Into<String>) -> Result<(), AppError> {
        self.ensure_active()?;
        let content = content.into();

        self.shared.state.send_modify(|snapshot| {
            if let Some(document) = snapshot.document.as_mut() {
                document.content = content.clone();
            }
        });

        let lifecycle = lock(&self.lifecycle);
        let accepted = match &*lifecycle {
            Lifecycle::Running(runtime) => runtime.content.push(content),
            _ => false,
        };
        if !accepted {
            return Err(AppError::SessionInactive);
        }
        Ok(())
    }

    /// Commit a title immediately. Only title and `updated_at` are taken from
    /// the stored row so a pending content edit is not reverted locally.
    pub async fn update_title(&self, title: &str) -> Result<Document, AppError> {
        let document = self.current_document()?;
        let patch = DocumentPatch::title(title.trim());
        patch.validate()?;

        let updated = match self.shared.context.store.update_document(&document.id, &patch).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "title update not stored");
                return Err(err);
            }
        };

        self.shared.state.send_modify(|snapshot| {
            if let Some(local) = snapshot.document.as_mut().filter(|local| local.id == updated.id) {
                local.title = updated.title.clone();
                local.updated_at = updated.updated_at;
            }
        });
        Ok(updated)
    }

    pub async fn reload_presence(&self) -> Result<(), AppError> {
        let document = self.current_document()?;
        self.shared.reload_presence(&document.id).await
    }

    /// Delete every session last seen before now minus the staleness window.
    /// Safe to run from any number of clients.
    pub async fn sweep_stale_sessions(&self) -> Result<u64, AppError> {
        self.ensure_active()?;
        self.shared.sweep().await
    }

    pub async fn copy_share_link(&self, base_url: &str) -> Result<String, AppError> {
        let document = self.current_document()?;
        let link = share_link(base_url, &document.id)?;
        self.copy(&link).await?;
        Ok(link)
    }

    pub async fn copy_plain_text(&self) -> Result<String, AppError> {
        let document = self.current_document()?;
        let text = to_plain_text(&document.content);
        self.copy(&text).await?;
        Ok(text)
    }

    /// Export the local copy, including edits not yet committed.
    pub fn export(&self, format: ExportFormat) -> Result<ExportedDocument, AppError> {
        Ok(export_document(&self.current_document()?, format))
    }

    async fn copy(&self, text: &str) -> Result<(), AppError> {
        self.shared.context.clipboard.write_text(text).await.inspect_err(|err| {
            warn!(error = %err, "clipboard write failed");
        })
    }

    /// Leave the document. Stops the sweep and the feed listeners, discards a
    /// pending content commit, releases both subscriptions and deletes the
    /// own presence row. Nothing touches the stores afterwards.
    ///
    /// Closing while `start` is still joining returns at once; the joining
    /// call performs the release when it resumes.
    ///
    /// Closing twice is a no-op. Every step runs even if an earlier one fails;
    /// the first failure is returned.
    pub async fn close(&self) -> Result<(), AppError> {
        let runtime = {
            let mut lifecycle = lock(&self.lifecycle);
            match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
                Lifecycle::Idle => None,
                Lifecycle::Running(runtime) => Some(runtime),
                Lifecycle::Joining { .. } => {
                    *lifecycle = Lifecycle::Joining { cancelled: true };
                    drop(lifecycle);
                    self.shared.state.send_modify(|snapshot| snapshot.status = SessionStatus::Closing);
                    return Ok(());
                }
                Lifecycle::Finished => return Ok(()),
            }
        };

        let Some(runtime) = runtime else {
            self.mark_closed();
            return Ok(());
        };
        self.shared.state.send_modify(|snapshot| snapshot.status = SessionStatus::Closing);
        let released = self.release(runtime).await;
        self.mark_closed();
        released
    }

    /// Stop the tasks, drop the pending commit, then give back the
    /// subscriptions and the presence row.
    async fn release(&self, mut runtime: Runtime) -> Result<(), AppError> {
        let subscriptions = std::mem::take(&mut runtime.subscriptions);
        let session_id = runtime.session_id;
        let document_id = runtime.document_id.clone();
        drop(runtime);
        *lock(&self.shared.session) = None;

        let context = &self.shared.context;
        let mut first_error = None;
        for id in subscriptions {
            if let Err(err) = context.feed.unsubscribe(id).await {
                warn!(error = %err, "failed to release change feed subscription");
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = context.store.delete_session(&session_id).await {
            warn!(session_id = %session_id, error = %err, "failed to delete own session, the sweep will reap it");
            first_error.get_or_insert(err);
        }
        info!(document_id = %document_id, session_id = %session_id, "session closed");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mark_closed(&self) {
        self.shared.state.send_modify(|snapshot| {
            snapshot.status = SessionStatus::Closed;
            snapshot.current_user = None;
            snapshot.users.clear();
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if matches!(*lock(&self.lifecycle), Lifecycle::Running(_)) {
            debug!("session controller dropped without close, own row is left for the sweep");
        }
    }
}

fn content_committer(context: &SessionContext, document_id: &str) -> Debouncer<String> {
    let store = context.store.clone();
    let document_id = document_id.to_string();
    Debouncer::spawn(context.config.content_debounce(), move |content: String| {
        let store = store.clone();
        let document_id = document_id.clone();
        async move {
            match store.update_document(&document_id, &DocumentPatch::content(content)).await {
                Ok(_) => debug!(document_id = %document_id, "content committed"),
                Err(err) => warn!(document_id = %document_id, error = %err, "content commit failed"),
            }
        }
    })
}

async fn follow_presence(shared: Arc<Shared>, mut subscription: Subscription, document_id: String) {
    while let Some(event) = subscription.recv().await {
        trace!(?event, "presence change");
        if let Err(err) = shared.reload_presence(&document_id).await {
            warn!(document_id = %document_id, error = %err, "presence reload failed");
        }
    }
}

async fn follow_document(shared: Arc<Shared>, mut subscription: Subscription, document_id: String) {
    while let Some(event) = subscription.recv().await {
        match event {
            ChangeEvent::Document {
                kind: ChangeKind::Update,
                document: Some(document),
                ..
            } => shared.apply_remote_document(document),
            ChangeEvent::Resync => match shared.context.store.get_document(&document_id).await {
                Ok(Some(document)) => shared.apply_remote_document(document),
                Ok(None) => debug!(document_id = %document_id, "document gone on resync"),
                Err(err) => warn!(document_id = %document_id, error = %err, "document resync failed"),
            },
            other => trace!(event = ?other, "document change ignored"),
        }
    }
}

async fn sweep_periodically(shared: Arc<Shared>) {
    let period = shared.context.config.sweep_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = shared.sweep().await {
            warn!(error = %err, "stale session sweep failed");
        }
    }
}
