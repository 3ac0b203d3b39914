use crate::database::document::DocumentRepository;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, FeedHub, Subscription, SubscriptionId, Table};
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// NOTIFY channel written by the triggers in `migrations/`.
pub const CHANGE_CHANNEL: &str = "coscribe_changes";

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Trigger payload. Document content is never inlined because NOTIFY payloads are capped at 8000 bytes.
#[derive(Debug, Deserialize, PartialEq)]
struct NotifyPayload {
    table: Table,
    op: ChangeKind,
    id: String,
    document_id: Option<String>,
}

/// Change Feed backed by Postgres LISTEN/NOTIFY.
pub struct PgChangeFeed {
    hub: FeedHub,
    listener_task: JoinHandle<()>,
}

impl PgChangeFeed {
    pub async fn connect(pool: PgPool) -> Result<Self, AppError> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let hub = FeedHub::default();
        let repository = PostgresRepository { pool };
        let listener_task = tokio::spawn(forward_notifications(listener, repository, hub.clone()));
        info!(channel = CHANGE_CHANNEL, "listening for store changes");

        Ok(Self { hub, listener_task })
    }
}

impl Drop for PgChangeFeed {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

#[async_trait::async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, table: Table, filter: ChangeFilter) -> Result<Subscription, AppError> {
        if self.listener_task.is_finished() {
            return Err(AppError::Feed("change listener is not running".to_string()));
        }
        Ok(self.hub.register(table, filter))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AppError> {
        self.hub.remove(id);
        Ok(())
    }
}

/// `try_recv` yields `None` when the connection dropped; it reconnects on the
/// next call. Anything notified in between is gone, so subscribers are told
/// to refetch.
async fn forward_notifications(mut listener: PgListener, repository: PostgresRepository, hub: FeedHub) {
    loop {
        let notification = match listener.try_recv().await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                let notified = hub.publish(&ChangeEvent::Resync);
                warn!(subscribers = notified, "change listener reconnecting, subscribers asked to resync");
                continue;
            }
            Err(err) => {
                warn!(error = %err, "change listener lost its connection");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        let event = match parse_payload(notification.payload()) {
            Ok(payload) => into_event(payload, &repository).await,
            Err(err) => Err(err),
        };

        match event {
            Ok(event) => {
                hub.publish(&event);
            }
            Err(err) => warn!(error = %err, payload = notification.payload(), "dropping change notification"),
        }
    }
}

fn parse_payload(raw: &str) -> Result<NotifyPayload, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::serialization("Malformed change notification", e))
}

async fn into_event(payload: NotifyPayload, repository: &PostgresRepository) -> Result<ChangeEvent, AppError> {
    match payload.table {
        Table::Documents => {
            let document = match payload.op {
                ChangeKind::Delete => None,
                ChangeKind::Insert | ChangeKind::Update => repository.get_document(&payload.id).await?,
            };
            Ok(ChangeEvent::Document {
                kind: payload.op,
                document_id: payload.id,
                document,
            })
        }
        Table::UserSessions => Ok(ChangeEvent::Session {
            kind: payload.op,
            session_id: Uuid::parse_str(&payload.id)?,
            document_id: payload.document_id,
        }),
    }
}
