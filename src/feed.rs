//! Change Feed: push notifications for row changes in the shared stores.
//!
//! Delivery is at-least-once and every subscriber is notified, including the
//! client whose write caused the change. Handlers are expected to be
//! idempotent refetches so self-notification is harmless.

pub mod postgres;

use crate::error::app_error::AppError;
use crate::models::document::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Documents,
    UserSessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row filter applied on the publishing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    All,
    /// Documents: the row id. Sessions: the `document_id` column.
    Document(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Document {
        kind: ChangeKind,
        document_id: String,
        /// Current row; absent for deletes.
        document: Option<Document>,
    },
    Session {
        kind: ChangeKind,
        session_id: Uuid,
        document_id: Option<String>,
    },
    /// Notifications may have been lost (the feed reconnected). Delivered to
    /// every subscriber regardless of table or filter; receivers refetch.
    Resync,
}

impl ChangeEvent {
    /// Table the event belongs to; `None` for [`ChangeEvent::Resync`].
    pub fn table(&self) -> Option<Table> {
        match self {
            ChangeEvent::Document { .. } => Some(Table::Documents),
            ChangeEvent::Session { .. } => Some(Table::UserSessions),
            ChangeEvent::Resync => None,
        }
    }

    fn document_scope(&self) -> Option<&str> {
        match self {
            ChangeEvent::Document { document_id, .. } => Some(document_id),
            ChangeEvent::Session { document_id, .. } => document_id.as_deref(),
            ChangeEvent::Resync => None,
        }
    }
}

impl ChangeFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Document(id) => event.document_scope() == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Live subscription. Receives every matching event until unsubscribed or dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the subscription has been released.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

#[async_trait::async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: Table, filter: ChangeFilter) -> Result<Subscription, AppError>;
    /// Releasing an unknown or already released id is not an error.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AppError>;
}

struct Subscriber {
    table: Table,
    filter: ChangeFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// In-process fan-out of change events to registered subscribers.
#[derive(Clone, Default)]
pub struct FeedHub {
    state: Arc<Mutex<HubState>>,
}

impl FeedHub {
    pub fn register(&self, table: Table, filter: ChangeFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        debug!(subscription = id.0, ?table, ?filter, "feed subscription registered");
        state.subscribers.insert(id, Subscriber { table, filter, sender });
        Subscription { id, receiver }
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = id.0, "feed subscription released");
        }
        removed
    }

    /// Deliver `event` to every matching subscriber; returns how many received it.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut state = self.lock();
        let table = event.table();
        let mut delivered = 0;
        state.subscribers.retain(|id, subscriber| {
            let wanted = match table {
                Some(table) => subscriber.table == table && subscriber.filter.matches(event),
                None => true,
            };
            if !wanted {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    trace!(subscription = id.0, "dropping closed feed subscription");
                    false
                }
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for FeedHub {
    async fn subscribe(&self, table: Table, filter: ChangeFilter) -> Result<Subscription, AppError> {
        Ok(self.register(table, filter))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AppError> {
        self.remove(id);
        Ok(())
    }
}
