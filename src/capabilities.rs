//! Host capabilities the session core needs but must not reach for directly:
//! wall-clock time, the shareable URL and the clipboard.

use crate::error::app_error::AppError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::warn;
use url::Url;

pub const DOCUMENT_QUERY_PARAM: &str = "doc";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The visible location of the document view.
pub trait UrlState: Send + Sync {
    /// Value of the `doc` query parameter, if any.
    fn document_param(&self) -> Option<String>;

    /// Point the visible URL at `document_id` in place, without adding a history entry.
    fn replace_document_param(&self, document_id: &str);
}

#[async_trait::async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<(), AppError>;
}

/// Keeps an href in memory and rewrites its `doc` parameter on replace.
#[derive(Debug)]
pub struct QueryStringUrl {
    href: Mutex<String>,
}

impl QueryStringUrl {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: Mutex::new(href.into()) }
    }

    pub fn href(&self) -> String {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.href.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UrlState for QueryStringUrl {
    fn document_param(&self) -> Option<String> {
        let url = Url::parse(&self.lock()).ok()?;
        document_param(&url)
    }

    fn replace_document_param(&self, document_id: &str) {
        let mut href = self.lock();
        match Url::parse(&href) {
            Ok(mut url) => {
                set_document_param(&mut url, document_id);
                *href = url.into();
            }
            Err(err) => warn!(href = %href, error = %err, "cannot point an unparsable URL at a document"),
        }
    }
}

/// Clipboard backed by a buffer; the last copied text wins.
#[derive(Debug, Default)]
pub struct BufferClipboard {
    contents: Mutex<Option<String>>,
}

impl BufferClipboard {
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Clipboard for BufferClipboard {
    async fn write_text(&self, text: &str) -> Result<(), AppError> {
        *self.contents.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(text.to_string());
        Ok(())
    }
}

/// Shareable link for a document: `base` with its `doc` parameter set to `document_id`.
pub fn share_link(base: &str, document_id: &str) -> Result<String, AppError> {
    let mut url = Url::parse(base).map_err(|err| AppError::BadRequest(format!("Invalid base URL {}: {}", base, err)))?;
    set_document_param(&mut url, document_id);
    Ok(url.into())
}

fn document_param(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == DOCUMENT_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Replaces `doc`, keeping the other pairs in order and the fragment.
fn set_document_param(url: &mut Url, document_id: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != DOCUMENT_QUERY_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(DOCUMENT_QUERY_PARAM, document_id);
}
