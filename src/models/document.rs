use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use validator::{Validate, ValidationError};

pub const WELCOME_TITLE: &str = "New Shared Document";
pub const WELCOME_CONTENT: &str = "<h1>Welcome to your shared document!</h1><p>Start collaborating by typing here...</p>";

/// Authoritative document row. Local copies held by a session are caches of this.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone, Validate, JsonSchema)]
pub struct DocumentRequest {
    /// Client supplied id used by shareable URLs; generated server-side when absent.
    #[validate(length(min = 1, max = 128), custom(function = "validate_document_id"))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    pub content: Option<String>,
}

impl DocumentRequest {
    /// Canned document created the first time a shared id is opened.
    pub fn welcome(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            title: WELCOME_TITLE.to_string(),
            content: Some(WELCOME_CONTENT.to_string()),
        }
    }

    /// The "new document" action: server-generated id, content seeded from the title.
    pub fn titled(title: &str) -> Self {
        Self {
            id: None,
            title: title.trim().to_string(),
            content: Some(format!("<h1>{}</h1><p>Start writing your document here...</p>", escape_html(title.trim()))),
        }
    }
}

/// Partial update. Whatever is present fully replaces the stored field.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Validate, JsonSchema)]
pub struct DocumentPatch {
    #[validate(length(max = 256))]
    pub title: Option<String>,
    pub content: Option<String>,
}

impl DocumentPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

#[derive(Serialize, Debug, Clone, JsonSchema)]
pub struct DocumentResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentResponse {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            content: document.content.clone(),
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

fn validate_document_id(id: &str) -> Result<(), ValidationError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_document_id"))
    }
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_request_keeps_the_shared_id() {
        let request = DocumentRequest::welcome("team-notes");
        assert_eq!(request.id.as_deref(), Some("team-notes"));
        assert_eq!(request.title, WELCOME_TITLE);
        assert_eq!(request.content.as_deref(), Some(WELCOME_CONTENT));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn titled_request_escapes_markup_in_seed_content() {
        let request = DocumentRequest::titled("  Q3 <Plan>  ");
        assert_eq!(request.id, None);
        assert_eq!(request.title, "Q3 <Plan>");
        assert_eq!(
            request.content.as_deref(),
            Some("<h1>Q3 &lt;Plan&gt;</h1><p>Start writing your document here...</p>")
        );
    }

    #[test]
    fn empty_title_is_rejected() {
        let request = DocumentRequest::titled("   ");
        assert!(request.validate().is_err());
    }

    #[test]
    fn document_id_with_path_characters_is_rejected() {
        let mut request = DocumentRequest::welcome("ok-id_1");
        assert!(request.validate().is_ok());
        request.id = Some("../etc".to_string());
        assert!(request.validate().is_err());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(DocumentPatch::default().is_empty());
        assert!(!DocumentPatch::title("x").is_empty());
        assert!(!DocumentPatch::content("").is_empty());
    }
}
