use rocket::FromFormField;
use rocket::http::ContentType;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;

#[derive(FromFormField, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[field(value = "html")]
    Html,
    #[field(value = "text")]
    #[field(value = "txt")]
    Text,
    #[field(value = "markdown")]
    #[field(value = "md")]
    Markdown,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Html => "html",
            ExportFormat::Text => "txt",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn content_type(self) -> ContentType {
        match self {
            ExportFormat::Html => ContentType::HTML,
            ExportFormat::Text => ContentType::Plain,
            ExportFormat::Markdown => ContentType::new("text", "markdown"),
        }
    }

    pub fn file_name(self, title: &str) -> String {
        format!("{}.{}", title, self.extension())
    }
}

/// Rendered export ready to be downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedDocument {
    pub format: ExportFormat,
    pub file_name: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_use_format_extension() {
        assert_eq!(ExportFormat::Html.file_name("Notes"), "Notes.html");
        assert_eq!(ExportFormat::Text.file_name("Notes"), "Notes.txt");
        assert_eq!(ExportFormat::Markdown.file_name("Notes"), "Notes.md");
    }

    #[test]
    fn markdown_has_its_own_media_type() {
        assert_eq!(ExportFormat::Markdown.content_type().to_string(), "text/markdown");
        assert_eq!(ExportFormat::Html.content_type(), ContentType::HTML);
    }
}
