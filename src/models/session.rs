use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Position in the document-local coordinate space.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, JsonSchema)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub const ORIGIN: CursorPosition = CursorPosition { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One participant's presence row in `user_sessions`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub document_id: Option<String>,
    pub cursor_x: f64,
    pub cursor_y: f64,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn cursor(&self) -> CursorPosition {
        CursorPosition::new(self.cursor_x, self.cursor_y)
    }

    pub fn with_cursor(&self, cursor: CursorPosition, last_seen: DateTime<Utc>) -> Self {
        Self {
            cursor_x: cursor.x,
            cursor_y: cursor.y,
            last_seen,
            ..self.clone()
        }
    }

    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

/// Presence as the presentation layer sees it.
#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub cursor: CursorPosition,
    pub last_seen: DateTime<Utc>,
}

impl From<&Session> for Participant {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            color: session.color.clone(),
            cursor: session.cursor(),
            last_seen: session.last_seen,
        }
    }
}

pub fn initials(name: &str) -> String {
    name.split_whitespace().filter_map(|word| word.chars().next()).flat_map(char::to_uppercase).collect()
}

#[derive(Deserialize, Debug, Clone, Validate, JsonSchema)]
pub struct SessionRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(min = 1, max = 32))]
    pub color: String,
    pub document_id: Option<String>,
    #[serde(default)]
    pub cursor: CursorPosition,
}

#[derive(Serialize, Debug, Clone, JsonSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub initials: String,
    pub document_id: Option<String>,
    pub cursor: CursorPosition,
    pub last_seen: DateTime<Utc>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            color: session.color.clone(),
            initials: initials(&session.name),
            document_id: session.document_id.clone(),
            cursor: session.cursor(),
            last_seen: session.last_seen,
        }
    }
}

#[derive(Serialize, Debug, Clone, JsonSchema)]
pub struct SweepResponse {
    pub sessions_removed: u64,
    pub cutoff: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample_session() -> Session {
        Session {
            id: Uuid::new_v4(),
            name: "Swift Writer".to_string(),
            color: "#3B82F6".to_string(),
            document_id: Some("default".to_string()),
            cursor_x: 0.0,
            cursor_y: 0.0,
            last_seen: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn initials_take_first_letter_of_each_word() {
        assert_eq!(initials("Swift Writer"), "SW");
        assert_eq!(initials("  calm   pioneer "), "CP");
        assert_eq!(initials(""), "");
    }

    #[test]
    fn with_cursor_only_touches_cursor_and_timestamp() {
        let session = sample_session();
        let later = session.last_seen + chrono::Duration::seconds(3);
        let moved = session.with_cursor(CursorPosition::new(12.5, 40.0), later);

        assert_eq!(moved.id, session.id);
        assert_eq!(moved.name, session.name);
        assert_eq!(moved.cursor(), CursorPosition::new(12.5, 40.0));
        assert_eq!(moved.last_seen, later);
    }

    #[test]
    fn staleness_is_strictly_older_than_cutoff() {
        let session = sample_session();
        assert!(!session.is_stale(session.last_seen));
        assert!(session.is_stale(session.last_seen + chrono::Duration::seconds(1)));
    }

    #[test]
    fn participant_mirrors_session_row() {
        let session = sample_session().with_cursor(CursorPosition::new(3.0, 4.0), sample_session().last_seen);
        let participant = Participant::from(&session);
        assert_eq!(participant.id, session.id);
        assert_eq!(participant.cursor, CursorPosition::new(3.0, 4.0));
        assert_eq!(initials(&participant.name), "SW");
    }

    proptest! {
        #[test]
        fn initials_have_one_letter_per_word(words in proptest::collection::vec("[a-z]{1,8}", 0..6)) {
            let name = words.join(" ");
            let result = initials(&name);
            prop_assert_eq!(result.chars().count(), words.len());
            prop_assert!(result.chars().all(|c| c.is_ascii_uppercase()));
        }
    }
}
