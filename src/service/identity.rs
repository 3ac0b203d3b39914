use rand::seq::IndexedRandom;
use uuid::Uuid;

const ADJECTIVES: &[&str] = &[
    "Swift", "Bright", "Clever", "Bold", "Wise", "Quick", "Sharp", "Creative", "Dynamic", "Energetic", "Focused", "Gentle", "Happy",
    "Inspired", "Joyful", "Kind", "Lively", "Mindful", "Noble", "Optimistic", "Peaceful", "Radiant", "Serene", "Thoughtful", "Vibrant",
    "Zealous", "Agile", "Brilliant", "Calm",
];

const NOUNS: &[&str] = &[
    "Writer", "Editor", "Scribe", "Author", "Poet", "Novelist", "Journalist", "Composer", "Creator", "Thinker", "Dreamer", "Visionary",
    "Innovator", "Builder", "Maker", "Designer", "Architect", "Planner", "Strategist", "Explorer", "Pioneer", "Navigator", "Guide",
    "Mentor", "Teacher", "Scholar",
];

pub const PALETTE: &[&str] = &[
    "#3B82F6", "#8B5CF6", "#EF4444", "#10B981", "#F59E0B", "#EC4899", "#06B6D4", "#84CC16", "#F97316", "#6366F1", "#14B8A6", "#F43F5E",
];

/// An anonymous participant. Only `id` is unique; names repeat freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

pub fn generate_identity() -> Identity {
    let mut rng = rand::rng();
    // The vocabularies are non-empty constants, so `choose` always yields.
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Calm");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Writer");
    let color = PALETTE.choose(&mut rng).copied().unwrap_or(PALETTE[0]);

    Identity {
        id: Uuid::new_v4(),
        name: format!("{} {}", adjective, noun),
        color: color.to_string(),
    }
}
