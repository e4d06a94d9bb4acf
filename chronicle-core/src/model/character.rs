//! Canonical characters.

use super::{EntityKind, Record};
use crate::schema::string_enum_schema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterStatus {
    #[default]
    Active,
    Deceased,
    Missing,
    Exiled,
    Unknown,
}

string_enum_schema!(CharacterStatus => ["active", "deceased", "missing", "exiled", "unknown"]);

/// Where a character stands at the end of the latest merged chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub personality: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
}

/// One entry of a character's trait-acquisition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitChange {
    /// The trait gained or lost.
    pub quality: String,
    /// Event in which it happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A canonical character identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    /// Alternate names; each resolves only to this character.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Estimated birth date, `YYYY[-MM[-DD]]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub status: CharacterStatus,
    /// Category tags (e.g. "royalty", "clergy").
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub state: CharacterState,
    /// Canonical faction IDs.
    #[serde(default)]
    pub factions: Vec<String>,
    #[serde(default)]
    pub trait_history: Vec<TraitChange>,
    /// Events the character appears in.
    #[serde(default)]
    pub events: Vec<String>,
}

impl Character {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            title: None,
            birth_date: None,
            status: CharacterStatus::default(),
            tags: Vec::new(),
            state: CharacterState::default(),
            factions: Vec::new(),
            trait_history: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Add an alias for this character.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.state.location = Some(location.into());
        self
    }

    /// Check if a name refers to this character (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        if self.id.to_lowercase() == query_lower || self.name.to_lowercase() == query_lower {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase() == query_lower)
    }
}

impl Record for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn id(&self) -> &str {
        &self.id
    }

    fn date(&self) -> Option<&str> {
        self.birth_date.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matching() {
        let character = Character::new("alfonso_x", "Alfonso X")
            .with_alias("el Sabio")
            .with_alias("Alfonso el Sabio");

        assert!(character.matches_name("alfonso x"));
        assert!(character.matches_name("EL SABIO"));
        assert!(character.matches_name("alfonso_x"));
        assert!(!character.matches_name("Sancho"));
    }

    #[test]
    fn test_sparse_json_fills_defaults() {
        let json = r#"{"id": "sancho", "name": "Sancho"}"#;
        let character: Character = serde_json::from_str(json).unwrap();
        assert_eq!(character.status, CharacterStatus::Active);
        assert!(character.events.is_empty());
        assert!(character.state.location.is_none());
    }
}
