//! Dated occurrences in the chronicle.

use super::{EntityKind, Record};
use crate::schema::string_enum_schema;
use crate::Schema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Announced or planned but not yet happened.
    Pending,
    /// Still unfolding at the end of the chapter.
    Ongoing,
    #[default]
    Resolved,
    /// Attempted and did not come about.
    Failed,
}

string_enum_schema!(EventStatus => ["pending", "ongoing", "resolved", "failed"]);

/// One turn of dialogue or narration inside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct Turn {
    /// Who speaks; "narrator" for narration
    pub speaker: String,
    /// What was said or narrated
    pub text: String,
}

/// The roll outcome embedded in the event it decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollSummary {
    /// Canonical roll ID.
    pub roll: String,
    pub rolled: u8,
    /// Canonical interval, `lo-hi`.
    pub outcome: String,
    pub label: String,
}

/// A dated occurrence with participants, a place and an optional roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Allocated ID, `evt_{partition}_{counter}`.
    pub id: String,
    /// In-story date, `YYYY[-MM[-DD]]`.
    pub date: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub summary: String,
    /// Canonical character IDs, in order of appearance.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Canonical faction IDs affected by the event.
    #[serde(default)]
    pub factions: Vec<String>,
    /// Free-text place description as narrated.
    #[serde(default)]
    pub location: String,
    /// Location ID derived from `location`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<RollSummary>,
    /// Chapter the event was first merged from.
    pub chapter: String,
    /// Provenance key, `{chapter}#{local key}`.
    #[serde(default)]
    pub source: String,
}

impl Event {
    /// Create an event with only its identity and date.
    pub fn new(id: impl Into<String>, date: impl Into<String>, chapter: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            date: date.into(),
            event_type: String::new(),
            summary: String::new(),
            participants: Vec::new(),
            factions: Vec::new(),
            location: String::new(),
            location_id: None,
            tags: Vec::new(),
            status: EventStatus::default(),
            transcript: Vec::new(),
            roll: None,
            chapter: chapter.into(),
            source: String::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_participant(mut self, character: impl Into<String>) -> Self {
        self.participants.push(character.into());
        self
    }

    /// Check if a character takes part in this event.
    pub fn involves(&self, character: &str) -> bool {
        self.participants.iter().any(|p| p == character)
    }
}

impl Record for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn id(&self) -> &str {
        &self.id
    }

    fn date(&self) -> Option<&str> {
        Some(&self.date)
    }
}
