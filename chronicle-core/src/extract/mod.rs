//! The extraction-service boundary.
//!
//! A chapter's narrative goes out as an [`ExtractionRequest`]; what comes
//! back is a raw structured document that must parse as a [`ChapterBatch`].
//! The payload types here double as the JSON schema of the tool the
//! service is forced to call, so the schema and the parser never drift.

mod prompt;
mod repair;
mod service;

pub use prompt::{build_request, SYSTEM_PROMPT};
pub use repair::{candidates, parse_batch};
pub use service::ClaudeExtractor;

use crate::model::{CharacterStatus, EntityKind, EventStatus, OutcomeBand, Turn};
use crate::Schema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from extracting a chapter.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction service error: {0}")]
    Service(#[from] claude::Error),

    #[error("malformed extraction output after {attempts} attempt(s): {reason}")]
    Malformed {
        attempts: u32,
        reason: String,
        /// The last raw payload, kept for inspection.
        raw: String,
    },
}

impl ExtractError {
    /// Raw payload of a malformed response, if any.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            ExtractError::Malformed { raw, .. } => Some(raw),
            ExtractError::Service(_) => None,
        }
    }
}

/// What is sent to the extraction service for one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub chapter: String,
    /// Fixed instruction.
    pub system: String,
    /// Narrative plus known-entity context.
    pub user: String,
}

/// Something that turns a chapter request into a raw structured document.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError>;
}

#[async_trait]
impl<T: Extractor + ?Sized> Extractor for Arc<T> {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        (**self).extract(request).await
    }
}

/// Extract and parse a chapter batch.
///
/// Service errors are returned at once (the client has already retried
/// transient ones). Unparseable output is requested again up to
/// `attempts` times in total.
pub async fn extract_batch<E>(
    extractor: &E,
    request: &ExtractionRequest,
    attempts: u32,
) -> Result<ChapterBatch, ExtractError>
where
    E: Extractor + ?Sized,
{
    let attempts = attempts.max(1);
    let mut last = (String::new(), String::new());

    for attempt in 1..=attempts {
        let raw = extractor.extract(request).await?;
        match parse_batch(&raw) {
            Ok(batch) => return Ok(batch),
            Err(reason) => {
                warn!(chapter = %request.chapter, attempt, %reason, "malformed extraction output");
                last = (reason, raw);
            }
        }
    }

    let (reason, raw) = last;
    Err(ExtractError::Malformed { attempts, reason, raw })
}

// ============================================================================
// Payload
// ============================================================================

/// Record everything the chapter adds to the chronicle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
#[schema(tool = "record_chapter")]
pub struct ChapterBatch {
    /// Events that happen in this chapter, in narrative order
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
    /// Characters introduced in this chapter, or known ones under a new name
    #[serde(default)]
    pub characters: Vec<ExtractedCharacter>,
    /// Places described in this chapter
    #[serde(default)]
    pub locations: Vec<ExtractedLocation>,
    /// Factions introduced in this chapter
    #[serde(default)]
    pub factions: Vec<ExtractedFaction>,
    /// Laws enacted in this chapter
    #[serde(default)]
    pub laws: Vec<ExtractedLaw>,
    /// Dice rolls made in this chapter, one per event at most
    #[serde(default)]
    pub rolls: Vec<ExtractedRoll>,
    /// Changes to records that already exist
    #[serde(default)]
    pub updates: Vec<EntityUpdate>,
}

impl ChapterBatch {
    /// Total number of input records.
    pub fn len(&self) -> usize {
        self.events.len()
            + self.characters.len()
            + self.locations.len()
            + self.factions.len()
            + self.laws.len()
            + self.rolls.len()
            + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An event as extracted from the narrative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedEvent {
    /// Short key unique within this chapter, used by rolls, laws and updates to refer to the event
    pub key: String,
    /// Canonical ID when this restates an already recorded event
    #[serde(default)]
    pub id: Option<String>,
    /// In-story date, YYYY, YYYY-MM or YYYY-MM-DD
    pub date: String,
    /// Kind of event, e.g. battle, audience, marriage, decree
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// One or two sentences on what happened
    #[serde(default)]
    pub summary: String,
    /// IDs or names of the characters taking part
    #[serde(default)]
    pub participants: Vec<String>,
    /// IDs or names of the factions affected
    #[serde(default)]
    pub factions: Vec<String>,
    /// Where it happened, primary place first, e.g. "Toledo, Alcázar Real"
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    /// Notable dialogue and narration, in order
    #[serde(default)]
    pub transcript: Vec<Turn>,
}

/// A character as extracted from the narrative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedCharacter {
    /// Canonical ID (snake_case) or a known alias
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Estimated birth date, YYYY
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub status: Option<CharacterStatus>,
    /// Categories such as royalty, clergy, military
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where the character is at the end of the chapter
    #[serde(default)]
    pub location: Option<String>,
    /// What the character is busy with
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub personality: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub speech_style: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    /// IDs or names of the factions the character belongs to
    #[serde(default)]
    pub factions: Vec<String>,
}

/// A place as extracted from the narrative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedLocation {
    /// Place as written, primary name first
    pub place: String,
    /// Display name when it differs from the primary name in place
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A faction as extracted from the narrative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedFaction {
    /// Canonical ID (snake_case) or a known alias
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// What sort of group, e.g. noble house, military order
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// ID or name of the leading character
    #[serde(default)]
    pub leader: Option<String>,
    /// IDs or names of member characters
    #[serde(default)]
    pub members: Vec<String>,
}

/// A law enacted in the chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedLaw {
    /// Canonical ID (snake_case) or a known alias
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Key of the event in this chapter that enacted the law, or a recorded event ID
    pub origin_event: String,
    /// Date of enactment
    #[serde(default)]
    pub enacted: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A d100 roll deciding an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Schema)]
pub struct ExtractedRoll {
    /// Key of the event in this chapter the roll decided, or a recorded event ID
    pub event: String,
    /// The number rolled, 1 to 100
    #[serde(default)]
    pub rolled: Option<Value>,
    /// Outcome range such as "61-80", or a label such as "success"
    #[serde(default)]
    pub outcome: Option<String>,
    /// What the outcome meant in the story
    #[serde(default)]
    pub label: Option<String>,
    /// What the roll decided
    #[serde(default)]
    pub purpose: Option<String>,
    /// The full outcome table, when the narrative gives one
    #[serde(default)]
    pub table: Vec<OutcomeBand>,
}

/// A change to a record that already exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct EntityUpdate {
    pub kind: EntityKind,
    /// Canonical ID or any known alias of the target
    pub id: String,
    /// Fields to overwrite
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
    /// Elements to add to list fields
    #[serde(default)]
    pub add: BTreeMap<String, Vec<String>>,
    /// Elements to remove from list fields
    #[serde(default)]
    pub remove: BTreeMap<String, Vec<String>>,
    /// Entries to append to history fields
    #[serde(default)]
    pub append: BTreeMap<String, Vec<Value>>,
}

impl EntityUpdate {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            set: BTreeMap::new(),
            add: BTreeMap::new(),
            remove: BTreeMap::new(),
            append: BTreeMap::new(),
        }
    }

    pub fn with_set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }

    pub fn with_add<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_remove<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_append(mut self, field: impl Into<String>, value: Value) -> Self {
        self.append.entry(field.into()).or_default().push(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.remove.is_empty() && self.append.is_empty()
    }
}
