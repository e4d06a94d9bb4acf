//! The six interlinked collections of a chronicle knowledge base.
//!
//! ## References
//!
//! ```text
//! event.participants ─────────────► character
//! event.factions ─────────────────► faction
//! event.location_id ──────────────► location
//! event.roll ─────────────────────► roll ── event ──► event
//! character.factions ─────────────► faction
//! character.events, trait_history ► event
//! faction.members, leader ────────► character
//! faction.events, location.events ► event
//! law.origin_event, history ──────► event
//! ```
//!
//! Every arrow is a reference that must resolve after a merge completes.

mod character;
mod event;
mod faction;
mod law;
mod location;
mod roll;

pub use character::{Character, CharacterState, CharacterStatus, TraitChange};
pub use event::{Event, EventStatus, RollSummary, Turn};
pub use faction::Faction;
pub use law::{Law, LawAction, LawReference, LawStatus};
pub use location::Location;
pub use roll::{OutcomeBand, Roll};

use crate::schema::string_enum_schema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kinds of records the knowledge base holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Character,
    Location,
    Faction,
    Roll,
    Law,
}

string_enum_schema!(EntityKind => ["event", "character", "location", "faction", "roll", "law"]);

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Event,
        EntityKind::Character,
        EntityKind::Location,
        EntityKind::Faction,
        EntityKind::Roll,
        EntityKind::Law,
    ];

    /// Singular name, as used in JSON and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Character => "character",
            EntityKind::Location => "location",
            EntityKind::Faction => "faction",
            EntityKind::Roll => "roll",
            EntityKind::Law => "law",
        }
    }

    /// File the collection of this kind is persisted to.
    pub fn file_name(&self) -> &'static str {
        match self {
            EntityKind::Event => "events.json",
            EntityKind::Character => "characters.json",
            EntityKind::Location => "locations.json",
            EntityKind::Faction => "factions.json",
            EntityKind::Roll => "rolls.json",
            EntityKind::Law => "laws.json",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record stored in one of the six collections.
pub trait Record: Clone + Serialize + DeserializeOwned {
    const KIND: EntityKind;

    /// Canonical identifier.
    fn id(&self) -> &str;

    /// In-story date, for collection metadata.
    fn date(&self) -> Option<&str> {
        None
    }
}

/// A collection of records keyed by canonical ID.
pub type Collection<T> = BTreeMap<String, T>;

/// The whole knowledge base: six collections persisted side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub events: Collection<Event>,
    #[serde(default)]
    pub characters: Collection<Character>,
    #[serde(default)]
    pub locations: Collection<Location>,
    #[serde(default)]
    pub factions: Collection<Faction>,
    #[serde(default)]
    pub rolls: Collection<Roll>,
    #[serde(default)]
    pub laws: Collection<Law>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record with this canonical ID exists.
    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Event => self.events.contains_key(id),
            EntityKind::Character => self.characters.contains_key(id),
            EntityKind::Location => self.locations.contains_key(id),
            EntityKind::Faction => self.factions.contains_key(id),
            EntityKind::Roll => self.rolls.contains_key(id),
            EntityKind::Law => self.laws.contains_key(id),
        }
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Event => self.events.len(),
            EntityKind::Character => self.characters.len(),
            EntityKind::Location => self.locations.len(),
            EntityKind::Faction => self.factions.len(),
            EntityKind::Roll => self.rolls.len(),
            EntityKind::Law => self.laws.len(),
        }
    }

    /// Canonical IDs of one kind, in order.
    pub fn ids(&self, kind: EntityKind) -> Vec<&str> {
        fn keys<T>(c: &Collection<T>) -> Vec<&str> {
            c.keys().map(String::as_str).collect()
        }
        match kind {
            EntityKind::Event => keys(&self.events),
            EntityKind::Character => keys(&self.characters),
            EntityKind::Location => keys(&self.locations),
            EntityKind::Faction => keys(&self.factions),
            EntityKind::Roll => keys(&self.rolls),
            EntityKind::Law => keys(&self.laws),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|&kind| self.count(kind) == 0)
    }
}

/// Per-kind counters, used in merge summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    #[serde(default)]
    pub event: usize,
    #[serde(default)]
    pub character: usize,
    #[serde(default)]
    pub location: usize,
    #[serde(default)]
    pub faction: usize,
    #[serde(default)]
    pub roll: usize,
    #[serde(default)]
    pub law: usize,
}

impl EntityCounts {
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Event => self.event,
            EntityKind::Character => self.character,
            EntityKind::Location => self.location,
            EntityKind::Faction => self.faction,
            EntityKind::Roll => self.roll,
            EntityKind::Law => self.law,
        }
    }

    pub fn bump(&mut self, kind: EntityKind) {
        let slot = match kind {
            EntityKind::Event => &mut self.event,
            EntityKind::Character => &mut self.character,
            EntityKind::Location => &mut self.location,
            EntityKind::Faction => &mut self.faction,
            EntityKind::Roll => &mut self.roll,
            EntityKind::Law => &mut self.law,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        EntityKind::ALL.iter().map(|&kind| self.get(kind)).sum()
    }
}

impl fmt::Display for EntityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = EntityKind::ALL
            .iter()
            .filter(|&&kind| self.get(kind) > 0)
            .map(|&kind| format!("{} {}", self.get(kind), kind))
            .collect();
        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}
