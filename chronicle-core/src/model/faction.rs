//! Canonical factions: houses, orders, councils, guilds.

use super::{EntityKind, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// What sort of group this is ("military order", "noble house").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Canonical character ID of the current leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    /// Canonical character IDs.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl Faction {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            kind: None,
            description: None,
            leader: None,
            members: Vec::new(),
            status: None,
            events: Vec::new(),
        }
    }

    pub fn with_member(mut self, character: impl Into<String>) -> Self {
        self.members.push(character.into());
        self
    }
}

impl Record for Faction {
    const KIND: EntityKind = EntityKind::Faction;

    fn id(&self) -> &str {
        &self.id
    }
}
