//! Canonical places.

use super::{EntityKind, Record};
use serde::{Deserialize, Serialize};

/// A place, keyed by the identifier derived from its primary name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Sub-locations mentioned after the primary name ("Alcázar Real").
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl Location {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            description: None,
            region: None,
            details: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl Record for Location {
    const KIND: EntityKind = EntityKind::Location;

    fn id(&self) -> &str {
        &self.id
    }
}
