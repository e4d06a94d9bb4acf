//! Dice-roll outcomes tied to the event they decided.

use super::{EntityKind, Record};
use crate::Schema;
use serde::{Deserialize, Serialize};

/// One row of a roll's outcome table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct OutcomeBand {
    /// Interval of the d100 domain, e.g. "61-80"
    pub range: String,
    /// What that interval means for this roll
    pub label: String,
}

/// A single d100 roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roll {
    /// Allocated ID, `roll_{partition}_{counter}`.
    pub id: String,
    /// Canonical ID of the event the roll decided.
    pub event: String,
    /// Sampled value, 1..=100.
    pub rolled: u8,
    /// Canonical interval containing `rolled`, `lo-hi`.
    pub outcome: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Full outcome table, when the narrative declared one.
    #[serde(default)]
    pub table: Vec<OutcomeBand>,
}

impl Record for Roll {
    const KIND: EntityKind = EntityKind::Roll;

    fn id(&self) -> &str {
        &self.id
    }
}
