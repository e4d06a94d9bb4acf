//! Persistent rules enacted in the story.

use super::{EntityKind, Record};
use crate::schema::string_enum_schema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawStatus {
    #[default]
    Active,
    Amended,
    Repealed,
}

string_enum_schema!(LawStatus => ["active", "amended", "repealed"]);

/// How a later event touches a law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawAction {
    #[default]
    Cites,
    Amends,
    Repeals,
}

/// A later event that references, amends or repeals a law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawReference {
    pub event: String,
    #[serde(default)]
    pub action: LawAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Law {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub status: LawStatus,
    /// Canonical ID of the event that enacted the law.
    pub origin_event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enacted: Option<String>,
    /// Append-only record of later references.
    #[serde(default)]
    pub history: Vec<LawReference>,
}

impl Law {
    pub fn new(id: impl Into<String>, title: impl Into<String>, origin_event: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            aliases: Vec::new(),
            text: None,
            status: LawStatus::default(),
            origin_event: origin_event.into(),
            enacted: None,
            history: Vec::new(),
        }
    }

    /// Append a reference and apply its effect on the law's status.
    ///
    /// A repeal is final; amendments do not revive a repealed law.
    pub fn record_reference(&mut self, reference: LawReference) {
        match (reference.action, self.status) {
            (LawAction::Repeals, _) => self.status = LawStatus::Repealed,
            (LawAction::Amends, LawStatus::Active) => self.status = LawStatus::Amended,
            _ => {}
        }
        self.history.push(reference);
    }
}

impl Record for Law {
    const KIND: EntityKind = EntityKind::Law;

    fn id(&self) -> &str {
        &self.id
    }

    fn date(&self) -> Option<&str> {
        self.enacted.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(event: &str, action: LawAction) -> LawReference {
        LawReference {
            event: event.to_string(),
            action,
            note: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        let mut law = Law::new("fuero_real", "Fuero Real", "evt_1255_001");
        law.record_reference(reference("evt_1256_002", LawAction::Cites));
        assert_eq!(law.status, LawStatus::Active);

        law.record_reference(reference("evt_1258_001", LawAction::Amends));
        assert_eq!(law.status, LawStatus::Amended);

        law.record_reference(reference("evt_1272_004", LawAction::Repeals));
        assert_eq!(law.status, LawStatus::Repealed);

        law.record_reference(reference("evt_1273_001", LawAction::Amends));
        assert_eq!(law.status, LawStatus::Repealed);
        assert_eq!(law.history.len(), 4);
    }
}
