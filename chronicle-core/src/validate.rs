//! Cross-reference validation.
//!
//! Every reference held by a record must resolve to a live canonical ID
//! of the right kind. A dangling reference is a blocking error: the merge
//! that produced it must not be persisted. Fields that are empty but
//! expected only produce warnings, and only for the records in scope.

use crate::alias::AliasIndex;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::merge::Touched;
use crate::model::{EntityKind, KnowledgeBase};
use crate::range::{Interval, DOMAIN_MAX, DOMAIN_MIN};

/// Which records get soft (empty-field) checks.
///
/// Reference checks always cover the whole knowledge base.
#[derive(Debug, Clone, Copy)]
pub enum ValidationScope<'a> {
    All,
    Records(&'a Touched),
}

impl ValidationScope<'_> {
    pub fn includes(&self, kind: EntityKind, id: &str) -> bool {
        match self {
            ValidationScope::All => true,
            ValidationScope::Records(touched) => touched.get(&kind).is_some_and(|ids| ids.contains(id)),
        }
    }
}

/// Validate the knowledge base.
pub fn validate(kb: &KnowledgeBase, aliases: &AliasIndex, scope: &ValidationScope) -> Diagnostics {
    let mut checker = Checker {
        kb,
        aliases,
        diagnostics: Diagnostics::new(),
    };
    checker.check_references();
    checker.check_rolls();
    checker.check_empty_fields(scope);
    checker.diagnostics
}

struct Checker<'a> {
    kb: &'a KnowledgeBase,
    aliases: &'a AliasIndex,
    diagnostics: Diagnostics,
}

impl Checker<'_> {
    /// Whether a stored reference resolves, directly or through an alias.
    fn resolves(&self, kind: EntityKind, reference: &str) -> bool {
        self.kb.contains(kind, reference)
            || self
                .aliases
                .lookup(kind, reference)
                .is_some_and(|canonical| self.kb.contains(kind, canonical))
    }

    fn expect(&mut self, owner: (EntityKind, &str), field: &str, target: EntityKind, reference: &str) {
        if self.resolves(target, reference) {
            return;
        }
        self.diagnostics.push(
            Diagnostic::blocking(
                DiagnosticKind::DanglingReference,
                format!("{field} refers to unknown {target} '{reference}'"),
            )
            .with_record(owner.0, owner.1),
        );
    }

    fn expect_all<'r>(
        &mut self,
        owner: (EntityKind, &str),
        field: &str,
        target: EntityKind,
        references: impl IntoIterator<Item = &'r String>,
    ) {
        for reference in references {
            self.expect(owner, field, target, reference);
        }
    }

    fn check_references(&mut self) {
        let kb = self.kb;

        for event in kb.events.values() {
            let owner = (EntityKind::Event, event.id.as_str());
            self.expect_all(owner, "participants", EntityKind::Character, &event.participants);
            self.expect_all(owner, "factions", EntityKind::Faction, &event.factions);
            if let Some(location) = &event.location_id {
                self.expect(owner, "location", EntityKind::Location, location);
            }
            if let Some(roll) = &event.roll {
                self.expect(owner, "roll", EntityKind::Roll, &roll.roll);
            }
        }

        for character in kb.characters.values() {
            let owner = (EntityKind::Character, character.id.as_str());
            self.expect_all(owner, "factions", EntityKind::Faction, &character.factions);
            self.expect_all(owner, "events", EntityKind::Event, &character.events);
            self.expect_all(
                owner,
                "trait_history",
                EntityKind::Event,
                character.trait_history.iter().filter_map(|t| t.event.as_ref()),
            );
        }

        for faction in kb.factions.values() {
            let owner = (EntityKind::Faction, faction.id.as_str());
            self.expect_all(owner, "members", EntityKind::Character, &faction.members);
            if let Some(leader) = &faction.leader {
                self.expect(owner, "leader", EntityKind::Character, leader);
            }
            self.expect_all(owner, "events", EntityKind::Event, &faction.events);
        }

        for location in kb.locations.values() {
            let owner = (EntityKind::Location, location.id.as_str());
            self.expect_all(owner, "events", EntityKind::Event, &location.events);
        }

        for roll in kb.rolls.values() {
            self.expect((EntityKind::Roll, roll.id.as_str()), "event", EntityKind::Event, &roll.event);
        }

        for law in kb.laws.values() {
            let owner = (EntityKind::Law, law.id.as_str());
            self.expect(owner, "origin_event", EntityKind::Event, &law.origin_event);
            self.expect_all(owner, "history", EntityKind::Event, law.history.iter().map(|r| &r.event));
        }
    }

    /// Stored rolls must lie inside their canonical interval, and the
    /// event they decided must point back at them.
    fn check_rolls(&mut self) {
        let kb = self.kb;

        for roll in kb.rolls.values() {
            let in_domain = (DOMAIN_MIN..=DOMAIN_MAX).contains(&roll.rolled);
            let in_outcome = Interval::parse(&roll.outcome).is_some_and(|i| i.contains(roll.rolled));
            if !in_domain || !in_outcome {
                self.diagnostics.push(
                    Diagnostic::blocking(
                        DiagnosticKind::OutOfRange,
                        format!("rolled {} is not inside outcome '{}'", roll.rolled, roll.outcome),
                    )
                    .with_record(EntityKind::Roll, &roll.id),
                );
            }

            if let Some(event) = kb.events.get(&roll.event) {
                let linked = event.roll.as_ref().is_some_and(|summary| summary.roll == roll.id);
                if !linked {
                    self.diagnostics.push(
                        Diagnostic::blocking(
                            DiagnosticKind::DanglingReference,
                            format!("event {} does not record this roll", event.id),
                        )
                        .with_record(EntityKind::Roll, &roll.id),
                    );
                }
            }
        }
    }

    fn warn_empty(&mut self, kind: EntityKind, id: &str, what: &str) {
        self.diagnostics.push(
            Diagnostic::warning(DiagnosticKind::EmptyField, format!("{what} is empty")).with_record(kind, id),
        );
    }

    fn check_empty_fields(&mut self, scope: &ValidationScope) {
        let kb = self.kb;

        for event in kb.events.values().filter(|e| scope.includes(EntityKind::Event, &e.id)) {
            if event.summary.trim().is_empty() {
                self.warn_empty(EntityKind::Event, &event.id, "summary");
            }
            if event.date.trim().is_empty() {
                self.warn_empty(EntityKind::Event, &event.id, "date");
            }
        }

        for character in kb.characters.values().filter(|c| scope.includes(EntityKind::Character, &c.id)) {
            if character.events.is_empty() {
                self.warn_empty(EntityKind::Character, &character.id, "events");
            }
        }

        for faction in kb.factions.values().filter(|f| scope.includes(EntityKind::Faction, &f.id)) {
            if faction.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
                self.warn_empty(EntityKind::Faction, &faction.id, "description");
            }
        }

        for law in kb.laws.values().filter(|l| scope.includes(EntityKind::Law, &l.id)) {
            if law.text.as_deref().map_or(true, |t| t.trim().is_empty()) {
                self.warn_empty(EntityKind::Law, &law.id, "text");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasDeclarations;
    use crate::diagnostics::Severity;
    use crate::model::{Character, Event, Faction, Roll, RollSummary};
    use std::collections::BTreeSet;

    fn linked_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.events.insert(
            "evt_1248_001".to_string(),
            Event::new("evt_1248_001", "1248", "chapter_01")
                .with_summary("Sevilla falls")
                .with_participant("fernando"),
        );
        let mut fernando = Character::new("fernando", "Fernando III");
        fernando.events.push("evt_1248_001".to_string());
        kb.characters.insert("fernando".to_string(), fernando);
        kb
    }

    fn check(kb: &KnowledgeBase) -> Diagnostics {
        let aliases = AliasIndex::build(&AliasDeclarations::new(), kb);
        validate(kb, &aliases, &ValidationScope::All)
    }

    #[test]
    fn test_consistent_kb_is_clean() {
        let diagnostics = check(&linked_kb());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn test_dangling_participant_blocks() {
        let mut kb = linked_kb();
        kb.events.get_mut("evt_1248_001").unwrap().participants.push("nobody".to_string());

        let diagnostics = check(&kb);
        assert!(diagnostics.is_blocking());
        let error = diagnostics.iter().find(|d| d.severity == Severity::Blocking).unwrap();
        assert_eq!(error.kind, DiagnosticKind::DanglingReference);
        assert_eq!(error.record.as_ref().unwrap().id, "evt_1248_001");
    }

    #[test]
    fn test_alias_reference_resolves() {
        let mut kb = linked_kb();
        kb.characters.get_mut("fernando").unwrap().aliases.push("el Santo".to_string());
        kb.events.get_mut("evt_1248_001").unwrap().participants = vec!["el Santo".to_string()];
        assert!(!check(&kb).is_blocking());
    }

    #[test]
    fn test_roll_outside_outcome_blocks() {
        let mut kb = linked_kb();
        kb.rolls.insert(
            "roll_1248_001".to_string(),
            Roll {
                id: "roll_1248_001".to_string(),
                event: "evt_1248_001".to_string(),
                rolled: 12,
                outcome: "61-80".to_string(),
                label: "Success".to_string(),
                purpose: None,
                table: Vec::new(),
            },
        );
        kb.events.get_mut("evt_1248_001").unwrap().roll = Some(RollSummary {
            roll: "roll_1248_001".to_string(),
            rolled: 12,
            outcome: "61-80".to_string(),
            label: "Success".to_string(),
        });

        let diagnostics = check(&kb);
        assert_eq!(diagnostics.errors(), 1);
        assert_eq!(diagnostics.iter().next().unwrap().kind, DiagnosticKind::OutOfRange);
    }

    #[test]
    fn test_empty_fields_warn_only_in_scope() {
        let mut kb = linked_kb();
        kb.factions.insert("hermandad".to_string(), Faction::new("hermandad", "Hermandad"));
        let aliases = AliasIndex::build(&AliasDeclarations::new(), &kb);

        let all = validate(&kb, &aliases, &ValidationScope::All);
        assert_eq!(all.warnings(), 1);
        assert!(!all.is_blocking());

        let mut touched = Touched::new();
        touched.insert(EntityKind::Event, BTreeSet::from(["evt_1248_001".to_string()]));
        let scoped = validate(&kb, &aliases, &ValidationScope::Records(&touched));
        assert!(scoped.is_empty());
    }
}
