//! Alias index: every known name variant resolves to one canonical ID.
//!
//! The index is derived state. It is rebuilt from the curated alias
//! declarations and the records in the knowledge base each time a run
//! starts, then grows as chapters register new entities and aliases.
//!
//! Lookups are scoped per [`EntityKind`], so a character alias never
//! collides with a location name. Keys are compared after trimming,
//! NFC normalization, whitespace collapsing and lowercasing.

use crate::model::{EntityKind, KnowledgeBase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Curated alias declarations: kind → canonical ID → aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasDeclarations(pub BTreeMap<EntityKind, BTreeMap<String, Vec<String>>>);

impl AliasDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare aliases for a canonical ID.
    pub fn declare<I, S>(mut self, kind: EntityKind, canonical: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(kind)
            .or_default()
            .entry(canonical.into())
            .or_default()
            .extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

/// Two canonical IDs claimed the same alias. The first claim is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasConflict {
    pub kind: EntityKind,
    pub alias: String,
    /// Canonical ID the alias keeps resolving to.
    pub existing: String,
    /// Canonical ID whose claim was refused.
    pub rejected: String,
}

impl fmt::Display for AliasConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alias '{}' resolves to '{}', refused claim by '{}'",
            self.kind, self.alias, self.existing, self.rejected
        )
    }
}

/// Normalize an identifier string into its lookup key.
pub fn alias_key(raw: &str) -> String {
    let normalized: String = raw.trim().nfc().collect::<String>().to_lowercase();
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bidirectional alias map with conflict detection on insert.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    /// (kind, alias key) → canonical ID.
    forward: HashMap<(EntityKind, String), String>,
    /// (kind, canonical ID) → aliases as first written.
    reverse: HashMap<(EntityKind, String), BTreeSet<String>>,
    /// Conflicts not yet collected by the caller.
    conflicts: Vec<AliasConflict>,
}

impl AliasIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from curated declarations and the current records.
    ///
    /// Canonical IDs are registered first so they always resolve to
    /// themselves; declarations come next, then names and aliases carried
    /// on the records.
    pub fn build(declarations: &AliasDeclarations, kb: &KnowledgeBase) -> Self {
        let mut index = Self::new();

        for kind in EntityKind::ALL {
            for id in kb.ids(kind) {
                index.register_canonical(kind, id);
            }
        }

        for (&kind, entries) in &declarations.0 {
            for (canonical, aliases) in entries {
                index.register_canonical(kind, canonical);
                for alias in aliases {
                    let _ = index.insert(kind, alias, canonical);
                }
            }
        }

        for character in kb.characters.values() {
            index.register_all(EntityKind::Character, &character.id, &character.name, &character.aliases);
        }
        for location in kb.locations.values() {
            index.register_all(EntityKind::Location, &location.id, &location.name, &location.aliases);
        }
        for faction in kb.factions.values() {
            index.register_all(EntityKind::Faction, &faction.id, &faction.name, &faction.aliases);
        }
        for law in kb.laws.values() {
            index.register_all(EntityKind::Law, &law.id, &law.title, &law.aliases);
        }
        for event in kb.events.values() {
            if !event.source.is_empty() {
                let _ = index.insert(EntityKind::Event, &event.source, &event.id);
            }
        }

        index
    }

    fn register_all(&mut self, kind: EntityKind, id: &str, name: &str, aliases: &[String]) {
        let _ = self.insert(kind, name, id);
        for alias in aliases {
            let _ = self.insert(kind, alias, id);
        }
    }

    /// Make a canonical ID resolve to itself.
    pub fn register_canonical(&mut self, kind: EntityKind, id: &str) {
        let _ = self.insert(kind, id, id);
    }

    /// Map an alias to a canonical ID.
    ///
    /// Returns `Ok(true)` if the mapping is new and `Ok(false)` if it was
    /// already present. A claim on an alias owned by another canonical ID
    /// is refused, recorded in [`conflicts`](Self::conflicts) and returned.
    pub fn insert(&mut self, kind: EntityKind, alias: &str, canonical: &str) -> Result<bool, AliasConflict> {
        let key = alias_key(alias);
        if key.is_empty() {
            return Ok(false);
        }

        match self.forward.get(&(kind, key.clone())) {
            Some(existing) if existing == canonical => Ok(false),
            Some(existing) => {
                let conflict = AliasConflict {
                    kind,
                    alias: alias.trim().to_string(),
                    existing: existing.clone(),
                    rejected: canonical.to_string(),
                };
                if !self.conflicts.contains(&conflict) {
                    self.conflicts.push(conflict.clone());
                }
                Err(conflict)
            }
            None => {
                self.forward.insert((kind, key), canonical.to_string());
                self.reverse
                    .entry((kind, canonical.to_string()))
                    .or_default()
                    .insert(alias.trim().to_string());
                Ok(true)
            }
        }
    }

    /// Look up the canonical ID for an identifier, if known.
    pub fn lookup(&self, kind: EntityKind, raw: &str) -> Option<&str> {
        self.forward
            .get(&(kind, alias_key(raw)))
            .map(String::as_str)
    }

    /// Resolve an identifier to its canonical ID.
    ///
    /// Unknown identifiers pass through unchanged (trimmed) so callers can
    /// treat them as new entities.
    pub fn resolve(&self, kind: EntityKind, raw: &str) -> String {
        match self.lookup(kind, raw) {
            Some(canonical) => canonical.to_string(),
            None => raw.trim().to_string(),
        }
    }

    /// Every alias registered for a canonical ID, including the ID itself.
    pub fn aliases_of(&self, kind: EntityKind, canonical: &str) -> Vec<&str> {
        self.reverse
            .get(&(kind, canonical.to_string()))
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Conflicts recorded since the last [`take_conflicts`](Self::take_conflicts).
    pub fn conflicts(&self) -> &[AliasConflict] {
        &self.conflicts
    }

    pub fn take_conflicts(&mut self) -> Vec<AliasConflict> {
        std::mem::take(&mut self.conflicts)
    }

    /// Number of alias keys across all kinds.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of alias keys for one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.forward.keys().filter(|(k, _)| *k == kind).count()
    }
}
