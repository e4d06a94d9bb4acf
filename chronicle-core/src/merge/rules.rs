//! Field merge rules.
//!
//! Every field of every record kind has exactly one merge kind, fixed by
//! the static `FIELDS` table of its [`FieldSchema`] implementation:
//!
//! | Kind        | Operations        | Semantics                                   |
//! |-------------|-------------------|---------------------------------------------|
//! | `Overwrite` | `set`             | incoming value replaces the stored one      |
//! | `Set`       | `add`, `remove`   | ordered, duplicate-free; remove runs first  |
//! | `Log`       | `append`          | always appended, order preserved            |
//! | `BackRefs`  | `append`          | appended, but an event is never listed twice |
//!
//! An update naming an unknown field, or using an operation its field does
//! not support, is rejected as a whole before anything is applied.

use crate::alias::{alias_key, AliasIndex};
use crate::diagnostics::DiagnosticKind;
use crate::extract::EntityUpdate;
use crate::model::{EntityKind, Record};
use crate::places::PlaceRef;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Overwrite,
    Set,
    Log,
    /// Append-only list of event IDs without repeats.
    BackRefs,
}

impl MergeKind {
    pub fn accepts(&self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (MergeKind::Overwrite, Operation::Set)
                | (MergeKind::Set, Operation::Add | Operation::Remove)
                | (MergeKind::Log | MergeKind::BackRefs, Operation::Append)
        )
    }
}

/// The four operations an update can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Add,
    Remove,
    Append,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Set => "set",
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::Append => "append",
        })
    }
}

/// One row of a record kind's field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: MergeKind,
    /// Kind of record the elements of this field refer to.
    pub refers_to: Option<EntityKind>,
}

impl FieldRule {
    pub const fn overwrite(name: &'static str) -> Self {
        Self { name, kind: MergeKind::Overwrite, refers_to: None }
    }

    pub const fn set(name: &'static str) -> Self {
        Self { name, kind: MergeKind::Set, refers_to: None }
    }

    pub const fn set_of(name: &'static str, kind: EntityKind) -> Self {
        Self { name, kind: MergeKind::Set, refers_to: Some(kind) }
    }

    pub const fn log(name: &'static str) -> Self {
        Self { name, kind: MergeKind::Log, refers_to: None }
    }

    pub const fn back_refs(name: &'static str) -> Self {
        Self { name, kind: MergeKind::BackRefs, refers_to: Some(EntityKind::Event) }
    }
}

/// Why an update was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{kind} has no field '{field}'")]
    UnknownField { kind: EntityKind, field: String },

    #[error("field '{field}' of {kind} does not support '{operation}'")]
    WrongOperation {
        kind: EntityKind,
        field: String,
        operation: Operation,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{0} records cannot be updated")]
    Immutable(EntityKind),
}

impl FieldError {
    pub fn unknown(kind: EntityKind, field: &str) -> Self {
        FieldError::UnknownField {
            kind,
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl fmt::Display) -> Self {
        FieldError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            FieldError::UnknownField { .. } => DiagnosticKind::UnknownField,
            FieldError::WrongOperation { .. } => DiagnosticKind::WrongOperation,
            FieldError::InvalidValue { .. } => DiagnosticKind::InvalidValue,
            FieldError::Immutable(_) => DiagnosticKind::ImmutableRecord,
        }
    }
}

/// Resolves references carried by incoming values.
#[derive(Clone, Copy)]
pub struct Refs<'a> {
    pub aliases: &'a AliasIndex,
    /// Chapter-local event key → canonical event ID.
    pub event_keys: &'a HashMap<String, String>,
}

impl<'a> Refs<'a> {
    pub fn new(aliases: &'a AliasIndex, event_keys: &'a HashMap<String, String>) -> Self {
        Self { aliases, event_keys }
    }

    /// Resolve a reference to a canonical ID.
    ///
    /// Events are looked up by chapter-local key first.
    pub fn resolve(&self, kind: EntityKind, raw: &str) -> String {
        if kind == EntityKind::Event {
            if let Some(id) = self.event_keys.get(raw.trim()) {
                return id.clone();
            }
        }
        self.aliases.resolve(kind, raw)
    }

    /// Canonical location ID for a normalized place.
    pub fn location_id(&self, place: &PlaceRef) -> String {
        self.aliases
            .lookup(EntityKind::Location, &place.name)
            .map(str::to_string)
            .unwrap_or_else(|| place.id.clone())
    }
}

/// A record kind with a fixed, typed field table.
pub trait FieldSchema: Record + PartialEq {
    const FIELDS: &'static [FieldRule];

    /// Replace an `Overwrite` field.
    fn overwrite(&mut self, field: &str, value: Value, refs: &Refs) -> Result<(), FieldError>;

    /// The list behind a `Set` field.
    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>>;

    /// Append to a `Log` or `BackRefs` field.
    fn append(&mut self, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError>;

    fn rule(field: &str) -> Option<&'static FieldRule> {
        Self::FIELDS.iter().find(|rule| rule.name == field)
    }
}

fn check<T: FieldSchema>(field: &str, operation: Operation) -> Result<&'static FieldRule, FieldError> {
    let rule = T::rule(field).ok_or_else(|| FieldError::unknown(T::KIND, field))?;
    if rule.kind.accepts(operation) {
        Ok(rule)
    } else {
        Err(FieldError::WrongOperation {
            kind: T::KIND,
            field: field.to_string(),
            operation,
        })
    }
}

/// Apply an update to a copy of `record`.
///
/// The update is checked against the field table first; nothing is
/// applied unless every field and operation is valid. Within a `Set`
/// field, removals run before additions.
pub fn apply_update<T: FieldSchema>(record: &T, update: &EntityUpdate, refs: &Refs) -> Result<T, FieldError> {
    for field in update.set.keys() {
        check::<T>(field, Operation::Set)?;
    }
    for field in update.remove.keys() {
        check::<T>(field, Operation::Remove)?;
    }
    for field in update.add.keys() {
        check::<T>(field, Operation::Add)?;
    }
    for field in update.append.keys() {
        check::<T>(field, Operation::Append)?;
    }

    let mut next = record.clone();

    for (field, value) in &update.set {
        next.overwrite(field, value.clone(), refs)?;
    }

    for (field, values) in &update.remove {
        let rule = check::<T>(field, Operation::Remove)?;
        let values = resolve_elements(rule, values, refs);
        let list = next
            .list_mut(field)
            .ok_or_else(|| FieldError::unknown(T::KIND, field))?;
        remove_all(list, &values);
    }

    for (field, values) in &update.add {
        let rule = check::<T>(field, Operation::Add)?;
        let values = resolve_elements(rule, values, refs);
        let list = next
            .list_mut(field)
            .ok_or_else(|| FieldError::unknown(T::KIND, field))?;
        for value in values {
            push_unique(list, value);
        }
    }

    for (field, values) in &update.append {
        next.append(field, values.clone(), refs)?;
    }

    Ok(next)
}

fn resolve_elements(rule: &FieldRule, values: &[String], refs: &Refs) -> Vec<String> {
    values
        .iter()
        .map(|v| match rule.refers_to {
            Some(kind) => refs.resolve(kind, v),
            None => v.trim().to_string(),
        })
        .filter(|v| !v.is_empty())
        .collect()
}

// ============================================================================
// List helpers
// ============================================================================

fn same(a: &str, b: &str) -> bool {
    a == b || alias_key(a) == alias_key(b)
}

/// Add an element unless an equal one is present. Returns whether it was added.
pub fn push_unique(list: &mut Vec<String>, item: impl Into<String>) -> bool {
    let item = item.into();
    if item.is_empty() || list.iter().any(|existing| same(existing, &item)) {
        return false;
    }
    list.push(item);
    true
}

/// Remove every element equal to one of `items`.
pub fn remove_all(list: &mut Vec<String>, items: &[String]) {
    list.retain(|existing| !items.iter().any(|item| same(existing, item)));
}

/// Resolve event references and add them without repeats.
pub fn append_back_refs(list: &mut Vec<String>, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError> {
    for value in values {
        let raw = string_value(field, value)?;
        push_unique(list, refs.resolve(EntityKind::Event, &raw));
    }
    Ok(())
}

// ============================================================================
// Value decoding
// ============================================================================

/// A required, non-empty string.
pub fn string_value(field: &str, value: Value) -> Result<String, FieldError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) | Value::Null => Err(FieldError::invalid(field, "must not be empty")),
        other => Err(FieldError::invalid(field, format!("expected a string, got {other}"))),
    }
}

/// Replace a display name. A name that stops being current stays on as an
/// alias so it keeps resolving once the index is rebuilt.
pub fn rename(name: &mut String, aliases: &mut Vec<String>, field: &str, value: Value) -> Result<(), FieldError> {
    let next = string_value(field, value)?;
    if !same(name, &next) {
        let previous = std::mem::replace(name, next);
        push_unique(aliases, previous);
        aliases.retain(|alias| !same(alias, name));
    } else {
        *name = next;
    }
    Ok(())
}

/// An optional string; `null` and `""` clear the field.
pub fn optional_string(field: &str, value: Value) -> Result<Option<String>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        other => Err(FieldError::invalid(field, format!("expected a string, got {other}"))),
    }
}

/// Any value with a serde representation.
pub fn decode<T: DeserializeOwned>(field: &str, value: Value) -> Result<T, FieldError> {
    serde_json::from_value(value).map_err(|e| FieldError::invalid(field, e))
}

// ============================================================================
// Enrichment
// ============================================================================

/// Fill-only-empty merging, used when a "new" record turns out to exist.
pub trait Enrich {
    /// Copy fields from `incoming` into fields of `self` that are still
    /// empty. Returns whether anything changed.
    fn enrich_from(&mut self, incoming: Self) -> bool;
}

/// Fill an empty optional field.
pub fn fill<T>(slot: &mut Option<T>, incoming: Option<T>) -> bool {
    if slot.is_none() && incoming.is_some() {
        *slot = incoming;
        true
    } else {
        false
    }
}

/// Fill an empty string field.
pub fn fill_text(slot: &mut String, incoming: String) -> bool {
    if slot.trim().is_empty() && !incoming.trim().is_empty() {
        *slot = incoming;
        true
    } else {
        false
    }
}

/// Fill an empty list field.
pub fn fill_list<T>(slot: &mut Vec<T>, incoming: Vec<T>) -> bool {
    if slot.is_empty() && !incoming.is_empty() {
        *slot = incoming;
        true
    } else {
        false
    }
}

/// Add every new element; used for aliases, which only ever accumulate.
pub fn union(slot: &mut Vec<String>, incoming: Vec<String>) -> bool {
    let mut changed = false;
    for item in incoming {
        changed |= push_unique(slot, item);
    }
    changed
}
