//! Event merging.
//!
//! New events get an allocated ID partitioned by year and are registered
//! under their provenance key, `{chapter}#{key}`. Merging the same chapter
//! again finds them through that key instead of allocating twice.

use super::rules::{
    decode, fill_list, fill_text, optional_string, string_value, Enrich, FieldError, FieldRule, FieldSchema, Refs,
};
use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedEvent;
use crate::ids::{date_key, IdSpace};
use crate::model::{EntityKind, Event, Turn};
use crate::places::normalize_place;
use serde_json::Value;

impl FieldSchema for Event {
    const FIELDS: &'static [FieldRule] = &[
        FieldRule::overwrite("summary"),
        FieldRule::overwrite("status"),
        FieldRule::overwrite("location"),
        FieldRule::overwrite("type"),
        FieldRule::set_of("participants", EntityKind::Character),
        FieldRule::set_of("factions", EntityKind::Faction),
        FieldRule::set("tags"),
        FieldRule::log("transcript"),
    ];

    fn overwrite(&mut self, field: &str, value: Value, refs: &Refs) -> Result<(), FieldError> {
        match field {
            "summary" => self.summary = string_value(field, value)?,
            "status" => self.status = decode(field, value)?,
            "type" => self.event_type = optional_string(field, value)?.unwrap_or_default(),
            "location" => {
                let text = optional_string(field, value)?.unwrap_or_default();
                self.location_id = normalize_place(&text).map(|place| refs.location_id(&place));
                self.location = text;
            }
            _ => return Err(FieldError::unknown(EntityKind::Event, field)),
        }
        Ok(())
    }

    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "participants" => Some(&mut self.participants),
            "factions" => Some(&mut self.factions),
            "tags" => Some(&mut self.tags),
            _ => None,
        }
    }

    fn append(&mut self, field: &str, values: Vec<Value>, _refs: &Refs) -> Result<(), FieldError> {
        match field {
            "transcript" => {
                for value in values {
                    let turn: Turn = decode(field, value)?;
                    self.transcript.push(turn);
                }
                Ok(())
            }
            _ => Err(FieldError::unknown(EntityKind::Event, field)),
        }
    }
}

impl Enrich for Event {
    fn enrich_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;

        changed |= fill_text(&mut self.date, incoming.date);
        changed |= fill_text(&mut self.summary, incoming.summary);
        changed |= fill_text(&mut self.event_type, incoming.event_type);
        if self.location.trim().is_empty() && !incoming.location.trim().is_empty() {
            self.location = incoming.location;
            self.location_id = incoming.location_id;
            changed = true;
        }
        changed |= fill_list(&mut self.participants, incoming.participants);
        changed |= fill_list(&mut self.factions, incoming.factions);
        changed |= fill_list(&mut self.tags, incoming.tags);
        changed |= fill_list(&mut self.transcript, incoming.transcript);

        changed
    }
}

impl Merger<'_> {
    /// Existing event an extracted event refers to, by ID or provenance.
    fn existing_event(&self, declared: Option<&str>, provenance: &str) -> Option<String> {
        let aliases = &self.ctx.aliases;
        declared
            .and_then(|id| aliases.lookup(EntityKind::Event, id))
            .or_else(|| aliases.lookup(EntityKind::Event, provenance))
            .filter(|id| self.ctx.kb.events.contains_key(*id))
            .map(str::to_string)
    }

    pub(super) fn merge_events(&mut self, records: Vec<ExtractedEvent>) {
        let mut previous: Option<(String, (i64, u32, u32))> = None;

        for dto in records {
            let key = dto.key.trim().to_string();
            if key.is_empty() {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::EmptyField,
                    "event without a key skipped",
                ));
                continue;
            }
            if self.event_keys.contains_key(&key) {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::InvalidValue,
                    format!("event key '{key}' used twice in {}", self.chapter),
                ));
                continue;
            }

            if let Some(date) = date_key(&dto.date) {
                if let Some((earlier_key, earlier)) = &previous {
                    if date < *earlier {
                        self.report(Diagnostic::warning(
                            DiagnosticKind::DateRegression,
                            format!("event '{key}' ({}) is dated before '{earlier_key}'", dto.date.trim()),
                        ));
                    }
                }
                previous = Some((key.clone(), date));
            }

            let provenance = format!("{}#{}", self.chapter, key);
            let existing = self.existing_event(dto.id.as_deref(), &provenance);

            let location_id = dto
                .location
                .as_deref()
                .and_then(normalize_place)
                .map(|place| self.ensure_location(&place));

            let refs = self.refs();
            let participants = resolve_all(&refs, EntityKind::Character, &dto.participants);
            let factions = resolve_all(&refs, EntityKind::Faction, &dto.factions);

            let mut incoming = Event::new("", dto.date.trim(), self.chapter.as_str());
            incoming.event_type = dto.event_type.trim().to_string();
            incoming.summary = dto.summary.trim().to_string();
            incoming.participants = participants;
            incoming.factions = factions;
            incoming.location = dto.location.unwrap_or_default().trim().to_string();
            incoming.location_id = location_id;
            incoming.tags = dto.tags;
            incoming.status = dto.status.unwrap_or_default();
            incoming.transcript = dto.transcript;

            let id = match existing {
                Some(id) => {
                    if let Some(event) = self.ctx.kb.events.get_mut(&id) {
                        if event.enrich_from(incoming) {
                            self.enriched(EntityKind::Event, &id);
                        }
                    }
                    id
                }
                None => {
                    let id = self.ctx.ids.allocate_for_date(IdSpace::Event, &incoming.date);
                    incoming.id = id.clone();
                    incoming.source = provenance.clone();
                    self.ctx.kb.events.insert(id.clone(), incoming);
                    self.register_names(EntityKind::Event, &id, &[provenance]);
                    self.created(EntityKind::Event, &id);
                    id
                }
            };

            // Every event of the chapter gets its back-references reconciled.
            self.touch(EntityKind::Event, &id);
            self.event_keys.insert(key, id);
        }
    }
}

fn resolve_all(refs: &Refs, kind: EntityKind, raw: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        super::rules::push_unique(&mut out, refs.resolve(kind, item));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ChapterBatch;
    use crate::merge::{merge_chapter, MergeContext};
    use crate::model::EventStatus;

    fn event(key: &str, date: &str) -> ExtractedEvent {
        ExtractedEvent {
            key: key.to_string(),
            date: date.to_string(),
            summary: format!("{key} happens"),
            ..Default::default()
        }
    }

    #[test]
    fn test_ids_follow_partitions() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            events: vec![event("a", "1248-03-01"), event("b", "1248-05-02"), event("c", "1249")],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);

        assert_eq!(outcome.event_keys["a"], "evt_1248_001");
        assert_eq!(outcome.event_keys["b"], "evt_1248_002");
        assert_eq!(outcome.event_keys["c"], "evt_1249_001");
        assert_eq!(ctx.kb.events["evt_1248_001"].source, "chapter_01#a");
        assert_eq!(ctx.kb.events["evt_1248_001"].status, EventStatus::Resolved);
    }

    #[test]
    fn test_remerge_resolves_through_provenance() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            events: vec![event("a", "1248-03-01")],
            ..Default::default()
        };
        merge_chapter(&mut ctx, "chapter_01", batch.clone());
        let snapshot = ctx.kb.clone();

        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);
        assert_eq!(ctx.kb, snapshot);
        assert_eq!(outcome.summary.created.event, 0);
        assert_eq!(ctx.ids.peek(IdSpace::Event, "1248"), 2);
    }

    #[test]
    fn test_backwards_date_warns() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            events: vec![event("a", "1248-05-01"), event("b", "1248-03-01")],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);

        assert_eq!(ctx.kb.events.len(), 2);
        assert_eq!(outcome.summary.warnings, 1);
        assert_eq!(outcome.diagnostics.iter().next().unwrap().kind, DiagnosticKind::DateRegression);
    }

    #[test]
    fn test_duplicate_and_empty_keys_rejected() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            events: vec![event("a", "1248"), event("a", "1248"), event(" ", "1248")],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);
        assert_eq!(ctx.kb.events.len(), 1);
        assert_eq!(outcome.summary.rejected, 2);
    }

    #[test]
    fn test_update_relocates_event() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            events: vec![event("a", "1248")],
            ..Default::default()
        };
        merge_chapter(&mut ctx, "chapter_01", batch);

        let batch = ChapterBatch {
            updates: vec![crate::extract::EntityUpdate::new(EntityKind::Event, "chapter_01#a")
                .with_set("location", serde_json::json!("Sevilla (Triana)"))],
            ..Default::default()
        };
        merge_chapter(&mut ctx, "chapter_02", batch);

        let event = &ctx.kb.events["evt_1248_001"];
        assert_eq!(event.location_id.as_deref(), Some("sevilla"));
        assert_eq!(ctx.kb.locations["sevilla"].events, vec!["evt_1248_001".to_string()]);
        assert_eq!(ctx.kb.locations["sevilla"].details, vec!["Triana".to_string()]);
    }
}
