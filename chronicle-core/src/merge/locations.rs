//! Location merging.

use super::rules::{
    append_back_refs, fill, optional_string, push_unique, rename, union, Enrich, FieldError, FieldRule,
    FieldSchema, Refs,
};
use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedLocation;
use crate::model::{EntityKind, Location};
use crate::places::{normalize_place, PlaceRef};
use serde_json::Value;

impl FieldSchema for Location {
    const FIELDS: &'static [FieldRule] = &[
        FieldRule::overwrite("name"),
        FieldRule::overwrite("description"),
        FieldRule::overwrite("region"),
        FieldRule::set("aliases"),
        FieldRule::set("details"),
        FieldRule::back_refs("events"),
    ];

    fn overwrite(&mut self, field: &str, value: Value, _refs: &Refs) -> Result<(), FieldError> {
        match field {
            "name" => rename(&mut self.name, &mut self.aliases, field, value)?,
            "description" => self.description = optional_string(field, value)?,
            "region" => self.region = optional_string(field, value)?,
            _ => return Err(FieldError::unknown(EntityKind::Location, field)),
        }
        Ok(())
    }

    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "aliases" => Some(&mut self.aliases),
            "details" => Some(&mut self.details),
            _ => None,
        }
    }

    fn append(&mut self, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError> {
        match field {
            "events" => append_back_refs(&mut self.events, field, values, refs),
            _ => Err(FieldError::unknown(EntityKind::Location, field)),
        }
    }
}

impl Enrich for Location {
    fn enrich_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;

        let mut names = incoming.aliases;
        if !incoming.name.eq_ignore_ascii_case(&self.name) {
            names.push(incoming.name);
        }
        changed |= union(&mut self.aliases, names);
        changed |= fill(&mut self.description, incoming.description);
        changed |= fill(&mut self.region, incoming.region);
        changed |= union(&mut self.details, incoming.details);

        changed
    }
}

impl Merger<'_> {
    pub(super) fn merge_locations(&mut self, records: Vec<ExtractedLocation>) {
        for dto in records {
            let Some(place) = normalize_place(&dto.place) else {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::EmptyField,
                    format!("location '{}' has no usable name", dto.place.trim()),
                ));
                continue;
            };
            let id = self.refs().location_id(&place);

            let name = dto
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| place.name.clone());
            let mut incoming = Location::new(&id, name);
            incoming.aliases = dto.aliases;
            if !place.name.eq_ignore_ascii_case(&incoming.name) {
                push_unique(&mut incoming.aliases, place.name.clone());
            }
            incoming.description = dto.description;
            incoming.region = dto.region;
            incoming.details = place.detail.into_iter().collect();

            match self.ctx.kb.locations.get_mut(&id) {
                Some(existing) => {
                    if existing.enrich_from(incoming) {
                        self.enriched(EntityKind::Location, &id);
                    }
                }
                None => {
                    self.ctx.kb.locations.insert(id.clone(), incoming);
                    self.created(EntityKind::Location, &id);
                }
            }
            self.register_record(EntityKind::Location, &id);
        }
    }

    /// The location ID for a place, creating a minimal record if needed.
    ///
    /// A qualifier such as "Alcázar Real" is kept in the record's details.
    pub(super) fn ensure_location(&mut self, place: &PlaceRef) -> String {
        let id = self.refs().location_id(place);
        match self.ctx.kb.locations.get_mut(&id) {
            Some(location) => {
                if let Some(detail) = &place.detail {
                    if push_unique(&mut location.details, detail.as_str()) {
                        self.touch(EntityKind::Location, &id);
                    }
                }
            }
            None => self.create_location(&id, &place.name, place.detail.clone()),
        }
        id
    }

    pub(super) fn create_location(&mut self, id: &str, name: &str, detail: Option<String>) {
        let mut location = Location::new(id, name);
        location.details.extend(detail);
        self.ctx.kb.locations.insert(id.to_string(), location);
        self.register_names(EntityKind::Location, id, &[name.to_string()]);
        self.created(EntityKind::Location, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ChapterBatch;
    use crate::merge::{merge_chapter, MergeContext};

    #[test]
    fn test_declared_location_with_qualifier() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            locations: vec![ExtractedLocation {
                place: "Córdoba (Mezquita)".to_string(),
                description: Some("Former caliphal capital".to_string()),
                aliases: vec!["Qurtuba".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);

        let cordoba = &ctx.kb.locations["cordoba"];
        assert_eq!(cordoba.name, "Córdoba");
        assert_eq!(cordoba.details, vec!["Mezquita".to_string()]);
        assert_eq!(ctx.aliases.lookup(EntityKind::Location, "qurtuba"), Some("cordoba"));
        assert_eq!(outcome.summary.created.location, 1);
    }

    #[test]
    fn test_alias_resolves_event_location() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            locations: vec![ExtractedLocation {
                place: "Sevilla".to_string(),
                aliases: vec!["Ishbiliya".to_string()],
                ..Default::default()
            }],
            events: vec![crate::extract::ExtractedEvent {
                key: "siege".to_string(),
                date: "1248".to_string(),
                summary: "The siege tightens".to_string(),
                location: Some("Ishbiliya, outer walls".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        merge_chapter(&mut ctx, "chapter_01", batch);

        assert_eq!(ctx.kb.locations.len(), 1);
        let sevilla = &ctx.kb.locations["sevilla"];
        assert_eq!(sevilla.details, vec!["outer walls".to_string()]);
        assert_eq!(sevilla.events, vec!["evt_1248_001".to_string()]);
    }

    #[test]
    fn test_unusable_place_rejected() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            locations: vec![ExtractedLocation {
                place: "(somewhere)".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_01", batch);
        assert!(ctx.kb.locations.is_empty());
        assert_eq!(outcome.summary.rejected, 1);
    }
}
