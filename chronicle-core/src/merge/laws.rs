//! Law merging.

use super::rules::{
    decode, fill, optional_string, rename, string_value, union, Enrich, FieldError, FieldRule, FieldSchema, Refs,
};
use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedLaw;
use crate::model::{EntityKind, Law, LawAction, LawReference};
use serde_json::Value;

impl FieldSchema for Law {
    const FIELDS: &'static [FieldRule] = &[
        FieldRule::overwrite("title"),
        FieldRule::overwrite("text"),
        FieldRule::overwrite("status"),
        FieldRule::set("aliases"),
        FieldRule::log("history"),
    ];

    fn overwrite(&mut self, field: &str, value: Value, _refs: &Refs) -> Result<(), FieldError> {
        match field {
            "title" => rename(&mut self.title, &mut self.aliases, field, value)?,
            "text" => self.text = optional_string(field, value)?,
            "status" => self.status = decode(field, value)?,
            _ => return Err(FieldError::unknown(EntityKind::Law, field)),
        }
        Ok(())
    }

    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "aliases" => Some(&mut self.aliases),
            _ => None,
        }
    }

    fn append(&mut self, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError> {
        if field != "history" {
            return Err(FieldError::unknown(EntityKind::Law, field));
        }
        for value in values {
            let mut reference = match value {
                Value::String(_) => LawReference {
                    event: string_value(field, value)?,
                    action: LawAction::Cites,
                    note: None,
                },
                other => decode::<LawReference>(field, other)?,
            };
            reference.event = refs.resolve(EntityKind::Event, &reference.event);
            if reference.event.is_empty() {
                return Err(FieldError::invalid(field, "reference has no event"));
            }
            self.record_reference(reference);
        }
        Ok(())
    }
}

impl Enrich for Law {
    fn enrich_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;

        let mut names = incoming.aliases;
        if !incoming.title.trim().is_empty() && !incoming.title.eq_ignore_ascii_case(&self.title) {
            names.push(incoming.title);
        }
        changed |= union(&mut self.aliases, names);
        changed |= fill(&mut self.text, incoming.text);
        changed |= fill(&mut self.enacted, incoming.enacted);

        changed
    }
}

impl Merger<'_> {
    pub(super) fn merge_laws(&mut self, records: Vec<ExtractedLaw>) {
        for dto in records {
            let id = self.entity_id(EntityKind::Law, &dto.id, &dto.title);
            if id.is_empty() {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::EmptyField,
                    "law without an ID or a title skipped",
                ));
                continue;
            }

            let exists = self.ctx.kb.laws.contains_key(&id);
            let origin = self.refs().resolve(EntityKind::Event, &dto.origin_event);
            if !exists && (dto.title.trim().is_empty() || origin.is_empty()) {
                self.report(
                    Diagnostic::rejected(DiagnosticKind::EmptyField, "new law needs a title and an origin event")
                        .with_record(EntityKind::Law, &id),
                );
                continue;
            }

            let enacted = dto
                .enacted
                .filter(|d| !d.trim().is_empty())
                .or_else(|| self.ctx.kb.events.get(&origin).map(|e| e.date.clone()))
                .filter(|d| !d.trim().is_empty());

            let mut incoming = Law::new(&id, dto.title.trim(), origin);
            incoming.aliases = dto.aliases;
            incoming.text = dto.text;
            incoming.enacted = enacted;

            match self.ctx.kb.laws.get_mut(&id) {
                Some(existing) => {
                    if existing.enrich_from(incoming) {
                        self.enriched(EntityKind::Law, &id);
                    }
                }
                None => {
                    self.ctx.kb.laws.insert(id.clone(), incoming);
                    self.created(EntityKind::Law, &id);
                }
            }
            self.register_record(EntityKind::Law, &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ChapterBatch, EntityUpdate, ExtractedEvent};
    use crate::merge::{merge_chapter, MergeContext};
    use crate::model::LawStatus;
    use serde_json::json;

    fn enactment() -> ChapterBatch {
        ChapterBatch {
            events: vec![ExtractedEvent {
                key: "cortes".to_string(),
                date: "1254-03".to_string(),
                summary: "The Cortes approve the fuero".to_string(),
                ..Default::default()
            }],
            laws: vec![ExtractedLaw {
                id: "fuero_real".to_string(),
                title: "Fuero Real".to_string(),
                origin_event: "cortes".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_law_enacted_by_chapter_event() {
        let mut ctx = MergeContext::default();
        merge_chapter(&mut ctx, "chapter_08", enactment());

        let law = &ctx.kb.laws["fuero_real"];
        assert_eq!(law.origin_event, "evt_1254_001");
        assert_eq!(law.enacted.as_deref(), Some("1254-03"));
        assert_eq!(law.status, LawStatus::Active);
    }

    #[test]
    fn test_repeal_through_history() {
        let mut ctx = MergeContext::default();
        merge_chapter(&mut ctx, "chapter_08", enactment());

        let batch = ChapterBatch {
            events: vec![ExtractedEvent {
                key: "revolt".to_string(),
                date: "1272".to_string(),
                summary: "The nobles force the fuero's withdrawal".to_string(),
                ..Default::default()
            }],
            updates: vec![EntityUpdate::new(EntityKind::Law, "fuero real")
                .with_append("history", json!({"event": "revolt", "action": "repeals"}))],
            ..Default::default()
        };
        merge_chapter(&mut ctx, "chapter_12", batch);

        let law = &ctx.kb.laws["fuero_real"];
        assert_eq!(law.status, LawStatus::Repealed);
        assert_eq!(law.history[0].event, "evt_1272_001");
        assert_eq!(law.history[0].action, LawAction::Repeals);
    }

    #[test]
    fn test_law_without_origin_rejected() {
        let mut ctx = MergeContext::default();
        let batch = ChapterBatch {
            laws: vec![ExtractedLaw {
                id: "ley_nueva".to_string(),
                title: "Ley nueva".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_08", batch);
        assert!(ctx.kb.laws.is_empty());
        assert_eq!(outcome.summary.rejected, 1);
    }
}
