//! Faction merging.

use super::rules::{
    append_back_refs, fill, fill_list, optional_string, push_unique, rename, union, Enrich, FieldError, FieldRule,
    FieldSchema, Refs,
};
use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedFaction;
use crate::model::{EntityKind, Faction};
use serde_json::Value;

impl FieldSchema for Faction {
    const FIELDS: &'static [FieldRule] = &[
        FieldRule::overwrite("name"),
        FieldRule::overwrite("kind"),
        FieldRule::overwrite("description"),
        FieldRule::overwrite("leader"),
        FieldRule::overwrite("status"),
        FieldRule::set("aliases"),
        FieldRule::set_of("members", EntityKind::Character),
        FieldRule::back_refs("events"),
    ];

    fn overwrite(&mut self, field: &str, value: Value, refs: &Refs) -> Result<(), FieldError> {
        match field {
            "name" => rename(&mut self.name, &mut self.aliases, field, value)?,
            "kind" => self.kind = optional_string(field, value)?,
            "description" => self.description = optional_string(field, value)?,
            "status" => self.status = optional_string(field, value)?,
            "leader" => {
                self.leader = optional_string(field, value)?.map(|leader| refs.resolve(EntityKind::Character, &leader));
            }
            _ => return Err(FieldError::unknown(EntityKind::Faction, field)),
        }
        Ok(())
    }

    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "aliases" => Some(&mut self.aliases),
            "members" => Some(&mut self.members),
            _ => None,
        }
    }

    fn append(&mut self, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError> {
        match field {
            "events" => append_back_refs(&mut self.events, field, values, refs),
            _ => Err(FieldError::unknown(EntityKind::Faction, field)),
        }
    }
}

impl Enrich for Faction {
    fn enrich_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;

        let mut names = incoming.aliases;
        if !incoming.name.trim().is_empty() && !incoming.name.eq_ignore_ascii_case(&self.name) {
            names.push(incoming.name);
        }
        changed |= union(&mut self.aliases, names);
        changed |= fill(&mut self.kind, incoming.kind);
        changed |= fill(&mut self.description, incoming.description);
        changed |= fill(&mut self.leader, incoming.leader);
        changed |= fill_list(&mut self.members, incoming.members);

        changed
    }
}

impl Merger<'_> {
    pub(super) fn merge_factions(&mut self, records: Vec<ExtractedFaction>) {
        for dto in records {
            let id = self.entity_id(EntityKind::Faction, &dto.id, &dto.name);
            if id.is_empty() {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::EmptyField,
                    "faction without an ID or a name skipped",
                ));
                continue;
            }
            if !self.ctx.kb.factions.contains_key(&id) && dto.name.trim().is_empty() {
                self.report(
                    Diagnostic::rejected(DiagnosticKind::EmptyField, "new faction has no name")
                        .with_record(EntityKind::Faction, &id),
                );
                continue;
            }

            let refs = self.refs();
            let mut incoming = Faction::new(&id, dto.name.trim());
            incoming.aliases = dto.aliases;
            incoming.kind = dto.kind;
            incoming.description = dto.description;
            incoming.leader = dto
                .leader
                .filter(|l| !l.trim().is_empty())
                .map(|l| refs.resolve(EntityKind::Character, &l));
            for member in &dto.members {
                push_unique(&mut incoming.members, refs.resolve(EntityKind::Character, member));
            }

            match self.ctx.kb.factions.get_mut(&id) {
                Some(existing) => {
                    if existing.enrich_from(incoming) {
                        self.enriched(EntityKind::Faction, &id);
                    }
                }
                None => {
                    self.ctx.kb.factions.insert(id.clone(), incoming);
                    self.created(EntityKind::Faction, &id);
                }
            }
            self.register_record(EntityKind::Faction, &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ChapterBatch, EntityUpdate, ExtractedCharacter};
    use crate::merge::{merge_chapter, MergeContext};
    use serde_json::json;

    fn founding_batch() -> ChapterBatch {
        ChapterBatch {
            factions: vec![ExtractedFaction {
                id: "orden_santiago".to_string(),
                name: "Orden de Santiago".to_string(),
                leader: Some("el Maestre".to_string()),
                members: vec!["el Maestre".to_string(), "Pelayo".to_string()],
                ..Default::default()
            }],
            characters: vec![ExtractedCharacter {
                id: "pelayo".to_string(),
                name: "Pelayo".to_string(),
                aliases: vec!["el Maestre".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_members_resolve_to_characters() {
        let mut ctx = MergeContext::default();
        merge_chapter(&mut ctx, "chapter_01", founding_batch());

        let order = &ctx.kb.factions["orden_santiago"];
        assert_eq!(order.leader.as_deref(), Some("pelayo"));
        assert_eq!(order.members, vec!["pelayo".to_string()]);
    }

    #[test]
    fn test_update_sets_leader_through_alias() {
        let mut ctx = MergeContext::default();
        merge_chapter(&mut ctx, "chapter_01", founding_batch());

        let batch = ChapterBatch {
            characters: vec![ExtractedCharacter {
                id: "gonzalo".to_string(),
                name: "Gonzalo Ruiz".to_string(),
                ..Default::default()
            }],
            updates: vec![EntityUpdate::new(EntityKind::Faction, "Orden de Santiago")
                .with_set("leader", json!("Gonzalo Ruiz"))
                .with_add("members", ["Gonzalo Ruiz"])
                .with_set("status", json!("at war"))],
            ..Default::default()
        };
        let outcome = merge_chapter(&mut ctx, "chapter_02", batch);

        let order = &ctx.kb.factions["orden_santiago"];
        assert_eq!(order.leader.as_deref(), Some("gonzalo"));
        assert_eq!(order.members, vec!["pelayo".to_string(), "gonzalo".to_string()]);
        assert_eq!(order.status.as_deref(), Some("at war"));
        assert_eq!(outcome.summary.updated.faction, 1);
    }
}
