//! Character merging.

use super::rules::{
    append_back_refs, decode, fill, fill_list, optional_string, rename, string_value, union, Enrich, FieldError,
    FieldRule, FieldSchema, Refs,
};
use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedCharacter;
use crate::model::{Character, CharacterState, EntityKind, TraitChange};
use serde_json::Value;

impl FieldSchema for Character {
    const FIELDS: &'static [FieldRule] = &[
        FieldRule::overwrite("name"),
        FieldRule::overwrite("title"),
        FieldRule::overwrite("birth_date"),
        FieldRule::overwrite("status"),
        FieldRule::overwrite("location"),
        FieldRule::overwrite("task"),
        FieldRule::overwrite("speech_style"),
        FieldRule::overwrite("biography"),
        FieldRule::set("aliases"),
        FieldRule::set("tags"),
        FieldRule::set("personality"),
        FieldRule::set("interests"),
        FieldRule::set_of("factions", EntityKind::Faction),
        FieldRule::log("trait_history"),
        FieldRule::back_refs("events"),
    ];

    fn overwrite(&mut self, field: &str, value: Value, _refs: &Refs) -> Result<(), FieldError> {
        match field {
            "name" => rename(&mut self.name, &mut self.aliases, field, value)?,
            "title" => self.title = optional_string(field, value)?,
            "birth_date" => self.birth_date = optional_string(field, value)?,
            "status" => self.status = decode(field, value)?,
            "location" => self.state.location = optional_string(field, value)?,
            "task" => self.state.task = optional_string(field, value)?,
            "speech_style" => self.state.speech_style = optional_string(field, value)?,
            "biography" => self.state.biography = optional_string(field, value)?,
            _ => return Err(FieldError::unknown(EntityKind::Character, field)),
        }
        Ok(())
    }

    fn list_mut(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "aliases" => Some(&mut self.aliases),
            "tags" => Some(&mut self.tags),
            "personality" => Some(&mut self.state.personality),
            "interests" => Some(&mut self.state.interests),
            "factions" => Some(&mut self.factions),
            _ => None,
        }
    }

    fn append(&mut self, field: &str, values: Vec<Value>, refs: &Refs) -> Result<(), FieldError> {
        match field {
            "trait_history" => {
                for value in values {
                    let change = trait_change(field, value, refs)?;
                    self.trait_history.push(change);
                }
                Ok(())
            }
            "events" => append_back_refs(&mut self.events, field, values, refs),
            _ => Err(FieldError::unknown(EntityKind::Character, field)),
        }
    }
}

/// A trait entry is either a bare quality or a full object.
fn trait_change(field: &str, value: Value, refs: &Refs) -> Result<TraitChange, FieldError> {
    let mut change = match value {
        Value::String(_) => TraitChange {
            quality: string_value(field, value)?,
            event: None,
            note: None,
        },
        other => decode::<TraitChange>(field, other)?,
    };
    if change.quality.trim().is_empty() {
        return Err(FieldError::invalid(field, "quality must not be empty"));
    }
    change.event = change
        .event
        .map(|event| refs.resolve(EntityKind::Event, &event))
        .filter(|event| !event.is_empty());
    Ok(change)
}

impl Enrich for Character {
    fn enrich_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;

        let mut names = incoming.aliases;
        if !incoming.name.trim().is_empty() && !self.matches_name(&incoming.name) {
            names.push(incoming.name);
        }
        changed |= union(&mut self.aliases, names);

        changed |= fill(&mut self.title, incoming.title);
        changed |= fill(&mut self.birth_date, incoming.birth_date);
        changed |= fill_list(&mut self.tags, incoming.tags);
        changed |= fill_list(&mut self.factions, incoming.factions);
        changed |= fill(&mut self.state.location, incoming.state.location);
        changed |= fill(&mut self.state.task, incoming.state.task);
        changed |= fill_list(&mut self.state.personality, incoming.state.personality);
        changed |= fill_list(&mut self.state.interests, incoming.state.interests);
        changed |= fill(&mut self.state.speech_style, incoming.state.speech_style);
        changed |= fill(&mut self.state.biography, incoming.state.biography);

        changed
    }
}

fn character_from(dto: ExtractedCharacter, id: &str, refs: &Refs) -> Character {
    let mut character = Character::new(id, dto.name.trim());
    character.aliases = dto
        .aliases
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && !character.matches_name(a))
        .collect();
    character.title = dto.title;
    character.birth_date = dto.birth_date;
    character.status = dto.status.unwrap_or_default();
    character.tags = dto.tags;
    character.factions = dto
        .factions
        .iter()
        .map(|f| refs.resolve(EntityKind::Faction, f))
        .filter(|f| !f.is_empty())
        .collect();
    character.state = CharacterState {
        location: dto.location,
        task: dto.task,
        personality: dto.personality,
        interests: dto.interests,
        speech_style: dto.speech_style,
        biography: dto.biography,
    };
    character
}

impl Merger<'_> {
    pub(super) fn merge_characters(&mut self, records: Vec<ExtractedCharacter>) {
        for dto in records {
            let id = self.entity_id(EntityKind::Character, &dto.id, &dto.name);
            if id.is_empty() {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::EmptyField,
                    "character without an ID or a name skipped",
                ));
                continue;
            }

            let exists = self.ctx.kb.characters.contains_key(&id);
            if !exists && dto.name.trim().is_empty() {
                self.report(
                    Diagnostic::rejected(DiagnosticKind::EmptyField, "new character has no name")
                        .with_record(EntityKind::Character, &id),
                );
                continue;
            }

            let incoming = character_from(dto, &id, &self.refs());
            match self.ctx.kb.characters.get_mut(&id) {
                Some(existing) => {
                    if existing.enrich_from(incoming) {
                        self.enriched(EntityKind::Character, &id);
                    }
                }
                None => {
                    self.ctx.kb.characters.insert(id.clone(), incoming);
                    self.created(EntityKind::Character, &id);
                }
            }
            self.register_record(EntityKind::Character, &id);
        }
    }
}
