//! The fixed instruction and the per-chapter payload.

use super::{ChapterBatch, ExtractionRequest};
use crate::model::KnowledgeBase;
use std::fmt::Write;

/// Recent events listed as context so updates can target them.
const CONTEXT_EVENTS: usize = 30;

pub const SYSTEM_PROMPT: &str = r#"You are the archivist of a long-running historical role-play campaign.
You read one chapter of the chronicle at a time and record what it adds to the archive.

Rules:
- Record only what the chapter states. Ignore commentary about the game itself.
- Refer to known entities by the IDs listed under "Known entities". Use a new
  snake_case ID only for an entity that is genuinely new.
- Give every event a short key unique within the chapter. Rolls, laws and
  updates refer to events of this chapter by that key.
- Dates are in-story dates: YYYY, YYYY-MM or YYYY-MM-DD.
- Dice are d100. Report the number rolled exactly as written; do not guess a
  missing value.
- Changes to known entities go in "updates". "set" overwrites a field, "add"
  and "remove" edit list fields, "append" adds history entries.

Answer by calling the tool once with the complete record."#;

/// Build the request for one chapter.
pub fn build_request(chapter: &str, narrative: &str, kb: &KnowledgeBase) -> ExtractionRequest {
    let mut user = String::new();

    let _ = writeln!(user, "# Chapter {chapter}\n");
    user.push_str(narrative.trim());
    user.push_str("\n\n# Known entities\n");
    user.push_str(&known_entities(kb));
    let _ = write!(
        user,
        "\nRecord this chapter with the `{}` tool.",
        ChapterBatch::tool_name()
    );

    ExtractionRequest {
        chapter: chapter.to_string(),
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Compact listing of what the archive already holds.
fn known_entities(kb: &KnowledgeBase) -> String {
    if kb.is_empty() {
        return "(the archive is empty)\n".to_string();
    }

    let mut out = String::new();

    if !kb.characters.is_empty() {
        out.push_str("\n## Characters\n");
        for c in kb.characters.values() {
            let _ = write!(out, "- {}: {}", c.id, c.name);
            if !c.aliases.is_empty() {
                let _ = write!(out, " (also: {})", c.aliases.join(", "));
            }
            if let Some(location) = &c.state.location {
                let _ = write!(out, " [at {location}]");
            }
            out.push('\n');
        }
    }

    if !kb.factions.is_empty() {
        out.push_str("\n## Factions\n");
        for f in kb.factions.values() {
            let _ = writeln!(out, "- {}: {}", f.id, f.name);
        }
    }

    if !kb.locations.is_empty() {
        out.push_str("\n## Locations\n");
        for l in kb.locations.values() {
            let _ = writeln!(out, "- {}: {}", l.id, l.name);
        }
    }

    if !kb.laws.is_empty() {
        out.push_str("\n## Laws\n");
        for law in kb.laws.values() {
            let _ = writeln!(out, "- {}: {} ({:?})", law.id, law.title, law.status);
        }
    }

    if !kb.events.is_empty() {
        out.push_str("\n## Recent events\n");
        let skip = kb.events.len().saturating_sub(CONTEXT_EVENTS);
        for e in kb.events.values().skip(skip) {
            let _ = writeln!(out, "- {} ({}): {}", e.id, e.date, e.summary);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Character;

    #[test]
    fn test_request_lists_known_entities() {
        let mut kb = KnowledgeBase::new();
        kb.characters.insert(
            "alfonso_x".to_string(),
            Character::new("alfonso_x", "Alfonso X").with_alias("el Sabio"),
        );

        let request = build_request("chapter_02", "The king rides north.", &kb);
        assert_eq!(request.chapter, "chapter_02");
        assert_eq!(request.system, SYSTEM_PROMPT);
        assert!(request.user.contains("The king rides north."));
        assert!(request.user.contains("- alfonso_x: Alfonso X (also: el Sabio)"));
        assert!(request.user.contains("record_chapter"));
    }

    #[test]
    fn test_empty_archive() {
        let request = build_request("chapter_01", "It begins.", &KnowledgeBase::new());
        assert!(request.user.contains("(the archive is empty)"));
    }
}
