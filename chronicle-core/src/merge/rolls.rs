//! Attaching rolls to the events they decided.
//!
//! Rolls are immutable: an event holds at most one, and a later roll for
//! the same event is reported rather than merged.

use super::Merger;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::extract::ExtractedRoll;
use crate::ids::IdSpace;
use crate::model::{EntityKind, Roll, RollSummary};
use crate::range::canonicalize;

impl Merger<'_> {
    pub(super) fn merge_rolls(&mut self, records: Vec<ExtractedRoll>) {
        for dto in records {
            let event_id = self.refs().resolve(EntityKind::Event, &dto.event);
            let Some(event) = self.ctx.kb.events.get(&event_id) else {
                self.report(Diagnostic::rejected(
                    DiagnosticKind::UnresolvedTarget,
                    format!("roll refers to unknown event '{}'", dto.event.trim()),
                ));
                continue;
            };
            let date = event.date.clone();
            let recorded = event.roll.clone();

            let outcome = match canonicalize(
                dto.rolled.as_ref(),
                dto.outcome.as_deref(),
                dto.label.as_deref(),
                &dto.table,
            ) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.report(
                        Diagnostic::warning(DiagnosticKind::DroppedRoll, format!("roll dropped: {e}"))
                            .with_record(EntityKind::Event, &event_id),
                    );
                    continue;
                }
            };

            if let Some(recorded) = recorded {
                if recorded.rolled != outcome.rolled {
                    self.report(
                        Diagnostic::warning(
                            DiagnosticKind::DuplicateRoll,
                            format!(
                                "event already decided by {} ({}); roll of {} ignored",
                                recorded.roll, recorded.rolled, outcome.rolled
                            ),
                        )
                        .with_record(EntityKind::Event, &event_id),
                    );
                }
                continue;
            }

            if outcome.rebucketed {
                let declared = dto.outcome.as_deref().or(dto.label.as_deref()).unwrap_or_default();
                self.report(
                    Diagnostic::warning(
                        DiagnosticKind::RebucketedRoll,
                        format!(
                            "declared outcome '{}' does not contain {}; recorded as {}",
                            declared.trim(),
                            outcome.rolled,
                            outcome.interval
                        ),
                    )
                    .with_record(EntityKind::Event, &event_id),
                );
            }

            let id = self.ctx.ids.allocate_for_date(IdSpace::Roll, &date);
            let roll = Roll {
                id: id.clone(),
                event: event_id.clone(),
                rolled: outcome.rolled,
                outcome: outcome.interval.to_string(),
                label: outcome.label,
                purpose: dto.purpose.filter(|p| !p.trim().is_empty()),
                table: dto.table,
            };
            let summary = RollSummary {
                roll: id.clone(),
                rolled: roll.rolled,
                outcome: roll.outcome.clone(),
                label: roll.label.clone(),
            };

            self.ctx.kb.rolls.insert(id.clone(), roll);
            if let Some(event) = self.ctx.kb.events.get_mut(&event_id) {
                event.roll = Some(summary);
            }
            self.created(EntityKind::Roll, &id);
            self.touch(EntityKind::Event, &event_id);
        }
    }
}
