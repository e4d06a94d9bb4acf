//! Partitioned, durable identifier allocation for events and rolls.
//!
//! IDs look like `evt_1248_007`: a prefix for the ID space, a partition
//! derived from the in-story year, and a zero-padded counter. Counters hold
//! the *next* value to issue and are persisted in the ingestion ledger, so
//! a restarted process continues where the last one stopped.

use crate::model::KnowledgeBase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Partition used when a date carries no parseable year.
pub const UNDATED: &str = "undated";

/// Kinds of records whose IDs are allocated rather than declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    Event,
    Roll,
}

impl IdSpace {
    /// Prefix of formatted IDs.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdSpace::Event => "evt",
            IdSpace::Roll => "roll",
        }
    }

    /// Name used in ledger counter keys.
    pub fn name(&self) -> &'static str {
        match self {
            IdSpace::Event => "event",
            IdSpace::Roll => "roll",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "evt" => Some(IdSpace::Event),
            "roll" => Some(IdSpace::Roll),
            _ => None,
        }
    }
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Derive the partition key from a `YYYY[-MM[-DD]]` date.
///
/// Negative years are written with an `n` prefix (`-44` → `n44`) so the
/// partition stays identifier-safe.
pub fn partition_of(date: &str) -> String {
    let date = date.trim();
    let (negative, rest) = match date.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, date),
    };

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let tail = &rest[digits.len()..];
    if digits.is_empty() || !(tail.is_empty() || tail.starts_with('-')) {
        return UNDATED.to_string();
    }

    match digits.parse::<u32>() {
        Ok(year) if negative => format!("n{year}"),
        Ok(year) => year.to_string(),
        Err(_) => UNDATED.to_string(),
    }
}

/// Sortable `(year, month, day)` for a `YYYY[-MM[-DD]]` date.
///
/// Missing month or day sort first. Unparseable dates have no key.
pub fn date_key(date: &str) -> Option<(i64, u32, u32)> {
    let date = date.trim();
    let (sign, rest) = match date.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, date),
    };
    let mut parts = rest.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    let day = match parts.next() {
        Some(d) => d.parse().ok()?,
        None => 0,
    };
    Some((sign * year, month, day))
}

/// Format an ID from its parts.
pub fn format_id(space: IdSpace, partition: &str, counter: u32) -> String {
    format!("{}_{}_{:03}", space.prefix(), partition, counter)
}

/// Split an allocated ID back into its parts.
pub fn parse_id(id: &str) -> Option<(IdSpace, &str, u32)> {
    let (prefix, rest) = id.split_once('_')?;
    let space = IdSpace::from_prefix(prefix)?;
    let (partition, counter) = rest.rsplit_once('_')?;
    if partition.is_empty() {
        return None;
    }
    let counter = counter.parse().ok()?;
    Some((space, partition, counter))
}

fn counter_key(space: IdSpace, partition: &str) -> String {
    format!("{}:{}", space.name(), partition)
}

/// Issues monotonically increasing IDs per (space, partition).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdAllocator {
    counters: BTreeMap<String, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted counters.
    pub fn from_counters(counters: BTreeMap<String, u32>) -> Self {
        Self { counters }
    }

    /// Counters in their persisted form, `"{space}:{partition}" → next`.
    pub fn counters(&self) -> &BTreeMap<String, u32> {
        &self.counters
    }

    /// The value the next allocation in this partition will use.
    pub fn peek(&self, space: IdSpace, partition: &str) -> u32 {
        self.counters
            .get(&counter_key(space, partition))
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    /// Allocate a fresh ID.
    pub fn allocate(&mut self, space: IdSpace, partition: &str) -> String {
        let next = self.peek(space, partition);
        self.counters.insert(counter_key(space, partition), next + 1);
        format_id(space, partition, next)
    }

    /// Allocate a fresh ID partitioned by the year of `date`.
    pub fn allocate_for_date(&mut self, space: IdSpace, date: &str) -> String {
        self.allocate(space, &partition_of(date))
    }

    /// Move counters past an ID that already exists.
    pub fn observe(&mut self, id: &str) {
        if let Some((space, partition, counter)) = parse_id(id) {
            let key = counter_key(space, partition);
            let next = self.counters.entry(key).or_insert(1);
            if *next <= counter {
                *next = counter + 1;
            }
        }
    }

    /// Move counters past every event and roll in the knowledge base.
    ///
    /// Covers state persisted by a run that crashed before its ledger write.
    pub fn observe_all(&mut self, kb: &KnowledgeBase) {
        for id in kb.events.keys().chain(kb.rolls.keys()) {
            self.observe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of("1248-11-23"), "1248");
        assert_eq!(partition_of("1248-11"), "1248");
        assert_eq!(partition_of("1248"), "1248");
        assert_eq!(partition_of("-44-03-15"), "n44");
        assert_eq!(partition_of("spring of 1248"), UNDATED);
        assert_eq!(partition_of("1248ish"), UNDATED);
        assert_eq!(partition_of(""), UNDATED);
    }

    #[test]
    fn test_allocation_is_monotonic_per_partition() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(IdSpace::Event, "1248"), "evt_1248_001");
        assert_eq!(ids.allocate(IdSpace::Event, "1248"), "evt_1248_002");
        assert_eq!(ids.allocate(IdSpace::Event, "1249"), "evt_1249_001");
        assert_eq!(ids.allocate(IdSpace::Roll, "1248"), "roll_1248_001");
        assert_eq!(ids.allocate_for_date(IdSpace::Event, "1248-12-01"), "evt_1248_003");
        assert_eq!(ids.counters().get("event:1248"), Some(&4));
    }

    #[test]
    fn test_resume_from_counters() {
        let mut first = IdAllocator::new();
        first.allocate(IdSpace::Event, "1248");
        first.allocate(IdSpace::Event, "1248");

        let mut resumed = IdAllocator::from_counters(first.counters().clone());
        assert_eq!(resumed.allocate(IdSpace::Event, "1248"), "evt_1248_003");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("evt_1248_007"), Some((IdSpace::Event, "1248", 7)));
        assert_eq!(parse_id("roll_undated_012"), Some((IdSpace::Roll, "undated", 12)));
        assert_eq!(parse_id("alfonso_x"), None);
        assert_eq!(parse_id("evt_1248"), None);
    }

    #[test]
    fn test_observe_skips_past_existing_ids() {
        let mut kb = KnowledgeBase::new();
        let event = Event::new("evt_1248_005", "1248", "chapter_01");
        kb.events.insert(event.id.clone(), event);

        let mut ids = IdAllocator::new();
        ids.observe_all(&kb);
        assert_eq!(ids.allocate(IdSpace::Event, "1248"), "evt_1248_006");

        // Never moves a counter backwards.
        ids.observe("evt_1248_002");
        assert_eq!(ids.peek(IdSpace::Event, "1248"), 7);
    }

    #[test]
    fn test_date_key_orders_chronologically() {
        assert!(date_key("1248-11-23") > date_key("1248-03"));
        assert!(date_key("1248") < date_key("1248-01-01"));
        assert!(date_key("-44-03-15") < date_key("14"));
        assert_eq!(date_key("soon"), None);
    }
}
