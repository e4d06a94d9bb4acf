//! Plain-text output for the subcommands.

use chronicle_core::{AliasIndex, Diagnostics, EntityKind, IngestionLedger, KnowledgeBase};

pub fn print_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics {
        println!("  {diagnostic}");
    }
}

/// One line with the size of every collection.
pub fn print_counts(kb: &KnowledgeBase) {
    let counts: Vec<String> = EntityKind::ALL
        .iter()
        .map(|&kind| format!("{} {kind}s", kb.count(kind)))
        .collect();
    println!("Knowledge base: {}", counts.join(", "));
}

pub fn print_ledger(ledger: &IngestionLedger) {
    if ledger.is_empty() {
        println!("No chapters merged yet");
    } else {
        println!("Merged ({}):", ledger.len());
        for (key, entry) in &ledger.chapters {
            println!(
                "  {key}  {}  {}",
                entry.merged_at.format("%Y-%m-%d %H:%M"),
                entry.summary
            );
        }
    }

    if !ledger.counters.is_empty() {
        let counters: Vec<String> = ledger
            .counters
            .iter()
            .map(|(space, next)| format!("{space}={next}"))
            .collect();
        println!("Next IDs: {}", counters.join(" "));
    }
}

pub fn print_aliases(aliases: &AliasIndex) {
    println!("{} aliases", aliases.len());
    for kind in EntityKind::ALL {
        let count = aliases.count(kind);
        if count > 0 {
            println!("  {kind}: {count}");
        }
    }
}
