//! Diagnostics collected while merging and validating.

use crate::alias::AliasConflict;
use crate::model::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recorded for review; never stops a merge.
    Warning,
    /// One input record was skipped.
    Rejected,
    /// The chapter cannot be persisted.
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Rejected => "rejected",
            Severity::Blocking => "error",
        })
    }
}

/// What a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    AliasConflict,
    DanglingReference,
    UnresolvedTarget,
    UnknownField,
    WrongOperation,
    InvalidValue,
    ImmutableRecord,
    DroppedRoll,
    RebucketedRoll,
    DuplicateRoll,
    OutOfRange,
    EmptyField,
    DateRegression,
}

/// The record a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: EntityKind,
    pub id: String,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            record: None,
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn rejected(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Rejected, kind, message)
    }

    pub fn blocking(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Blocking, kind, message)
    }

    /// Point the diagnostic at a record.
    pub fn with_record(mut self, kind: EntityKind, id: impl Into<String>) -> Self {
        self.record = Some(RecordRef { kind, id: id.into() });
        self
    }
}

impl From<AliasConflict> for Diagnostic {
    fn from(conflict: AliasConflict) -> Self {
        Diagnostic::warning(DiagnosticKind::AliasConflict, conflict.to_string())
            .with_record(conflict.kind, conflict.rejected)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => write!(f, "{}: [{}] {}", self.severity, record, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// An ordered list of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of diagnostics of one severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.0.iter().filter(|d| d.severity == severity).count()
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Blocking and rejected diagnostics together.
    pub fn errors(&self) -> usize {
        self.count(Severity::Blocking) + self.count(Severity::Rejected)
    }

    /// Whether any diagnostic blocks persistence.
    pub fn is_blocking(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Blocking)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
