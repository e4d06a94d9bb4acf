//! Chapter ingestion.
//!
//! An [`Ingestor`] owns the merge context and the ledger for one run. Each
//! selected chapter is merged on a staged copy of the context and validated;
//! only a chapter free of blocking errors is committed. Committing writes
//! all six collections first and the ledger entry last, so a chapter is
//! never ledgered ahead of its data.

use crate::chapters::{discover, natural_cmp, ChapterSource};
use crate::config::IngestConfig;
use crate::diagnostics::Diagnostics;
use crate::extract::{build_request, extract_batch, parse_batch, ChapterBatch, ExtractError, Extractor};
use crate::ledger::IngestionLedger;
use crate::merge::{merge_chapter, MergeContext, MergeSummary};
use crate::persist::{load_declarations, PersistError, Store};
use crate::validate::{validate, ValidationScope};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("chapter {0} needs the extraction service, but no credentials are configured")]
    MissingCredentials(String),

    #[error("chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Which chapters a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every chapter found in the chapters directory.
    Unmerged,
    /// These chapter keys only.
    Keys(Vec<String>),
}

/// How a chapter fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterStatus {
    /// Merged and persisted.
    Merged,
    /// Merged in memory only (dry run).
    Planned,
    /// Already in the ledger.
    Skipped,
    /// The batch could not be obtained.
    Failed(String),
    /// Validation found blocking errors; nothing was persisted.
    Blocked,
}

/// Outcome of one chapter.
#[derive(Debug, Clone)]
pub struct ChapterReport {
    pub key: String,
    pub status: ChapterStatus,
    pub summary: MergeSummary,
    pub diagnostics: Diagnostics,
}

impl ChapterReport {
    fn new(key: &str, status: ChapterStatus) -> Self {
        Self {
            key: key.to_string(),
            status,
            summary: MergeSummary::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Whether this chapter makes the run unsuccessful.
    pub fn has_errors(&self) -> bool {
        matches!(self.status, ChapterStatus::Failed(_) | ChapterStatus::Blocked) || self.diagnostics.errors() > 0
    }
}

impl fmt::Display for ChapterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ChapterStatus::Merged => write!(f, "{}: ok ({})", self.key, self.summary),
            ChapterStatus::Planned => write!(f, "{}: planned ({})", self.key, self.summary),
            ChapterStatus::Skipped => write!(f, "{}: skipped (already merged)", self.key),
            ChapterStatus::Failed(reason) => write!(f, "{}: FAILED {}", self.key, reason),
            ChapterStatus::Blocked => write!(f, "{}: FAILED {} errors", self.key, self.diagnostics.errors()),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub chapters: Vec<ChapterReport>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.chapters.iter().any(ChapterReport::has_errors)
    }

    /// Process exit status: 0 on success, 1 when any chapter had errors.
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            1
        } else {
            0
        }
    }

    pub fn count(&self, status: &ChapterStatus) -> usize {
        self.chapters.iter().filter(|c| &c.status == status).count()
    }
}

/// Runs chapter merges against one data directory.
pub struct Ingestor {
    config: IngestConfig,
    store: Store,
    ctx: MergeContext,
    ledger: IngestionLedger,
    extractor: Option<Box<dyn Extractor>>,
    startup: Diagnostics,
}

impl Ingestor {
    /// Load the persisted state and build the alias index.
    pub async fn open(config: IngestConfig) -> Result<Self, IngestError> {
        let store = Store::from_config(&config);
        let kb = store.load_kb().await?;
        let ledger = IngestionLedger::load(config.ledger_path()).await?;
        let declarations = load_declarations(config.aliases_path()).await?;

        let mut ctx = MergeContext::build(kb, &declarations, ledger.counters.clone());
        let startup: Diagnostics = ctx.aliases.take_conflicts().into_iter().map(Into::into).collect();

        info!(
            data_dir = %config.data_dir.display(),
            chapters = ledger.len(),
            aliases = ctx.aliases.len(),
            conflicts = startup.len(),
            "knowledge base loaded"
        );

        Ok(Self {
            config,
            store,
            ctx,
            ledger,
            extractor: None,
            startup,
        })
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn context(&self) -> &MergeContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &IngestionLedger {
        &self.ledger
    }

    /// Alias conflicts found while building the index from persisted state.
    pub fn alias_conflicts(&self) -> &Diagnostics {
        &self.startup
    }

    /// Validate the whole knowledge base as loaded.
    pub fn validate_all(&self) -> Diagnostics {
        validate(&self.ctx.kb, &self.ctx.aliases, &ValidationScope::All)
    }

    /// Chapters on disk that the ledger has not recorded.
    pub async fn pending(&self) -> Result<Vec<ChapterSource>, IngestError> {
        let sources = discover(&self.config.chapters_dir).await?;
        Ok(sources
            .into_iter()
            .filter(|s| !self.ledger.is_merged(&s.key))
            .collect())
    }

    /// Merge the selected chapters in natural key order.
    pub async fn run(&mut self, selection: &Selection) -> Result<RunReport, IngestError> {
        let selected = self.select(selection).await?;

        if self.extractor.is_none() {
            if let Some(source) = selected.iter().find(|s| self.will_merge(s) && s.needs_extraction()) {
                return Err(IngestError::MissingCredentials(source.key.clone()));
            }
        }

        let mut report = RunReport::default();
        for source in selected {
            let span = info_span!("chapter", key = %source.key);
            let chapter = self.ingest_chapter(&source).instrument(span).await?;
            report.chapters.push(chapter);
        }

        info!(
            merged = report.count(&ChapterStatus::Merged),
            planned = report.count(&ChapterStatus::Planned),
            skipped = report.count(&ChapterStatus::Skipped),
            "run finished"
        );
        Ok(report)
    }

    async fn select(&self, selection: &Selection) -> Result<Vec<ChapterSource>, IngestError> {
        let sources = discover(&self.config.chapters_dir).await?;
        let mut selected = match selection {
            Selection::Unmerged => sources,
            Selection::Keys(keys) => {
                let mut chosen = Vec::with_capacity(keys.len());
                for key in keys {
                    let source = sources
                        .iter()
                        .find(|s| &s.key == key)
                        .ok_or_else(|| IngestError::ChapterNotFound(key.clone()))?;
                    if !chosen.contains(source) {
                        chosen.push(source.clone());
                    }
                }
                chosen
            }
        };
        selected.sort_by(|a, b| natural_cmp(&a.key, &b.key));
        Ok(selected)
    }

    fn will_merge(&self, source: &ChapterSource) -> bool {
        self.config.force || !self.ledger.is_merged(&source.key)
    }

    async fn ingest_chapter(&mut self, source: &ChapterSource) -> Result<ChapterReport, IngestError> {
        let key = source.key.as_str();
        if !self.will_merge(source) {
            debug!("already merged");
            return Ok(ChapterReport::new(key, ChapterStatus::Skipped));
        }

        let batch = match self.obtain_batch(source).await {
            Ok(batch) => batch,
            Err(reason) => {
                warn!(%reason, "chapter failed");
                return Ok(ChapterReport::new(key, ChapterStatus::Failed(reason)));
            }
        };
        debug!(records = batch.len(), "batch ready");

        let mut staged = self.ctx.clone();
        let outcome = merge_chapter(&mut staged, key, batch);
        let mut diagnostics = outcome.diagnostics;
        diagnostics.extend(validate(
            &staged.kb,
            &staged.aliases,
            &ValidationScope::Records(&outcome.touched),
        ));

        let mut summary = outcome.summary;
        summary.count_diagnostics(&diagnostics);
        for diagnostic in &diagnostics {
            debug!(%diagnostic);
        }

        let status = if diagnostics.is_blocking() {
            warn!(errors = diagnostics.errors(), "chapter blocked by validation");
            ChapterStatus::Blocked
        } else if self.config.dry_run {
            self.ctx = staged;
            ChapterStatus::Planned
        } else {
            self.store.save_kb(&staged.kb).await?;
            self.ledger.record(key, summary.clone(), &staged.ids);
            self.ledger.save(self.config.ledger_path()).await?;
            self.ctx = staged;
            info!(%summary, "chapter merged");
            ChapterStatus::Merged
        };

        Ok(ChapterReport {
            key: key.to_string(),
            status,
            summary,
            diagnostics,
        })
    }

    /// The chapter's batch, from its pre-extracted file or the service.
    async fn obtain_batch(&self, source: &ChapterSource) -> Result<ChapterBatch, String> {
        if let Some(path) = &source.batch {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            return parse_batch(&raw).map_err(|reason| format!("malformed batch file: {reason}"));
        }

        let Some(extractor) = &self.extractor else {
            return Err("no extraction service configured".to_string());
        };
        let narrative = source.read_narrative().await.map_err(|e| e.to_string())?;
        let request = build_request(&source.key, &narrative, &self.ctx.kb);

        match extract_batch(extractor.as_ref(), &request, self.config.parse_attempts).await {
            Ok(batch) => Ok(batch),
            Err(e) => {
                if let ExtractError::Malformed { raw, .. } = &e {
                    match self.store.save_failed(&source.key, raw).await {
                        Ok(path) => warn!(path = %path.display(), "raw extraction output kept"),
                        Err(save) => warn!(error = %save, "could not keep raw extraction output"),
                    }
                }
                Err(e.to_string())
            }
        }
    }
}
