//! The batch run loop.
//!
//! A run authorizes the caller, enumerates every live document, plans the
//! batches and then, for each selected batch, classifies its documents,
//! runs the touch phase, the dispatch phase and the completion barrier.
//! A failing batch is logged and counted; the loop carries on.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;

use crate::{
    classify::{FulltextOracle, classify_batch},
    dispatch::{AsyncDispatcher, await_completion, run_dispatch_phase},
    document::DocumentRef,
    enumerate::{DocumentQuery, enumerate_documents},
    error::Result,
    plan::{Batch, BatchPlan},
    principal::{Authorization, PrincipalResolver, authorize},
    session::{PrivilegedSession, TransactionControl},
    touch::{TouchAttributes, TouchReport, run_touch_phase},
};

/// Status returned to callers that fail the authorization gate.
pub const UNAUTHORIZED: &str = "unauthorized";

pub const DEFAULT_REPOSITORY: &str = "default";
pub const DEFAULT_CHANGE_TRIGGER: &str = "dc:title";
pub const DEFAULT_JOB_MARKER: &str = "ecm:fulltextJobId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexConfig {
    /// Name of the repository, carried on every indexing request.
    pub repository: String,
    pub change_trigger: String,
    pub job_marker: String,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            change_trigger: DEFAULT_CHANGE_TRIGGER.to_string(),
            job_marker: DEFAULT_JOB_MARKER.to_string(),
        }
    }
}

/// Everything the run loop talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub principals: &'a dyn PrincipalResolver,
    pub query: &'a dyn DocumentQuery,
    pub session: &'a dyn PrivilegedSession,
    pub transactions: &'a dyn TransactionControl,
    pub oracle: &'a dyn FulltextOracle,
    pub dispatcher: &'a dyn AsyncDispatcher,
}

/// Counters accumulated over one run.
///
/// `documents_processed` counts every document of every attempted batch,
/// including batches that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents_processed: usize,
    pub total_documents: usize,
    pub batch_errors: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "done: {} total: {} batch_errors: {}",
            self.documents_processed, self.total_documents, self.batch_errors
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexOutcome {
    Unauthorized,
    Done(RunSummary),
}

impl std::fmt::Display for ReindexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => f.write_str(UNAUTHORIZED),
            Self::Done(summary) => summary.fmt(f),
        }
    }
}

/// Cooperative stop request, observed between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a single successful batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BatchReport {
    touch: TouchReport,
    dispatched: bool,
}

pub struct Reindexer<'a> {
    deps: Collaborators<'a>,
    config: ReindexConfig,
    cancel: CancelFlag,
}

impl<'a> Reindexer<'a> {
    pub fn new(deps: Collaborators<'a>, config: ReindexConfig) -> Self {
        Self {
            deps,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reindex the repository and render the outcome as a status line.
    ///
    /// Errors are returned only for failures before any batch runs
    /// (enumeration, suspending the ambient transaction) or after the
    /// run (resuming it).
    pub fn reindex(&self, batch_size: i64, selected_batch: i64) -> Result<String> {
        Ok(self.run(batch_size, selected_batch)?.to_string())
    }

    pub fn run(
        &self,
        batch_size: i64,
        selected_batch: i64,
    ) -> Result<ReindexOutcome> {
        if let Authorization::Unauthorized = authorize(self.deps.principals) {
            tracing::warn!("reindexing refused: caller is not an administrator");
            return Ok(ReindexOutcome::Unauthorized);
        }

        tracing::info!(repository = %self.config.repository, "reindexing starting");
        let docs = enumerate_documents(self.deps.query)?;
        let plan = BatchPlan::new(docs.len(), batch_size, selected_batch);

        tracing::info!(
            documents = plan.total(),
            batch_size = plan.batch_size(),
            batches = plan.num_batches(),
            "reindexing planned"
        );
        if let Some(ordinal) = plan.selected_ordinal() {
            tracing::info!(batch = ordinal, "reindexing limited to one batch");
        }

        // Batches must be independent units of work.
        let suspended = self.deps.transactions.is_active();
        if suspended {
            self.deps.transactions.commit_or_rollback()?;
        }

        let summary = self.run_batches(plan, &docs);
        tracing::info!(
            processed = summary.documents_processed,
            errors = summary.batch_errors,
            "reindexing done"
        );

        if suspended {
            self.deps.transactions.start()?;
        }
        Ok(ReindexOutcome::Done(summary))
    }

    fn run_batches(&self, plan: BatchPlan, docs: &[DocumentRef]) -> RunSummary {
        let mut summary = RunSummary {
            total_documents: plan.total(),
            ..Default::default()
        };

        for batch in plan.batches(docs) {
            if self.cancel.is_cancelled() {
                tracing::warn!(batch = batch.ordinal(), "reindexing cancelled");
                break;
            }

            tracing::info!(
                batch = batch.ordinal(),
                batches = plan.num_batches(),
                first_id = ?batch.first_id().map(|id| id.as_str()),
                "reindexing batch"
            );
            let result = self.process_batch(&batch);
            summary.documents_processed += batch.members.len();

            match result {
                Ok(report) => tracing::debug!(
                    batch = batch.ordinal(),
                    touched = report.touch.touched,
                    marked = report.touch.marked,
                    skipped = report.touch.skipped,
                    dispatched = report.dispatched,
                    "batch complete"
                ),
                Err(err) if err.is_cancellation() => {
                    tracing::warn!(
                        batch = batch.ordinal(),
                        "reindexing interrupted"
                    );
                    break;
                }
                Err(err) => {
                    tracing::error!(
                        batch = batch.ordinal(),
                        error = %err,
                        "error processing batch"
                    );
                    summary.batch_errors += 1;
                }
            }
        }

        summary
    }

    fn process_batch(&self, batch: &Batch<'_>) -> Result<BatchReport> {
        let ids = classify_batch(batch.members, self.deps.oracle)?;

        let touch = run_touch_phase(
            self.deps.session,
            self.deps.transactions,
            &ids,
            TouchAttributes {
                change_trigger: &self.config.change_trigger,
                job_marker: &self.config.job_marker,
            },
        )?;

        let dispatched = run_dispatch_phase(
            self.deps.dispatcher,
            self.deps.transactions,
            self.deps.oracle,
            &ids.indexable,
            &self.config.repository,
        )?;

        await_completion(self.deps.dispatcher)?;

        Ok(BatchReport { touch, dispatched })
    }
}
