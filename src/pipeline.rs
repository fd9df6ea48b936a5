use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::enumerator::{BoardSource, EnumerationError, ExplicitBoards, FailureReplay, PagedListing};
use crate::fetcher::ArtifactFetcher;
use crate::ledger::Ledger;
use crate::miro::BoardExportApi;
use crate::model::{LedgerRecord, RecordStatus};
use crate::orchestrator::{BatchOutcome, ExportOrchestrator, Stage};

/// Which boards a run should export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Explicit(Vec<String>),
    Listing { resume: bool },
    RetryFailed,
}

/// Build the board source for a selection. Validation happens here, before
/// any remote call is made.
pub async fn board_source(
    selection: Selection,
    cfg: &Config,
    ledger: &Ledger,
) -> Result<Box<dyn BoardSource>, EnumerationError> {
    let policy = cfg.retry.list_boards;
    Ok(match selection {
        Selection::Explicit(ids) => Box::new(ExplicitBoards::new(ids)?),
        Selection::Listing { resume: false } => {
            Box::new(PagedListing::new(cfg.app.offset, cfg.app.page_limit, policy)?)
        }
        Selection::Listing { resume: true } => {
            Box::new(PagedListing::resume(ledger, cfg.app.page_limit, policy).await?)
        }
        Selection::RetryFailed => Box::new(FailureReplay::from_ledger(ledger).await?),
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub abandoned_batches: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs batches one after another until the source is exhausted.
pub struct Pipeline<'a> {
    api: &'a dyn BoardExportApi,
    ledger: &'a Ledger,
    cfg: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(api: &'a dyn BoardExportApi, ledger: &'a Ledger, cfg: &'a Config) -> Self {
        Self { api, ledger, cfg }
    }

    pub async fn run(&self, source: &mut dyn BoardSource) -> Result<RunSummary> {
        let orchestrator = ExportOrchestrator::new(self.api, &self.cfg.miro.org_id, &self.cfg.retry);
        let data_dir = self.cfg.app.data_path();
        let fetcher =
            ArtifactFetcher::new(self.api, self.ledger, &data_dir, &self.cfg.retry.download);
        let mut summary = RunSummary::default();

        while let Some(batch) = source
            .next_batch(self.api)
            .await
            .context("failed to enumerate boards")?
        {
            summary.batches += 1;
            info!(batch = summary.batches, boards = batch.len(), "exporting batch");

            match orchestrator.export(&batch).await {
                BatchOutcome::Collected { job, results } => {
                    let fetched = fetcher
                        .fetch_all(&batch, &results)
                        .await
                        .context("failed to append to ledger")?;
                    info!(
                        job_id = %job.job_id,
                        succeeded = fetched.succeeded,
                        failed = fetched.failed,
                        "batch done"
                    );
                    summary.succeeded += fetched.succeeded;
                    summary.failed += fetched.failed;
                }
                BatchOutcome::Abandoned { stage, job_id } => {
                    summary.abandoned_batches += 1;
                    warn!(
                        %stage,
                        job_id = job_id.as_deref().unwrap_or_default(),
                        boards = batch.len(),
                        "batch abandoned"
                    );
                    // Lost results are per-board failures; earlier stages are
                    // only recorded when asked to.
                    let status = if stage == Stage::Collecting {
                        summary.failed += batch.len();
                        RecordStatus::Failure
                    } else if self.cfg.app.record_abandoned {
                        RecordStatus::Abandoned
                    } else {
                        continue;
                    };
                    for board in batch.boards() {
                        self.ledger
                            .append(&LedgerRecord::for_board(board, status))
                            .await
                            .context("failed to append to ledger")?;
                    }
                }
            }
        }

        info!(
            batches = summary.batches,
            abandoned = summary.abandoned_batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "all batches processed"
        );
        Ok(summary)
    }
}
