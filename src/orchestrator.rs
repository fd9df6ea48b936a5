//! Export orchestration: each batch is created as a remote job, polled until
//! it finishes, and its per-board results are collected.

use std::fmt;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::Retry;
use crate::miro::{ApiError, BoardExportApi};
use crate::model::{BoardBatch, ExportJob, ExportResult};
use crate::retry::retry;

/// The remote stages an export batch goes through before its results are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Creating,
    Polling,
    Collecting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Creating => "CREATING",
            Stage::Polling => "POLLING",
            Stage::Collecting => "COLLECTING",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    /// The job finished and its manifest was fetched.
    Collected {
        job: ExportJob,
        results: Vec<ExportResult>,
    },
    /// The batch was dropped at `stage`; no per-board results exist.
    Abandoned { stage: Stage, job_id: Option<String> },
}

/// Drives one batch through create → poll → collect.
pub struct ExportOrchestrator<'a> {
    api: &'a dyn BoardExportApi,
    org_id: &'a str,
    retry: &'a Retry,
}

impl<'a> ExportOrchestrator<'a> {
    pub fn new(api: &'a dyn BoardExportApi, org_id: &'a str, retry: &'a Retry) -> Self {
        Self { api, org_id, retry }
    }

    #[instrument(skip_all, fields(boards = batch.len()))]
    pub async fn export(&self, batch: &BoardBatch) -> BatchOutcome {
        let Some(job) = self.create(batch).await else {
            return BatchOutcome::Abandoned {
                stage: Stage::Creating,
                job_id: None,
            };
        };

        if !self.poll(&job).await {
            return BatchOutcome::Abandoned {
                stage: Stage::Polling,
                job_id: Some(job.job_id),
            };
        }

        match self.collect(&job).await {
            Some(results) => BatchOutcome::Collected { job, results },
            None => BatchOutcome::Abandoned {
                stage: Stage::Collecting,
                job_id: Some(job.job_id),
            },
        }
    }

    async fn create(&self, batch: &BoardBatch) -> Option<ExportJob> {
        let board_ids = batch.board_ids();
        let request_id = Uuid::new_v4();
        let (api, org_id, ids) = (self.api, self.org_id, &board_ids);

        let outcome = retry(&self.retry.create_export, "Begin Boards Export", || {
            api.create_export(org_id, request_id, ids)
        })
        .await;
        let job_id = settle(Stage::Creating, outcome)?;
        info!(%job_id, %request_id, "export job created");
        Some(ExportJob {
            job_id,
            request_id,
            board_ids,
        })
    }

    /// Poll until the job reports `FINISHED`. Any other status counts as a
    /// transient failure and uses up one attempt of the status budget.
    async fn poll(&self, job: &ExportJob) -> bool {
        let (api, org_id, job_id) = (self.api, self.org_id, job.job_id.as_str());
        let outcome = retry(&self.retry.export_status, "Export Status Check", move || async move {
            let status = api.export_status(org_id, job_id).await?;
            if status.is_finished() {
                Ok(status)
            } else {
                Err(ApiError::JobNotFinished(status))
            }
        })
        .await;
        let finished = settle(Stage::Polling, outcome).is_some();
        if finished {
            info!(job_id, "export job finished");
        }
        finished
    }

    async fn collect(&self, job: &ExportJob) -> Option<Vec<ExportResult>> {
        let (api, org_id, job_id) = (self.api, self.org_id, job.job_id.as_str());
        let outcome = retry(&self.retry.export_results, "Export Job Results", || {
            api.export_results(org_id, job_id)
        })
        .await;
        let results = settle(Stage::Collecting, outcome)?;
        info!(job_id, results = results.len(), "export results fetched");
        Some(results)
    }
}

fn settle<T>(stage: Stage, outcome: Result<Option<T>, ApiError>) -> Option<T> {
    match outcome {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            error!(%stage, "retries exhausted; abandoning batch");
            None
        }
        Err(err) => {
            error!(%stage, error = %err, "non-retryable failure; abandoning batch");
            None
        }
    }
}
