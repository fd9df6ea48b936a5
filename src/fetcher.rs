use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::miro::{ApiError, BoardExportApi};
use crate::model::{BoardBatch, BoardRef, ExportResult, ExportStatus, LedgerRecord, RecordStatus};
use crate::retry::{retry, RetryPolicy};

const ARTIFACT_EXTENSION: &str = "zip";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("export reported success without a download link")]
    MissingLink,
    #[error("download retries exhausted")]
    Exhausted,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Downloads the artifacts of a finished export job and records every board
/// in the ledger.
pub struct ArtifactFetcher<'a> {
    api: &'a dyn BoardExportApi,
    ledger: &'a Ledger,
    data_dir: &'a Path,
    policy: &'a RetryPolicy,
}

impl<'a> ArtifactFetcher<'a> {
    pub fn new(
        api: &'a dyn BoardExportApi,
        ledger: &'a Ledger,
        data_dir: &'a Path,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            api,
            ledger,
            data_dir,
            policy,
        }
    }

    /// Local path of a board's artifact. Rerunning a board overwrites it.
    pub fn artifact_path(&self, board_id: &str) -> PathBuf {
        let file_stem: String = board_id
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.data_dir
            .join(format!("{file_stem}.{ARTIFACT_EXTENSION}"))
    }

    /// Process the manifest in order. Board-level failures are recorded and
    /// never stop the remaining boards; only a ledger write failure is fatal.
    #[instrument(skip_all, fields(results = results.len()))]
    pub async fn fetch_all(
        &self,
        batch: &BoardBatch,
        results: &[ExportResult],
    ) -> Result<FetchSummary, LedgerError> {
        let mut summary = FetchSummary::default();
        for result in results {
            let board = batch
                .get(&result.board_id)
                .cloned()
                .unwrap_or_else(|| BoardRef::bare(result.board_id.clone()));

            let status = self.fetch_one(result).await;
            match status {
                RecordStatus::Success => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
            self.ledger
                .append(&LedgerRecord::for_board(&board, status))
                .await?;
        }
        Ok(summary)
    }

    async fn fetch_one(&self, result: &ExportResult) -> RecordStatus {
        let board_id = result.board_id.as_str();
        match result.status {
            ExportStatus::Failure => {
                error!(
                    board_id,
                    error_message = result.error_message.as_deref().unwrap_or_default(),
                    "board failed to export"
                );
                RecordStatus::Failure
            }
            ExportStatus::Success => match self.download(result).await {
                Ok((path, bytes)) => {
                    info!(board_id, path = %path.display(), bytes, "artifact saved");
                    RecordStatus::Success
                }
                Err(err) => {
                    warn!(board_id, error = %err, "artifact download failed");
                    RecordStatus::Failure
                }
            },
        }
    }

    async fn download(&self, result: &ExportResult) -> Result<(PathBuf, u64), DownloadError> {
        let link = result
            .export_link
            .as_deref()
            .ok_or(DownloadError::MissingLink)?;
        let api = self.api;
        let mut stream = retry(self.policy, "Exported File Download", || api.download(link))
            .await?
            .ok_or(DownloadError::Exhausted)?;

        let path = self.artifact_path(&result.board_id);
        let partial = path.with_extension(format!("{ARTIFACT_EXTENSION}.part"));
        let written = async {
            let mut file = File::create(&partial).await?;
            let mut bytes = 0u64;
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk).await?;
                bytes += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, DownloadError>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => {
                fs::rename(&partial, &path).await?;
                Ok((path, bytes))
            }
            Err(err) => {
                let _ = fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}
