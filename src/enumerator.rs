//! Sources of board batches.
//!
//! Each strategy is its own [`BoardSource`]: an explicit id list, the live
//! paginated listing (optionally resumed from the ledger), or a replay of the
//! boards the ledger recorded as failed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{info, instrument};

use crate::ledger::{Ledger, LedgerError};
use crate::miro::{ApiError, BoardExportApi};
use crate::model::{BoardBatch, BoardRef, RecordStatus, ValidationError, MAX_BOARDS_PER_JOB};
use crate::retry::{retry, RetryPolicy};

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("board listing unavailable at offset {offset} after all retries")]
    ListingUnavailable { offset: usize },
    #[error("board listing failed: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[async_trait]
pub trait BoardSource: Send {
    /// Next batch to export, or `None` once the source is exhausted.
    async fn next_batch(
        &mut self,
        api: &dyn BoardExportApi,
    ) -> Result<Option<BoardBatch>, EnumerationError>;
}

/// A fixed list of board ids exported as a single batch.
#[derive(Debug)]
pub struct ExplicitBoards {
    batch: Option<BoardBatch>,
}

impl ExplicitBoards {
    pub fn new(ids: Vec<String>) -> Result<Self, ValidationError> {
        if ids.len() > MAX_BOARDS_PER_JOB {
            return Err(ValidationError::TooManyBoards {
                got: ids.len(),
                max: MAX_BOARDS_PER_JOB,
            });
        }
        Ok(Self {
            batch: Some(BoardBatch::from_ids(ids)?),
        })
    }
}

#[async_trait]
impl BoardSource for ExplicitBoards {
    async fn next_batch(
        &mut self,
        _api: &dyn BoardExportApi,
    ) -> Result<Option<BoardBatch>, EnumerationError> {
        Ok(self.batch.take().filter(|b| !b.is_empty()))
    }
}

/// Walks the organisation's boards page by page.
#[derive(Debug)]
pub struct PagedListing {
    offset: usize,
    limit: usize,
    total: Option<usize>,
    policy: RetryPolicy,
    already_recorded: HashSet<String>,
}

impl PagedListing {
    pub fn new(offset: usize, limit: usize, policy: RetryPolicy) -> Result<Self, ValidationError> {
        if limit == 0 || limit > MAX_BOARDS_PER_JOB {
            return Err(ValidationError::InvalidLimit {
                got: limit,
                max: MAX_BOARDS_PER_JOB,
            });
        }
        Ok(Self {
            offset,
            limit,
            total: None,
            policy,
            already_recorded: HashSet::new(),
        })
    }

    /// Start where the ledger left off: the offset is the number of distinct
    /// boards already recorded, and those boards are never re-exported.
    /// Replayed or abandoned boards may appear on several lines, so the raw
    /// line count would overshoot.
    pub async fn resume(
        ledger: &Ledger,
        limit: usize,
        policy: RetryPolicy,
    ) -> Result<Self, EnumerationError> {
        let recorded = ledger.recorded_ids().await?;
        let mut listing = Self::new(recorded.len(), limit, policy)?;
        listing.already_recorded = recorded;
        info!(
            offset = listing.offset,
            recorded = listing.already_recorded.len(),
            "resuming board listing from ledger"
        );
        Ok(listing)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[async_trait]
impl BoardSource for PagedListing {
    #[instrument(skip_all)]
    async fn next_batch(
        &mut self,
        api: &dyn BoardExportApi,
    ) -> Result<Option<BoardBatch>, EnumerationError> {
        loop {
            if matches!(self.total, Some(total) if self.offset >= total) {
                return Ok(None);
            }

            let (offset, limit) = (self.offset, self.limit);
            info!(offset, limit, "listing boards");
            let page = retry(&self.policy, "Get Boards Data", || api.list_boards(offset, limit))
                .await?
                .ok_or(EnumerationError::ListingUnavailable { offset })?;

            self.total = Some(page.total);
            self.offset += limit;

            let listed = page.boards.len();
            let boards: Vec<BoardRef> = page
                .boards
                .into_iter()
                .filter(|b| !self.already_recorded.contains(&b.id))
                .collect();
            if boards.is_empty() {
                info!(offset, listed, total = page.total, "no new boards on page");
                continue;
            }
            info!(offset, listed, selected = boards.len(), total = page.total, "board page ready");
            return Ok(Some(BoardBatch::new(boards)?));
        }
    }
}

/// Replays boards whose most recent ledger record is a failure.
#[derive(Debug)]
pub struct FailureReplay {
    batches: VecDeque<BoardBatch>,
}

impl FailureReplay {
    pub async fn from_ledger(ledger: &Ledger) -> Result<Self, EnumerationError> {
        let records = ledger.readable_records().await?;

        let mut order = Vec::new();
        let mut latest = HashMap::new();
        for record in records {
            if !latest.contains_key(&record.board_id) {
                order.push(record.board_id.clone());
            }
            latest.insert(record.board_id.clone(), record);
        }

        let failed: Vec<BoardRef> = order
            .iter()
            .filter_map(|id| latest.get(id))
            .filter(|r| matches!(r.status, RecordStatus::Failure | RecordStatus::Abandoned))
            .map(|r| r.to_board())
            .collect();

        let batches = failed
            .chunks(MAX_BOARDS_PER_JOB)
            .map(|chunk| BoardBatch::new(chunk.to_vec()))
            .collect::<Result<VecDeque<_>, _>>()?;
        info!(boards = failed.len(), batches = batches.len(), "replaying failed boards");
        Ok(Self { batches })
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl BoardSource for FailureReplay {
    async fn next_batch(
        &mut self,
        _api: &dyn BoardExportApi,
    ) -> Result<Option<BoardBatch>, EnumerationError> {
        Ok(self.batches.pop_front())
    }
}
