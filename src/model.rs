use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Hard limit on the number of boards a single export job may carry.
pub const MAX_BOARDS_PER_JOB: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a batch may hold at most {max} boards, got {got}")]
    TooManyBoards { got: usize, max: usize },
    #[error("page limit must be between 1 and {max}, got {got}")]
    InvalidLimit { got: usize, max: usize },
    #[error("board id must be non-empty")]
    EmptyBoardId,
}

/// A board as known to the pipeline. Only `id` is guaranteed; the rest may be
/// missing when the board came from an explicit id list or an old ledger line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardRef {
    pub id: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub name: String,
    pub owner_name: Option<String>,
}

impl BoardRef {
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            modified_at: None,
            name: String::new(),
            owner_name: None,
        }
    }
}

/// Ordered group of boards submitted as one export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardBatch {
    boards: Vec<BoardRef>,
}

impl BoardBatch {
    /// Build a batch, dropping repeated ids (first occurrence wins).
    pub fn new(boards: Vec<BoardRef>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(boards.len());
        let mut unique = Vec::with_capacity(boards.len());
        for board in boards {
            if board.id.trim().is_empty() {
                return Err(ValidationError::EmptyBoardId);
            }
            if seen.insert(board.id.clone()) {
                unique.push(board);
            }
        }
        if unique.len() > MAX_BOARDS_PER_JOB {
            return Err(ValidationError::TooManyBoards {
                got: unique.len(),
                max: MAX_BOARDS_PER_JOB,
            });
        }
        Ok(Self { boards: unique })
    }

    pub fn from_ids<I, S>(ids: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(BoardRef::bare).collect())
    }

    pub fn boards(&self) -> &[BoardRef] {
        &self.boards
    }

    pub fn board_ids(&self) -> Vec<String> {
        self.boards.iter().map(|b| b.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&BoardRef> {
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}

/// A remote export job created for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub job_id: String,
    pub request_id: Uuid,
    pub board_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Finished)
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CREATED" | "PENDING" => JobStatus::Pending,
            "IN_PROGRESS" | "RUNNING" => JobStatus::Running,
            "FINISHED" => JobStatus::Finished,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
            _ => JobStatus::Other(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStatus {
    Success,
    Failure,
}

/// Per-board entry of an export job's result manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub board_id: String,
    pub status: ExportStatus,
    #[serde(default)]
    pub export_link: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    Success,
    Failure,
    Abandoned,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "SUCCESS",
            RecordStatus::Failure => "FAILURE",
            RecordStatus::Abandoned => "ABANDONED",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(RecordStatus::Success),
            "FAILURE" => Ok(RecordStatus::Failure),
            "ABANDONED" => Ok(RecordStatus::Abandoned),
            other => Err(format!("unknown record status '{other}'")),
        }
    }
}

/// One line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub board_id: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub name: String,
    pub owner_name: Option<String>,
    pub status: RecordStatus,
}

impl LedgerRecord {
    pub fn for_board(board: &BoardRef, status: RecordStatus) -> Self {
        Self {
            board_id: board.id.clone(),
            modified_at: board.modified_at,
            name: board.name.clone(),
            owner_name: board.owner_name.clone(),
            status,
        }
    }

    pub fn to_board(&self) -> BoardRef {
        BoardRef {
            id: self.board_id.clone(),
            modified_at: self.modified_at,
            name: self.name.clone(),
            owner_name: self.owner_name.clone(),
        }
    }
}
