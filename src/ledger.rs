//! Append-only ledger of per-board export outcomes.
//!
//! One line per record: `board_id|modified_at|name|owner_name|status`.
//! `modified_at` is RFC 3339 or empty, `owner_name` is empty when unknown.
//! Inside a field `\` is written as `\\`, `|` as `\|`, and line breaks as
//! `\n` / `\r`, so every record stays on a single line.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::{LedgerRecord, RecordStatus};

const DELIMITER: char = '|';
const FIELD_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one record. The file handle lives only for the duration of the
    /// write and is held under the ledger's write lock.
    ///
    /// A previous run may have died halfway through a line; in that case the
    /// new record starts on a fresh line so only the cut record is lost.
    pub async fn append(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let line = format_record(record);
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        if ends_mid_line(&mut file).await.map_err(|e| self.io_err(e))? {
            warn!(path = %self.path.display(), "ledger ends with a partial record");
            file.write_all(b"\n").await.map_err(|e| self.io_err(e))?;
        }
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        file.flush().await.map_err(|e| self.io_err(e))?;
        debug!(board_id = %record.board_id, status = record.status.as_str(), "ledger record appended");
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, LedgerError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Number of non-empty lines, readable or not.
    pub async fn count(&self) -> Result<usize, LedgerError> {
        Ok(self.read_lines().await?.len())
    }

    /// Every record, failing on the first line that does not parse.
    pub async fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.read_lines()
            .await?
            .iter()
            .enumerate()
            .map(|(i, line)| parse_record(line, i + 1))
            .collect()
    }

    /// Records that parse; broken lines are logged and skipped. Resume and
    /// failure replay read through this so one damaged line cannot block them.
    pub async fn readable_records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut records = Vec::new();
        for (i, line) in self.read_lines().await?.iter().enumerate() {
            match parse_record(line, i + 1) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %self.path.display(), error = %err, "skipping ledger line"),
            }
        }
        Ok(records)
    }

    /// Distinct board ids with at least one readable record.
    pub async fn recorded_ids(&self) -> Result<HashSet<String>, LedgerError> {
        Ok(self
            .readable_records()
            .await?
            .into_iter()
            .map(|r| r.board_id)
            .collect())
    }
}

async fn ends_mid_line(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            DELIMITER => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Split on unescaped delimiters and unescape each field.
fn split_fields(line: &str, line_no: usize) -> Result<Vec<String>, LedgerError> {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some(DELIMITER) => current.push(DELIMITER),
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                other => {
                    return Err(LedgerError::Malformed {
                        line: line_no,
                        reason: format!("invalid escape sequence \\{}", other.unwrap_or(' ')),
                    })
                }
            },
            DELIMITER => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    Ok(fields)
}

pub fn format_record(record: &LedgerRecord) -> String {
    let modified_at = record
        .modified_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}\n",
        escape(&record.board_id),
        modified_at,
        escape(&record.name),
        escape(record.owner_name.as_deref().unwrap_or_default()),
        record.status.as_str()
    )
}

pub fn parse_record(line: &str, line_no: usize) -> Result<LedgerRecord, LedgerError> {
    let malformed = |reason: String| LedgerError::Malformed {
        line: line_no,
        reason,
    };
    let fields = split_fields(line, line_no)?;
    let [board_id, modified_at, name, owner_name, status]: [String; FIELD_COUNT] = fields
        .try_into()
        .map_err(|f: Vec<String>| malformed(format!("expected {FIELD_COUNT} fields, found {}", f.len())))?;

    if board_id.is_empty() {
        return Err(malformed("empty board id".into()));
    }
    let modified_at = if modified_at.is_empty() {
        None
    } else {
        Some(
            DateTime::parse_from_rfc3339(&modified_at)
                .map_err(|e| malformed(format!("bad timestamp '{modified_at}': {e}")))?
                .with_timezone(&Utc),
        )
    };
    let status = status.parse::<RecordStatus>().map_err(malformed)?;

    Ok(LedgerRecord {
        board_id,
        modified_at,
        name,
        owner_name: (!owner_name.is_empty()).then_some(owner_name),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn record(id: &str, status: RecordStatus) -> LedgerRecord {
        LedgerRecord {
            board_id: id.into(),
            modified_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()),
            name: format!("Board {id}"),
            owner_name: Some("Grace".into()),
            status,
        }
    }

    #[test]
    fn format_is_pipe_delimited() {
        let line = format_record(&record("uXj1", RecordStatus::Success));
        assert_eq!(line, "uXj1|2024-05-01T08:30:00+00:00|Board uXj1|Grace|SUCCESS\n");
    }

    #[test]
    fn delimiters_inside_names_are_escaped() {
        let mut rec = record("b1", RecordStatus::Failure);
        rec.name = "Q1 | Q2 \\ plans\nv2".into();
        rec.owner_name = None;
        rec.modified_at = None;

        let line = format_record(&rec);
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(line, "b1||Q1 \\| Q2 \\\\ plans\\nv2||FAILURE\n");
        assert_eq!(parse_record(line.trim_end_matches('\n'), 1).unwrap(), rec);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(
            parse_record("a|b|c", 3),
            Err(LedgerError::Malformed { line: 3, .. })
        ));
        assert!(matches!(
            parse_record("a||n||DONE", 1),
            Err(LedgerError::Malformed { .. })
        ));
        assert!(matches!(
            parse_record("a|yesterday|n||SUCCESS", 1),
            Err(LedgerError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_ledger() {
        let td = tempdir().unwrap();
        let ledger = Ledger::new(td.path().join("metadata.ledger"));
        assert_eq!(ledger.count().await.unwrap(), 0);
        assert!(ledger.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_only_grows_the_file() {
        let td = tempdir().unwrap();
        let ledger = Ledger::new(td.path().join("metadata.ledger"));

        ledger.append(&record("a", RecordStatus::Success)).await.unwrap();
        ledger.append(&record("b", RecordStatus::Failure)).await.unwrap();
        ledger.append(&record("a", RecordStatus::Success)).await.unwrap();

        assert_eq!(ledger.count().await.unwrap(), 3);
        let records = ledger.records().await.unwrap();
        assert_eq!(records[1], record("b", RecordStatus::Failure));
        let ids = ledger.recorded_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a") && ids.contains("b"));
    }

    #[tokio::test]
    async fn append_after_cut_record_starts_a_new_line() {
        let td = tempdir().unwrap();
        let path = td.path().join("metadata.ledger");
        let ledger = Ledger::new(&path);

        ledger.append(&record("a", RecordStatus::Success)).await.unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, b"b|2024-05-01T08:3").unwrap();
        drop(file);
        ledger.append(&record("c", RecordStatus::Failure)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with("|FAILURE\n"));
        assert!(matches!(
            ledger.records().await,
            Err(LedgerError::Malformed { line: 2, .. })
        ));

        let readable = ledger.readable_records().await.unwrap();
        assert_eq!(
            readable,
            vec![record("a", RecordStatus::Success), record("c", RecordStatus::Failure)]
        );
        let ids = ledger.recorded_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains("b"));
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let td = tempdir().unwrap();
        let ledger = std::sync::Arc::new(Ledger::new(td.path().join("metadata.ledger")));

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(&record(&format!("board-{i}"), RecordStatus::Success))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let records = ledger.records().await.unwrap();
        assert_eq!(records.len(), 20);
    }
}
