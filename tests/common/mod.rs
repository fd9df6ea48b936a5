#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use miro_backup::config::{Config, Retry};
use miro_backup::miro::{ApiError, BoardExportApi, BoardPage, ByteStream};
use miro_backup::model::{BoardRef, ExportResult, ExportStatus, JobStatus};
use miro_backup::retry::RetryPolicy;
use reqwest::StatusCode;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn unavailable() -> ApiError {
    ApiError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "try again later".into(),
    }
}

pub fn board(id: &str) -> BoardRef {
    BoardRef {
        id: id.into(),
        modified_at: Some("2024-02-10T12:00:00Z".parse().unwrap()),
        name: format!("Board {id}"),
        owner_name: Some("Ada".into()),
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.miro.org_id = "org-1".into();
    cfg.miro.token = "token".into();
    cfg.app.data_dir = data_dir.to_string_lossy().to_string();
    cfg.retry = Retry {
        list_boards: RetryPolicy::fixed(1, 3),
        create_export: RetryPolicy::fixed(1, 3),
        export_status: RetryPolicy::fixed(10, 3),
        export_results: RetryPolicy::fixed(1, 3),
        download: RetryPolicy::fixed(1, 2),
    };
    cfg
}

#[derive(Debug, Clone)]
pub struct CreateCall {
    pub request_id: Uuid,
    pub board_ids: Vec<String>,
}

/// In-memory stand-in for the Miro API. Queued responses are consumed first;
/// once a queue is empty the call succeeds.
#[derive(Clone, Default)]
pub struct RecordingMiro {
    catalogue: Arc<Vec<BoardRef>>,
    failing_boards: Arc<HashSet<String>>,
    create_responses: Arc<Mutex<VecDeque<Result<String, ApiError>>>>,
    status_responses: Arc<Mutex<VecDeque<Result<JobStatus, ApiError>>>>,
    results_errors: Arc<Mutex<VecDeque<ApiError>>>,
    list_calls: Arc<Mutex<Vec<(usize, usize)>>>,
    create_calls: Arc<Mutex<Vec<CreateCall>>>,
    jobs: Arc<Mutex<Vec<Vec<String>>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
    results_calls: Arc<Mutex<Vec<String>>>,
    download_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingMiro {
    pub fn with_boards(ids: &[&str]) -> Self {
        Self {
            catalogue: Arc::new(ids.iter().map(|id| board(id)).collect()),
            ..Default::default()
        }
    }

    pub fn failing_exports(mut self, ids: &[&str]) -> Self {
        self.failing_boards = Arc::new(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_create_responses(self, responses: Vec<Result<String, ApiError>>) -> Self {
        Self {
            create_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..self
        }
    }

    pub fn with_status_responses(self, responses: Vec<Result<JobStatus, ApiError>>) -> Self {
        Self {
            status_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..self
        }
    }

    pub fn with_results_errors(self, errors: Vec<ApiError>) -> Self {
        Self {
            results_errors: Arc::new(Mutex::new(VecDeque::from(errors))),
            ..self
        }
    }

    pub async fn list_calls(&self) -> Vec<(usize, usize)> {
        self.list_calls.lock().await.clone()
    }

    pub async fn create_calls(&self) -> Vec<CreateCall> {
        self.create_calls.lock().await.clone()
    }

    pub async fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().await.clone()
    }

    pub async fn results_calls(&self) -> Vec<String> {
        self.results_calls.lock().await.clone()
    }

    pub async fn download_calls(&self) -> Vec<String> {
        self.download_calls.lock().await.clone()
    }

    pub async fn total_calls(&self) -> usize {
        self.list_calls().await.len()
            + self.create_calls().await.len()
            + self.status_calls().await.len()
            + self.results_calls().await.len()
            + self.download_calls().await.len()
    }

    /// Board ids submitted with a job id of the form `job-<n>`.
    async fn job_boards(&self, job_id: &str) -> Vec<String> {
        let index: usize = job_id
            .strip_prefix("job-")
            .and_then(|n| n.parse().ok())
            .expect("job id issued by this mock");
        self.jobs.lock().await[index - 1].clone()
    }
}

pub fn artifact_body(url: &str) -> Vec<u8> {
    format!("zip:{url}").into_bytes()
}

#[async_trait]
impl BoardExportApi for RecordingMiro {
    async fn list_boards(&self, offset: usize, limit: usize) -> Result<BoardPage, ApiError> {
        self.list_calls.lock().await.push((offset, limit));
        Ok(BoardPage {
            total: self.catalogue.len(),
            boards: self.catalogue.iter().skip(offset).take(limit).cloned().collect(),
        })
    }

    async fn create_export(
        &self,
        _org_id: &str,
        request_id: Uuid,
        board_ids: &[String],
    ) -> Result<String, ApiError> {
        self.create_calls.lock().await.push(CreateCall {
            request_id,
            board_ids: board_ids.to_vec(),
        });
        let queued = self.create_responses.lock().await.pop_front();
        if let Some(Err(err)) = queued {
            return Err(err);
        }
        let mut jobs = self.jobs.lock().await;
        jobs.push(board_ids.to_vec());
        Ok(format!("job-{}", jobs.len()))
    }

    async fn export_status(&self, _org_id: &str, job_id: &str) -> Result<JobStatus, ApiError> {
        self.status_calls.lock().await.push(job_id.to_string());
        self.status_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(JobStatus::Finished))
    }

    async fn export_results(
        &self,
        _org_id: &str,
        job_id: &str,
    ) -> Result<Vec<ExportResult>, ApiError> {
        self.results_calls.lock().await.push(job_id.to_string());
        if let Some(err) = self.results_errors.lock().await.pop_front() {
            return Err(err);
        }
        Ok(self
            .job_boards(job_id)
            .await
            .into_iter()
            .map(|id| {
                if self.failing_boards.contains(&id) {
                    ExportResult {
                        board_id: id,
                        status: ExportStatus::Failure,
                        export_link: None,
                        error_message: Some("export failed".into()),
                    }
                } else {
                    ExportResult {
                        export_link: Some(format!("https://files.example/{id}.zip")),
                        board_id: id,
                        status: ExportStatus::Success,
                        error_message: None,
                    }
                }
            })
            .collect())
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError> {
        self.download_calls.lock().await.push(url.to_string());
        let mut body = Bytes::from(artifact_body(url));
        let head = body.split_to(body.len() / 2);
        let chunks: Vec<Result<Bytes, ApiError>> = vec![Ok(head), Ok(body)];
        Ok(futures::stream::iter(chunks).boxed())
    }
}
