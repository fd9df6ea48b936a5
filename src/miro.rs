use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::model::{BoardRef, ExportResult, JobStatus};
use crate::retry::IsTransient;

pub const MIRO_API_BASE: &str = "https://api.miro.com/";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("miro returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("export job not finished: {0}")]
    JobNotFinished(JobStatus),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl IsTransient for ApiError {
    fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => !e.is_builder(),
            ApiError::Status { .. } | ApiError::JobNotFinished(_) => true,
            ApiError::InvalidUrl(_) | ApiError::Decode(_) => false,
        }
    }
}

/// One page of the board listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardPage {
    pub total: usize,
    pub boards: Vec<BoardRef>,
}

/// Body chunks of a downloaded artifact.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// The remote operations the export pipeline needs.
#[async_trait]
pub trait BoardExportApi: Send + Sync {
    async fn list_boards(&self, offset: usize, limit: usize) -> Result<BoardPage, ApiError>;

    async fn create_export(
        &self,
        org_id: &str,
        request_id: Uuid,
        board_ids: &[String],
    ) -> Result<String, ApiError>;

    async fn export_status(&self, org_id: &str, job_id: &str) -> Result<JobStatus, ApiError>;

    async fn export_results(&self, org_id: &str, job_id: &str)
        -> Result<Vec<ExportResult>, ApiError>;

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError>;
}

#[derive(Clone)]
pub struct MiroClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for MiroClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiroClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MiroClient {
    pub fn new(token: String) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(MIRO_API_BASE).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Self::with_base_url(token, base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("miro-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let res = builder.send().await?;
        let status = res.status();
        debug!(url = %res.url(), %status, "miro response");
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Deserialize)]
struct BoardsResponse {
    total: usize,
    #[serde(default)]
    data: Vec<BoardItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    owner: Option<Owner>,
}

#[derive(Deserialize)]
struct Owner {
    #[serde(default)]
    name: Option<String>,
}

impl From<BoardItem> for BoardRef {
    fn from(item: BoardItem) -> Self {
        BoardRef {
            id: item.id,
            modified_at: item.modified_at,
            name: item.name,
            owner_name: item.owner.and_then(|o| o.name),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportRequest<'a> {
    board_ids: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportResponse {
    job_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportStatusResponse {
    job_status: JobStatus,
}

#[derive(Deserialize)]
struct ExportResultsResponse {
    #[serde(default)]
    results: Vec<ExportResult>,
}

#[async_trait]
impl BoardExportApi for MiroClient {
    async fn list_boards(&self, offset: usize, limit: usize) -> Result<BoardPage, ApiError> {
        let url = self.endpoint("v2/boards")?;
        let req = self.request(Method::GET, url).query(&[
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        let body: BoardsResponse = self.send_json(req).await?;
        Ok(BoardPage {
            total: body.total,
            boards: body.data.into_iter().map(BoardRef::from).collect(),
        })
    }

    async fn create_export(
        &self,
        org_id: &str,
        request_id: Uuid,
        board_ids: &[String],
    ) -> Result<String, ApiError> {
        let url = self.endpoint(&format!("v2/orgs/{org_id}/boards/export/jobs"))?;
        let req = self
            .request(Method::POST, url)
            .query(&[("request_id", request_id.to_string())])
            .json(&CreateExportRequest { board_ids });
        let body: CreateExportResponse = self.send_json(req).await?;
        Ok(body.job_id)
    }

    async fn export_status(&self, org_id: &str, job_id: &str) -> Result<JobStatus, ApiError> {
        let url = self.endpoint(&format!("v2/orgs/{org_id}/boards/export/jobs/{job_id}"))?;
        let body: ExportStatusResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(body.job_status)
    }

    async fn export_results(
        &self,
        org_id: &str,
        job_id: &str,
    ) -> Result<Vec<ExportResult>, ApiError> {
        let url = self.endpoint(&format!(
            "v2/orgs/{org_id}/boards/export/jobs/{job_id}/results"
        ))?;
        let body: ExportResultsResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(body.results)
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError> {
        let url = Url::parse(url).map_err(|e| ApiError::InvalidUrl(format!("{url}: {e}")))?;
        // Export links are pre-signed; the bearer token must not be sent along.
        let res = self.http.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(res.bytes_stream().map_err(ApiError::from).boxed())
    }
}
