//! GitHub REST adapters for the registry and run-history ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::pipeline::{OwnerKind, RegistryTarget, RunHistoryTarget};
use gantry_core::ports::{ImageRegistry, RunHistory};
use gantry_core::records::{ImageRecord, RunRecord, RunRecordStatus};
use gantry_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variables searched, in order, for the API token.
pub const TOKEN_ENV: [&str; 2] = ["GANTRY_GITHUB_TOKEN", "GITHUB_TOKEN"];

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("GitHub returned {status}: {body}")]
    Api { status: u16, body: String },
}

impl GithubError {
    fn into_core(self, wrap: fn(String) -> Error) -> Error {
        match self {
            GithubError::Http(e) if e.is_connect() || e.is_timeout() => Error::Network(e.to_string()),
            other => wrap(other.to_string()),
        }
    }
}

fn http_client(timeout: Duration) -> std::result::Result<reqwest::Client, GithubError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(CONNECT_TIMEOUT))
        .build()?)
}

/// Thin authenticated client over the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> std::result::Result<Self, GithubError> {
        Ok(Self {
            base: DEFAULT_API.to_string(),
            token,
            http: http_client(DEFAULT_TIMEOUT)?,
        })
    }

    /// Token from `GANTRY_GITHUB_TOKEN` or `GITHUB_TOKEN`.
    pub fn from_env() -> std::result::Result<Self, GithubError> {
        let token = TOKEN_ENV
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|t| !t.is_empty()));
        Self::new(token)
    }

    /// Bound every request, connect included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> std::result::Result<Self, GithubError> {
        self.http = http_client(timeout)?;
        Ok(self)
    }

    pub fn with_base_url(mut self, base: &str) -> std::result::Result<Self, GithubError> {
        self.base = Url::parse(base)?.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> std::result::Result<Url, GithubError> {
        Ok(Url::parse(&format!("{}{}", self.base, path))?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "gantry")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> std::result::Result<reqwest::Response, GithubError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(GithubError::Api { status, body })
    }

    async fn get_page<T: DeserializeOwned>(&self, path: &str, page: usize) -> std::result::Result<T, GithubError> {
        let mut url = self.url(path)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());
        debug!(%url, "GET");
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, path: &str) -> std::result::Result<(), GithubError> {
        let url = self.url(path)?;
        debug!(%url, "DELETE");
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PackageVersion {
    id: u64,
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Option<PackageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    #[serde(default)]
    container: Option<ContainerMetadata>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

/// Container package versions on ghcr.io.
pub struct GithubPackageRegistry {
    client: GithubClient,
    target: RegistryTarget,
}

impl GithubPackageRegistry {
    pub fn new(client: GithubClient, target: RegistryTarget) -> Self {
        Self { client, target }
    }

    fn versions_path(&self) -> String {
        let scope = match self.target.owner_kind {
            OwnerKind::Org => "orgs",
            OwnerKind::User => "users",
        };
        format!(
            "/{}/{}/packages/container/{}/versions",
            scope, self.target.owner, self.target.package
        )
    }

    fn record(&self, version: PackageVersion) -> ImageRecord {
        let tag = version
            .metadata
            .and_then(|m| m.container)
            .and_then(|c| c.tags.into_iter().next());
        ImageRecord {
            id: version.id.to_string(),
            repository: format!("ghcr.io/{}/{}", self.target.owner, self.target.package),
            tag,
            digest: version.name,
            created_at: version.created_at,
        }
    }
}

#[async_trait]
impl ImageRegistry for GithubPackageRegistry {
    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let path = self.versions_path();
        let mut records = Vec::new();
        for page in 1.. {
            let versions: Vec<PackageVersion> = self
                .client
                .get_page(&path, page)
                .await
                .map_err(|e| e.into_core(Error::Registry))?;
            let last = versions.len() < PER_PAGE;
            records.extend(versions.into_iter().map(|v| self.record(v)));
            if last {
                break;
            }
        }
        debug!(count = records.len(), package = %self.target.package, "Listed package versions");
        Ok(records)
    }

    async fn delete_image(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("{}/{}", self.versions_path(), id))
            .await
            .map_err(|e| e.into_core(Error::Registry))
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRuns {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    status: Option<String>,
    conclusion: Option<String>,
    created_at: DateTime<Utc>,
}

impl WorkflowRun {
    fn status(&self) -> RunRecordStatus {
        match (self.status.as_deref(), self.conclusion.as_deref()) {
            (Some("completed"), Some("success")) => RunRecordStatus::Success,
            (Some("completed"), Some("failure" | "timed_out" | "startup_failure")) => RunRecordStatus::Failure,
            (Some("completed"), Some("cancelled")) => RunRecordStatus::Cancelled,
            (Some("completed"), Some("skipped" | "neutral")) => RunRecordStatus::Skipped,
            (Some("queued" | "waiting" | "pending" | "requested"), _) => RunRecordStatus::Queued,
            (Some("in_progress"), _) => RunRecordStatus::InProgress,
            _ => RunRecordStatus::Unknown,
        }
    }
}

/// Workflow runs of one GitHub Actions workflow.
pub struct GithubRunHistory {
    client: GithubClient,
    target: RunHistoryTarget,
}

impl GithubRunHistory {
    pub fn new(client: GithubClient, target: RunHistoryTarget) -> Self {
        Self { client, target }
    }
}

#[async_trait]
impl RunHistory for GithubRunHistory {
    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/runs",
            self.target.owner, self.target.repo, self.target.workflow
        );
        let mut records = Vec::new();
        for page in 1.. {
            let runs: WorkflowRuns = self
                .client
                .get_page(&path, page)
                .await
                .map_err(|e| e.into_core(Error::RunHistory))?;
            let last = runs.workflow_runs.len() < PER_PAGE;
            records.extend(runs.workflow_runs.into_iter().map(|run| RunRecord {
                id: run.id.to_string(),
                status: run.status(),
                created_at: run.created_at,
            }));
            if last {
                break;
            }
        }
        debug!(count = records.len(), workflow = %self.target.workflow, "Listed workflow runs");
        Ok(records)
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!(
                "/repos/{}/{}/actions/runs/{}",
                self.target.owner, self.target.repo, id
            ))
            .await
            .map_err(|e| e.into_core(Error::RunHistory))
    }
}
