//! HTTP deployment backend client.
//!
//! This module provides the REST client for a release service exposing
//! install, update, delete and list operations plus chart resolution.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode as HttpStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ReleaseError, ReleaseResult};
use crate::resource::ChartRef;

use super::backend::{ChartResolver, DeploymentBackend};
use super::types::{
    DeleteOutcome, DeleteRequest, InstallRequest, ListFilter, ObservedRelease, PackagedChart,
    UpdateRequest,
};
use super::values::render_values;

/// Name of the repository used when a chart reference names none.
pub const STABLE_REPO_NAME: &str = "stable";

/// URL of the repository used when a chart reference names none.
pub const STABLE_REPO_URL: &str = "https://charts.helm.sh/stable";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP deployment backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Bearer token, if the service requires one.
    token: Option<String>,
}

/// Result envelope for mutating calls.
#[derive(Debug, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum ReleaseResponse {
    Installed { release: ObservedRelease },
    Updated { release: ObservedRelease },
    Deleted { release: ObservedRelease },
    NotFound { message: String },
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    releases: Vec<ObservedRelease>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallBody<'a> {
    name: &'a str,
    namespace: &'a str,
    chart: &'a PackagedChart,
    values: String,
    reuse_name: bool,
    wait: bool,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    chart: &'a PackagedChart,
    values: String,
    wait: bool,
    timeout_secs: u64,
}

impl HttpBackend {
    /// Creates a new backend client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<&str>) -> ReleaseResult<Self> {
        Self::with_timeout(base_url, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom request timeout.
    ///
    /// Install and update calls wait for the release, so the timeout must
    /// exceed the release timeout passed in requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> ReleaseResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReleaseError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Sends a request, mapping transport failures and 5xx answers to
    /// `BackendUnavailable`. 404 is handed back to the caller.
    async fn send(&self, builder: RequestBuilder) -> ReleaseResult<Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| ReleaseError::unavailable(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Backend answered {status}");

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::unavailable(format!("{status}: {body}")));
        }

        if !status.is_success() && status != HttpStatus::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::rejected(status.as_u16(), body));
        }

        Ok(response)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> ReleaseResult<T> {
        response.json().await.map_err(|e| ReleaseError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }

    async fn decode_mutation(response: Response) -> ReleaseResult<ReleaseResponse> {
        if response.status() == HttpStatus::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Ok(ReleaseResponse::NotFound { message: body });
        }
        Self::decode(response).await
    }
}

#[async_trait]
impl DeploymentBackend for HttpBackend {
    async fn list_releases(&self, filter: &ListFilter) -> ReleaseResult<Vec<ObservedRelease>> {
        let mut query: Vec<(&str, String)> = vec![("filter", filter.name.clone())];
        query.extend(filter.statuses.iter().map(|s| ("status", s.to_string())));

        debug!(release = %filter.name, "Listing releases");
        let response = self
            .send(self.client.get(self.url("/v1/releases")).query(&query))
            .await?;

        if response.status() == HttpStatus::NOT_FOUND {
            return Ok(Vec::new());
        }

        let list: ListResponse = Self::decode(response).await?;
        Ok(list.releases)
    }

    async fn install_release(&self, request: &InstallRequest) -> ReleaseResult<ObservedRelease> {
        let body = InstallBody {
            name: &request.name,
            namespace: &request.namespace,
            chart: &request.chart,
            values: render_values(&request.values)?,
            reuse_name: request.reuse_name,
            wait: request.wait,
            timeout_secs: request.timeout.as_secs(),
        };

        debug!(release = %request.name, chart = %request.chart.reference(), "Installing release");
        let response = self
            .send(self.client.post(self.url("/v1/releases")).json(&body))
            .await?;

        match Self::decode_mutation(response).await? {
            ReleaseResponse::Installed { release } => Ok(release),
            ReleaseResponse::Error { message } | ReleaseResponse::NotFound { message } => {
                Err(ReleaseError::rejected(422, message))
            }
            other => Err(unexpected("install", &other)),
        }
    }

    async fn update_release(&self, request: &UpdateRequest) -> ReleaseResult<ObservedRelease> {
        let body = UpdateBody {
            chart: &request.chart,
            values: render_values(&request.values)?,
            wait: request.wait,
            timeout_secs: request.timeout.as_secs(),
        };

        debug!(release = %request.name, chart = %request.chart.reference(), "Updating release");
        let response = self
            .send(
                self.client
                    .put(self.url(&format!("/v1/releases/{}", request.name)))
                    .json(&body),
            )
            .await?;

        match Self::decode_mutation(response).await? {
            ReleaseResponse::Updated { release } => Ok(release),
            ReleaseResponse::NotFound { message } => Err(ReleaseError::rejected(404, message)),
            ReleaseResponse::Error { message } => Err(ReleaseError::rejected(422, message)),
            other => Err(unexpected("update", &other)),
        }
    }

    async fn delete_release(&self, request: &DeleteRequest) -> ReleaseResult<DeleteOutcome> {
        let query = [
            ("purge", request.purge.to_string()),
            ("timeoutSecs", request.timeout.as_secs().to_string()),
        ];

        debug!(release = %request.name, purge = request.purge, "Deleting release");
        let response = self
            .send(
                self.client
                    .delete(self.url(&format!("/v1/releases/{}", request.name)))
                    .query(&query),
            )
            .await?;

        match Self::decode_mutation(response).await? {
            ReleaseResponse::Deleted { release } => Ok(DeleteOutcome::Deleted(release)),
            ReleaseResponse::NotFound { .. } => Ok(DeleteOutcome::NotFound),
            ReleaseResponse::Error { message } => Err(ReleaseError::rejected(422, message)),
            other => Err(unexpected("delete", &other)),
        }
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

#[async_trait]
impl ChartResolver for HttpBackend {
    async fn resolve(&self, chart: &ChartRef) -> ReleaseResult<PackagedChart> {
        let repo = match chart.repository_url() {
            "" => STABLE_REPO_URL,
            url => url,
        };
        let query = [
            ("name", chart.name.as_str()),
            ("version", chart.version()),
            ("repo", repo),
        ];

        debug!(chart = %chart.name, version = chart.version(), repo, "Resolving chart");
        let response = self
            .send(self.client.get(self.url("/v1/charts/resolve")).query(&query))
            .await?;

        if response.status() == HttpStatus::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::Resolution {
                chart: chart.name.clone(),
                version: if chart.version().is_empty() {
                    String::from("latest")
                } else {
                    chart.version().to_string()
                },
                repository: repo.to_string(),
                message: body,
            });
        }

        Self::decode(response).await
    }
}

fn unexpected(operation: &str, response: &ReleaseResponse) -> ReleaseError {
    ReleaseError::InvalidResponse {
        message: format!("Unexpected answer to {operation}: {response:?}"),
    }
}
