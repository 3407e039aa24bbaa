//! Repository issue client: creates and looks up GitHub issues over REST.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::RepositoryTarget;
use crate::config::GitHubConfig;
use crate::error::{ConfigError, IssueError};

/// A freshly created (or looked up) remote issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub issue_number: u64,
    pub url: String,
}

/// Issue repository seam.
///
/// `create_issue` is not idempotent: every call creates a new issue.
#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Create an issue in the target's repository. Only `201 Created`
    /// counts as success.
    async fn create_issue(
        &self,
        target: &RepositoryTarget,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, IssueError>;

    /// Look up an existing issue by number.
    async fn get_issue(
        &self,
        repository_id: &str,
        issue_number: u64,
    ) -> Result<CreatedIssue, IssueError>;

    /// Resolve an `owner/name` repository path to its numeric id.
    async fn resolve_repository_id(&self, repository_id: &str) -> Result<u64, IssueError>;
}

#[derive(Debug, Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
}

impl From<IssueResponse> for CreatedIssue {
    fn from(resp: IssueResponse) -> Self {
        Self {
            issue_number: resp.number,
            url: resp.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    id: u64,
}

/// GitHub REST client.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: SecretString,
}

impl GitHubClient {
    /// Create a client. Every request is bounded by `config.timeout`.
    pub fn new(config: &GitHubConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static(concat!(
                        "support-router/",
                        env!("CARGO_PKG_VERSION")
                    )),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn repo_url(&self, repository_id: &str) -> String {
        format!(
            "{}/repos/{}",
            self.api_url,
            repository_id.trim_matches('/')
        )
    }

    /// GET a JSON document, mapping every failure to `RemoteQueryFailure`.
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, IssueError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| IssueError::RemoteQueryFailure {
                status: None,
                body: e.to_string(),
            })?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| IssueError::InvalidResponse(e.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IssueError::RemoteQueryFailure {
                    status: Some(status.as_u16()),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl IssueRepository for GitHubClient {
    async fn create_issue(
        &self,
        target: &RepositoryTarget,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, IssueError> {
        let url = format!("{}/issues", self.repo_url(&target.repository_id));

        info!(repo = %target.repository_id, title = %title, "Creating GitHub issue");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .json(&CreateIssueRequest { title, body })
            .send()
            .await
            .map_err(|e| IssueError::RemoteCreateFailure {
                status: None,
                body: e.to_string(),
            })?;

        match response.status() {
            StatusCode::CREATED => {
                let issue: IssueResponse = response.json().await.map_err(|e| {
                    warn!(repo = %target.repository_id, error = %e, "GitHub issue created, number unknown");
                    IssueError::CreatedWithoutNumber(e.to_string())
                })?;
                info!(number = issue.number, url = %issue.html_url, "GitHub issue created");
                Ok(issue.into())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IssueError::RemoteCreateFailure {
                    status: Some(status.as_u16()),
                    body,
                })
            }
        }
    }

    async fn get_issue(
        &self,
        repository_id: &str,
        issue_number: u64,
    ) -> Result<CreatedIssue, IssueError> {
        let url = format!("{}/issues/{issue_number}", self.repo_url(repository_id));
        debug!(repo = %repository_id, number = issue_number, "Fetching GitHub issue");
        let issue: IssueResponse = self.get_json(&url).await?;
        Ok(issue.into())
    }

    async fn resolve_repository_id(&self, repository_id: &str) -> Result<u64, IssueError> {
        let url = self.repo_url(repository_id);
        let repo: RepositoryResponse = self.get_json(&url).await?;
        debug!(repo = %repository_id, id = repo.id, "Resolved repository id");
        Ok(repo.id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn client(api_url: &str) -> GitHubClient {
        GitHubClient::new(&GitHubConfig {
            api_url: api_url.into(),
            token: SecretString::from("test-token"),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn repo_url_trims_slashes() {
        let gh = client("https://api.github.com/");
        assert_eq!(
            gh.repo_url("/acme/web/"),
            "https://api.github.com/repos/acme/web"
        );
    }

    #[test]
    fn create_request_serializes_title_and_body() {
        let json = serde_json::to_value(CreateIssueRequest {
            title: "ISSUE: WEB login broken",
            body: "Users cannot log in.",
        })
        .unwrap();
        assert_eq!(json["title"], "ISSUE: WEB login broken");
        assert_eq!(json["body"], "Users cannot log in.");
    }

    #[test]
    fn issue_response_ignores_extra_fields() {
        let json = r#"{
            "id": 1,
            "number": 42,
            "html_url": "https://github.com/acme/web/issues/42",
            "state": "open"
        }"#;
        let resp: IssueResponse = serde_json::from_str(json).unwrap();
        let issue = CreatedIssue::from(resp);
        assert_eq!(issue.issue_number, 42);
        assert!(issue.url.ends_with("/issues/42"));
    }
}
