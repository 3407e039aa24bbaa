//! Workspace pipeline resolver: ZenHub GraphQL queries and the issue move
//! mutation.
//!
//! Nothing here is cached. Every lookup goes back to the service so a
//! renamed or recreated pipeline is picked up on the next call.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ZenHubConfig;
use crate::error::{ConfigError, WorkspaceError};

const WORKSPACES_QUERY: &str = r#"
query RepositoryWorkspaces($repositoryId: ID!) {
  repositoryById(id: $repositoryId) {
    workspaces {
      nodes {
        id
        name
      }
    }
  }
}
"#;

const PIPELINES_QUERY: &str = r#"
query WorkspacePipelines($workspaceId: ID!) {
  workspace(id: $workspaceId) {
    pipelinesConnection {
      nodes {
        id
        name
      }
    }
  }
}
"#;

const MOVE_ISSUE_MUTATION: &str = r#"
mutation MoveIssueToPipeline($issueId: ID!, $pipelineId: ID!, $position: String!) {
  moveIssueToPipeline(input: {issueId: $issueId, pipelineId: $pipelineId, position: $position}) {
    issue {
      id
      title
    }
  }
}
"#;

/// A named queue within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
}

/// A workspace linked to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

/// Workspace service seam (one method per GraphQL document).
#[async_trait]
pub trait WorkspaceService: Send + Sync {
    /// Workspaces linked to a repository.
    async fn list_workspaces(&self, repository_id: &str) -> Result<Vec<Workspace>, WorkspaceError>;

    /// Pipelines of a workspace, in board order.
    async fn list_pipelines(&self, workspace_id: &str) -> Result<Vec<Pipeline>, WorkspaceError>;

    /// Move an issue into a pipeline at `position` ("top" / "bottom").
    async fn move_issue(
        &self,
        issue_number: u64,
        pipeline_id: &str,
        position: &str,
    ) -> Result<(), WorkspaceError>;
}

// ── GraphQL wire types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspacesData {
    repository_by_id: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    workspaces: Nodes<Workspace>,
}

#[derive(Debug, Deserialize)]
struct PipelinesData {
    workspace: Option<WorkspaceNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceNode {
    pipelines_connection: Nodes<Pipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveIssueData {
    move_issue_to_pipeline: Option<serde_json::Value>,
}

// ── Client ──────────────────────────────────────────────────────────

/// ZenHub GraphQL client.
pub struct ZenHubClient {
    client: Client,
    graphql_url: String,
    api_key: SecretString,
}

impl ZenHubClient {
    /// Create a client. Every request is bounded by `config.timeout`.
    pub fn new(config: &ZenHubConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            graphql_url: config.graphql_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Execute a GraphQL document.
    ///
    /// Transport errors, non-200 statuses, top-level `errors` and a missing
    /// `data` object are all `RemoteQueryFailure`.
    async fn graphql<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, WorkspaceError> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        let response = self
            .client
            .post(&self.graphql_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkspaceError::query(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkspaceError::RemoteQueryFailure {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let result: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| WorkspaceError::query(format!("invalid GraphQL response: {e}")))?;

        if let Some(errors) = result.errors.filter(|errors| !errors.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(WorkspaceError::RemoteQueryFailure {
                status: Some(status.as_u16()),
                body: message,
            });
        }

        result
            .data
            .ok_or_else(|| WorkspaceError::query("no data in GraphQL response"))
    }
}

#[async_trait]
impl WorkspaceService for ZenHubClient {
    async fn list_workspaces(&self, repository_id: &str) -> Result<Vec<Workspace>, WorkspaceError> {
        let data: WorkspacesData = self
            .graphql(
                WORKSPACES_QUERY,
                serde_json::json!({ "repositoryId": repository_id }),
            )
            .await?;

        let workspaces = data
            .repository_by_id
            .map(|repo| repo.workspaces.nodes)
            .unwrap_or_default();
        debug!(repository_id, count = workspaces.len(), "Listed workspaces");
        Ok(workspaces)
    }

    async fn list_pipelines(&self, workspace_id: &str) -> Result<Vec<Pipeline>, WorkspaceError> {
        let data: PipelinesData = self
            .graphql(
                PIPELINES_QUERY,
                serde_json::json!({ "workspaceId": workspace_id }),
            )
            .await?;

        let workspace = data.workspace.ok_or_else(|| {
            WorkspaceError::query(format!("workspace {workspace_id} not found"))
        })?;
        Ok(workspace.pipelines_connection.nodes)
    }

    async fn move_issue(
        &self,
        issue_number: u64,
        pipeline_id: &str,
        position: &str,
    ) -> Result<(), WorkspaceError> {
        let data: MoveIssueData = self
            .graphql(
                MOVE_ISSUE_MUTATION,
                serde_json::json!({
                    "issueId": issue_number,
                    "pipelineId": pipeline_id,
                    "position": position,
                }),
            )
            .await?;

        match data.move_issue_to_pipeline {
            Some(payload) if !payload.is_null() => {
                info!(issue_number, pipeline_id, position, "Issue moved to pipeline");
                Ok(())
            }
            _ => Err(WorkspaceError::MoveRejected {
                issue_number,
                reason: "moveIssueToPipeline returned no payload".into(),
            }),
        }
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// Result of the diagnostic workspace check.
#[derive(Debug, Clone)]
pub struct WorkspaceCheck {
    /// Whether the configured workspace is linked to the repository.
    pub linked: bool,
    /// Every workspace the repository is linked to.
    pub workspaces: Vec<Workspace>,
}

/// Looks up pipelines by name on top of a [`WorkspaceService`].
#[derive(Clone)]
pub struct PipelineResolver {
    service: Arc<dyn WorkspaceService>,
}

impl PipelineResolver {
    pub fn new(service: Arc<dyn WorkspaceService>) -> Self {
        Self { service }
    }

    /// Find the id of the pipeline called `pipeline_name` (case-sensitive,
    /// exact) in `workspace_id`.
    ///
    /// `repository_id` only scopes the log line; the workspace id is enough
    /// to query the pipelines.
    pub async fn find_pipeline_id(
        &self,
        repository_id: &str,
        workspace_id: &str,
        pipeline_name: &str,
    ) -> Result<String, WorkspaceError> {
        debug!(repository_id, workspace_id, pipeline_name, "Resolving pipeline");

        let pipelines = self.service.list_pipelines(workspace_id).await?;

        pipelines
            .into_iter()
            .find(|p| p.name == pipeline_name)
            .map(|p| p.id)
            .ok_or_else(|| WorkspaceError::PipelineNotFound {
                name: pipeline_name.to_string(),
                workspace_id: workspace_id.to_string(),
            })
    }

    /// Move an issue into a resolved pipeline.
    pub async fn move_issue(
        &self,
        issue_number: u64,
        pipeline_id: &str,
        position: &str,
    ) -> Result<(), WorkspaceError> {
        self.service
            .move_issue(issue_number, pipeline_id, position)
            .await
    }

    /// Enumerate the workspaces linked to a repository and report whether
    /// `workspace_id` is among them. Not needed for a move to succeed.
    pub async fn verify_workspace(
        &self,
        repository_id: &str,
        workspace_id: &str,
    ) -> Result<WorkspaceCheck, WorkspaceError> {
        let workspaces = self.service.list_workspaces(repository_id).await?;
        let linked = workspaces.iter().any(|w| w.id == workspace_id);
        Ok(WorkspaceCheck { linked, workspaces })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Service returning a fixed pipeline list and counting queries.
    struct FixedPipelines {
        pipelines: Vec<Pipeline>,
        queries: Mutex<usize>,
    }

    impl FixedPipelines {
        fn new(names: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                pipelines: names
                    .iter()
                    .map(|(id, name)| Pipeline {
                        id: id.to_string(),
                        name: name.to_string(),
                    })
                    .collect(),
                queries: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkspaceService for FixedPipelines {
        async fn list_workspaces(&self, _repository_id: &str) -> Result<Vec<Workspace>, WorkspaceError> {
            Ok(vec![Workspace {
                id: "ws_web".into(),
                name: "Web".into(),
            }])
        }

        async fn list_pipelines(&self, _workspace_id: &str) -> Result<Vec<Pipeline>, WorkspaceError> {
            *self.queries.lock().unwrap() += 1;
            Ok(self.pipelines.clone())
        }

        async fn move_issue(&self, _: u64, _: &str, _: &str) -> Result<(), WorkspaceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn finds_exact_name() {
        let service = FixedPipelines::new(&[("ppl_0", "Icebox"), ("ppl_1", "New Issues")]);
        let resolver = PipelineResolver::new(service);
        let id = resolver
            .find_pipeline_id("acme/web", "ws_web", "New Issues")
            .await
            .unwrap();
        assert_eq!(id, "ppl_1");
    }

    #[tokio::test]
    async fn name_match_is_case_sensitive() {
        let service = FixedPipelines::new(&[("ppl_1", "new issues")]);
        let resolver = PipelineResolver::new(service);
        let err = resolver
            .find_pipeline_id("acme/web", "ws_web", "New Issues")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PipelineNotFound { .. }));
    }

    #[tokio::test]
    async fn first_of_duplicate_names_wins() {
        let service = FixedPipelines::new(&[("ppl_a", "New Issues"), ("ppl_b", "New Issues")]);
        let resolver = PipelineResolver::new(service);
        let id = resolver
            .find_pipeline_id("acme/web", "ws_web", "New Issues")
            .await
            .unwrap();
        assert_eq!(id, "ppl_a");
    }

    #[tokio::test]
    async fn every_lookup_requeries() {
        let service = FixedPipelines::new(&[("ppl_1", "New Issues")]);
        let resolver = PipelineResolver::new(service.clone());
        for _ in 0..3 {
            resolver
                .find_pipeline_id("acme/web", "ws_web", "New Issues")
                .await
                .unwrap();
        }
        assert_eq!(*service.queries.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn verify_workspace_reports_link() {
        let resolver = PipelineResolver::new(FixedPipelines::new(&[]));
        let check = resolver.verify_workspace("123", "ws_web").await.unwrap();
        assert!(check.linked);
        let check = resolver.verify_workspace("123", "ws_other").await.unwrap();
        assert!(!check.linked);
        assert_eq!(check.workspaces.len(), 1);
    }

    #[test]
    fn pipelines_payload_deserializes() {
        let json = r#"{
            "data": {
                "workspace": {
                    "pipelinesConnection": {
                        "nodes": [{"id": "ppl_1", "name": "New Issues"}]
                    }
                }
            }
        }"#;
        let resp: GraphQlResponse<PipelinesData> = serde_json::from_str(json).unwrap();
        let nodes = resp.data.unwrap().workspace.unwrap().pipelines_connection.nodes;
        assert_eq!(nodes[0].name, "New Issues");
    }

    #[test]
    fn null_repository_deserializes() {
        let json = r#"{"data": {"repositoryById": null}}"#;
        let resp: GraphQlResponse<WorkspacesData> = serde_json::from_str(json).unwrap();
        assert!(resp.data.unwrap().repository_by_id.is_none());
        assert!(resp.errors.is_none());
    }
}
