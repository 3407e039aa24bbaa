//! Error types for the support router.

use std::fmt;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Message error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Issue repository error: {0}")]
    Issue(#[from] IssueError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Mailbox transport errors.
///
/// Only these are fatal for a run; everything after the fetch is
/// reported per message.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Mailbox login failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Failed to select mailbox {mailbox}: {reason}")]
    SelectFailed { mailbox: String, reason: String },

    #[error("Mailbox command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Mailbox is not open")]
    NotOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Issue repository errors.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// Issue creation returned anything other than 201, or never got a
    /// response (transport failure or timeout, `status == None`).
    #[error("Issue creation failed ({}): {body}", StatusLabel(.status))]
    RemoteCreateFailure { status: Option<u16>, body: String },

    #[error("Issue lookup failed ({}): {body}", StatusLabel(.status))]
    RemoteQueryFailure { status: Option<u16>, body: String },

    /// `201 Created` arrived but its body could not be read. The issue
    /// exists remotely; only its number is unknown.
    #[error("Issue was created but its number is unknown: {0}")]
    CreatedWithoutNumber(String),

    #[error("Unexpected response from issue repository: {0}")]
    InvalidResponse(String),
}

impl IssueError {
    /// Whether the remote issue exists despite the error.
    pub fn issue_exists(&self) -> bool {
        matches!(self, Self::CreatedWithoutNumber(_))
    }
}

/// Workspace / pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Workspace query failed ({}): {body}", StatusLabel(.status))]
    RemoteQueryFailure { status: Option<u16>, body: String },

    #[error("Pipeline '{name}' not found in workspace {workspace_id}")]
    PipelineNotFound { name: String, workspace_id: String },

    #[error("Move of issue #{issue_number} was rejected: {reason}")]
    MoveRejected { issue_number: u64, reason: String },
}

impl WorkspaceError {
    pub(crate) fn query(body: impl Into<String>) -> Self {
        Self::RemoteQueryFailure {
            status: None,
            body: body.into(),
        }
    }
}

/// Renders an optional HTTP status as `HTTP 422` or `no response`.
struct StatusLabel<'a>(&'a Option<u16>);

impl fmt::Display for StatusLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Some(code) => write!(f, "HTTP {code}"),
            None => f.write_str("no response"),
        }
    }
}

/// Result type alias for the router.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_failure_display_includes_status() {
        let err = IssueError::RemoteCreateFailure {
            status: Some(422),
            body: "Validation Failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Issue creation failed (HTTP 422): Validation Failed"
        );
    }

    #[test]
    fn create_failure_display_without_response() {
        let err = IssueError::RemoteCreateFailure {
            status: None,
            body: "operation timed out".into(),
        };
        assert!(err.to_string().contains("no response"));
    }

    #[test]
    fn pipeline_not_found_names_workspace() {
        let err = WorkspaceError::PipelineNotFound {
            name: "New Issues".into(),
            workspace_id: "ws_1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Pipeline 'New Issues' not found in workspace ws_1"
        );
    }

    #[test]
    fn created_without_number_means_issue_exists() {
        assert!(IssueError::CreatedWithoutNumber("eof".into()).issue_exists());
        assert!(
            !IssueError::RemoteCreateFailure {
                status: Some(500),
                body: String::new(),
            }
            .issue_exists()
        );
    }

    #[test]
    fn top_level_wraps_config_error() {
        let err: Error = ConfigError::MissingEnvVar("GITHUB_TOKEN".into()).into();
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }
}
