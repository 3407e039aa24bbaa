//! Issue router: drives each message through
//! normalize → classify → create issue → resolve pipeline → move.
//!
//! Messages are handled strictly one at a time in mailbox order. Every
//! failure stays local to its message; only mailbox open/list errors end a
//! run early.
//!
//! Issue creation and pipeline placement are separate steps with separate
//! results. A failed placement never touches the issue that was already
//! created, and nothing is retried within a run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classification, IssueClassifier, RepositoryTarget};
use crate::config::{RouterConfig, RoutingConfig};
use crate::error::{IssueError, MailboxError, WorkspaceError};
use crate::github::{CreatedIssue, GitHubClient, IssueRepository};
use crate::mailbox::{Mailbox, MessageId};
use crate::normalizer::{self, NormalizedMessage};
use crate::zenhub::{PipelineResolver, WorkspaceService, ZenHubClient};

// ── Outcomes ────────────────────────────────────────────────────────

/// Why a message produced no issue. Routine, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The raw message could not be normalized.
    Malformed(String),
    /// No issue marker in the subject.
    NotIssue,
    /// Issue marker present but no known target.
    UnknownTarget,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotIssue => "not_issue",
            Self::UnknownTarget => "unknown_target",
        }
    }
}

/// Result of the pipeline placement step for an already-created issue.
#[derive(Debug)]
pub enum Placement {
    Placed { pipeline_id: String },
    Failed(WorkspaceError),
}

impl Placement {
    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Placed { .. })
    }
}

/// Terminal state of one message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Fetching the raw message failed.
    FetchFailed(MailboxError),
    Skipped(SkipReason),
    /// No usable issue came back, so no placement was tried. See
    /// [`IssueError::issue_exists`] for a create whose response was lost.
    CreateFailed {
        target: RepositoryTarget,
        error: IssueError,
    },
    /// The issue exists; `placement` says whether it reached the pipeline.
    Created {
        target: RepositoryTarget,
        issue: CreatedIssue,
        placement: Placement,
    },
}

impl MessageOutcome {
    /// Short label for logging and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::FetchFailed(_) => "fetch_failed",
            Self::Skipped(_) => "skipped",
            Self::CreateFailed { error, .. } if error.issue_exists() => "created_number_unknown",
            Self::CreateFailed { .. } => "create_failed",
            Self::Created { placement, .. } if placement.is_placed() => "pipeline_placed",
            Self::Created { .. } => "pipeline_move_failed",
        }
    }

    pub fn created_issue(&self) -> Option<&CreatedIssue> {
        match self {
            Self::Created { issue, .. } => Some(issue),
            _ => None,
        }
    }
}

/// One processed message.
#[derive(Debug)]
pub struct MessageReport {
    pub message_id: MessageId,
    /// Decoded subject, when normalization got that far.
    pub subject: Option<String>,
    pub outcome: MessageOutcome,
}

/// Everything a run did, in fetch order.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub messages: Vec<MessageReport>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&MessageOutcome) -> bool) -> usize {
        self.messages.iter().filter(|m| pred(&m.outcome)).count()
    }

    /// Issues created, placed or not.
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Created { .. }))
    }

    pub fn placed(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Created { placement, .. } if placement.is_placed()))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Skipped(_)))
    }

    /// Messages that produced no issue because of an error.
    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                MessageOutcome::FetchFailed(_) | MessageOutcome::CreateFailed { .. }
            )
        })
    }

    /// Issues created but left outside the pipeline.
    pub fn placement_failed(&self) -> usize {
        self.created() - self.placed()
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Single-pass email-to-issue router.
pub struct IssueRouter {
    classifier: IssueClassifier,
    issues: Arc<dyn IssueRepository>,
    pipelines: PipelineResolver,
    routing: RoutingConfig,
}

impl IssueRouter {
    /// Create a router over explicit collaborators.
    pub fn new(
        routing: RoutingConfig,
        issues: Arc<dyn IssueRepository>,
        workspaces: Arc<dyn WorkspaceService>,
    ) -> Self {
        Self {
            classifier: IssueClassifier::new(&routing.issue_marker, &routing.targets),
            issues,
            pipelines: PipelineResolver::new(workspaces),
            routing,
        }
    }

    /// Create a router backed by the GitHub and ZenHub HTTP clients.
    pub fn from_config(config: &RouterConfig) -> crate::error::Result<Self> {
        let issues = Arc::new(GitHubClient::new(&config.github)?);
        let workspaces = Arc::new(ZenHubClient::new(&config.zenhub)?);
        Ok(Self::new(config.routing.clone(), issues, workspaces))
    }

    /// Drain the mailbox once.
    ///
    /// Returns `Err` only when the mailbox cannot be opened or listed.
    pub async fn run(&self, mailbox: &mut dyn Mailbox) -> Result<RunReport, MailboxError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        mailbox.open().await.inspect_err(|e| {
            error!(%run_id, error = %e, "Failed to open mailbox");
        })?;

        if self.routing.verify_workspaces {
            self.verify_targets().await;
        }

        let ids = match mailbox.list_message_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(%run_id, error = %e, "Failed to list messages");
                if let Err(close_err) = mailbox.close().await {
                    warn!(error = %close_err, "Failed to close mailbox");
                }
                return Err(e);
            }
        };

        info!(%run_id, mailbox = mailbox.name(), count = ids.len(), "Processing mailbox");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let report = match mailbox.fetch_raw(&id).await {
                Ok(raw) => self.process_message(id, &raw).await,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Failed to fetch message");
                    MessageReport {
                        message_id: id,
                        subject: None,
                        outcome: MessageOutcome::FetchFailed(e),
                    }
                }
            };
            messages.push(report);
        }

        if let Err(e) = mailbox.close().await {
            warn!(%run_id, error = %e, "Failed to close mailbox");
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            messages,
        };

        info!(
            %run_id,
            total = report.messages.len(),
            created = report.created(),
            placed = report.placed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Run complete"
        );

        Ok(report)
    }

    /// Process one raw message to a terminal outcome.
    pub async fn process_message(&self, message_id: MessageId, raw: &[u8]) -> MessageReport {
        let message = match normalizer::normalize(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Skipping malformed message");
                return MessageReport {
                    message_id,
                    subject: None,
                    outcome: MessageOutcome::Skipped(SkipReason::Malformed(e.to_string())),
                };
            }
        };

        let outcome = self.route(&message_id, &message).await;
        MessageReport {
            message_id,
            subject: Some(message.subject),
            outcome,
        }
    }

    /// Classify a normalized message and, for issues, create and place it.
    pub async fn route(&self, message_id: &MessageId, message: &NormalizedMessage) -> MessageOutcome {
        let classification = self.classifier.classify(message);
        debug!(
            message_id = %message_id,
            subject = %message.subject,
            classification = classification.label(),
            "Message classified"
        );

        let target = match classification {
            Classification::Issue(target) => target,
            Classification::NotIssue => return MessageOutcome::Skipped(SkipReason::NotIssue),
            Classification::UnknownTarget => {
                info!(
                    message_id = %message_id,
                    subject = %message.subject,
                    "Unknown issue type, skipping"
                );
                return MessageOutcome::Skipped(SkipReason::UnknownTarget);
            }
        };

        info!(
            message_id = %message_id,
            sender = %message.sender,
            target = %target.name,
            "Issue report received"
        );

        let issue = match self
            .issues
            .create_issue(&target, &message.subject, &message.body)
            .await
        {
            Ok(issue) => issue,
            Err(error) if error.issue_exists() => {
                warn!(
                    message_id = %message_id,
                    target = %target.name,
                    error = %error,
                    "Issue created but number unknown; not placed, do not resubmit"
                );
                return MessageOutcome::CreateFailed { target, error };
            }
            Err(error) => {
                warn!(
                    message_id = %message_id,
                    target = %target.name,
                    error = %error,
                    "Failed to create issue"
                );
                return MessageOutcome::CreateFailed { target, error };
            }
        };

        let placement = self.place(&target, &issue).await;
        match &placement {
            Placement::Placed { pipeline_id } => info!(
                message_id = %message_id,
                issue_number = issue.issue_number,
                pipeline_id = %pipeline_id,
                workspace_id = %target.workspace_id,
                "Issue placed in pipeline"
            ),
            Placement::Failed(e) => warn!(
                message_id = %message_id,
                issue_number = issue.issue_number,
                error = %e,
                "Issue created but not placed in pipeline"
            ),
        }

        MessageOutcome::Created {
            target,
            issue,
            placement,
        }
    }

    /// Resolve the pipeline fresh and move the issue into it.
    async fn place(&self, target: &RepositoryTarget, issue: &CreatedIssue) -> Placement {
        let pipeline_id = match self
            .pipelines
            .find_pipeline_id(
                &target.repository_id,
                &target.workspace_id,
                &self.routing.pipeline_name,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => return Placement::Failed(e),
        };

        match self
            .pipelines
            .move_issue(
                issue.issue_number,
                &pipeline_id,
                &self.routing.pipeline_position,
            )
            .await
        {
            Ok(()) => Placement::Placed { pipeline_id },
            Err(e) => Placement::Failed(e),
        }
    }

    /// Log which workspaces each target's repository is linked to.
    ///
    /// Diagnostic only; failures are warnings.
    pub async fn verify_targets(&self) {
        for target in &self.routing.targets {
            let repo_id = match self.issues.resolve_repository_id(&target.repository_id).await {
                Ok(id) => id.to_string(),
                Err(e) => {
                    warn!(target = %target.name, error = %e, "Could not resolve repository id");
                    continue;
                }
            };

            match self
                .pipelines
                .verify_workspace(&repo_id, &target.workspace_id)
                .await
            {
                Ok(check) => {
                    for ws in &check.workspaces {
                        debug!(target = %target.name, workspace = %ws.name, id = %ws.id, "Linked workspace");
                    }
                    if check.linked {
                        info!(target = %target.name, workspace_id = %target.workspace_id, "Workspace verified");
                    } else {
                        warn!(
                            target = %target.name,
                            workspace_id = %target.workspace_id,
                            linked = check.workspaces.len(),
                            "Configured workspace is not linked to the repository"
                        );
                    }
                }
                Err(e) => warn!(target = %target.name, error = %e, "Workspace check failed"),
            }
        }
    }
}
