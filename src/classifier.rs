//! Issue classifier: decides whether a message is an issue report and
//! which repository/workspace pair it belongs to.
//!
//! Pure subject matching, no remote calls. Targets are an ordered list of
//! `(token, target)` pairs evaluated top to bottom; adding a system means
//! adding a row.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalizer::NormalizedMessage;

/// A (repository, workspace) pair a message can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    /// Short label and subject token, e.g. "WEB".
    pub name: String,
    /// Repository path used by the issue repository (`owner/name`).
    pub repository_id: String,
    /// Workspace holding the triage pipeline.
    pub workspace_id: String,
}

impl RepositoryTarget {
    pub fn new(
        name: impl Into<String>,
        repository_id: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            repository_id: repository_id.into(),
            workspace_id: workspace_id.into(),
        }
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No issue marker in the subject.
    NotIssue,
    /// Issue marker present but no known target token.
    UnknownTarget,
    /// Issue for the given target.
    Issue(RepositoryTarget),
}

impl Classification {
    pub fn is_issue(&self) -> bool {
        !matches!(self, Self::NotIssue)
    }

    pub fn target(&self) -> Option<&RepositoryTarget> {
        match self {
            Self::Issue(target) => Some(target),
            _ => None,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotIssue => "not_issue",
            Self::UnknownTarget => "unknown_target",
            Self::Issue(_) => "issue",
        }
    }
}

/// A subject token bound to a target.
#[derive(Debug, Clone)]
struct TargetRule {
    regex: Regex,
    target: RepositoryTarget,
}

/// Case-insensitive substring matcher over message subjects.
#[derive(Debug, Clone)]
pub struct IssueClassifier {
    marker: Regex,
    rules: Vec<TargetRule>,
}

impl IssueClassifier {
    /// Build a classifier; each target's `name` doubles as its subject token.
    pub fn new(issue_marker: &str, targets: &[RepositoryTarget]) -> Self {
        let rules = targets
            .iter()
            .map(|target| TargetRule {
                regex: token_regex(&target.name),
                target: target.clone(),
            })
            .collect();

        Self {
            marker: token_regex(issue_marker),
            rules,
        }
    }

    /// Classify a normalized message by its subject.
    pub fn classify(&self, message: &NormalizedMessage) -> Classification {
        let subject = &message.subject;

        if !self.marker.is_match(subject) {
            return Classification::NotIssue;
        }

        match self.rules.iter().find(|rule| rule.regex.is_match(subject)) {
            Some(rule) => {
                debug!(subject = %subject, target = %rule.target.name, "Subject matched target");
                Classification::Issue(rule.target.clone())
            }
            None => Classification::UnknownTarget,
        }
    }
}

/// Literal, case-insensitive token. Escaping makes construction infallible.
fn token_regex(token: &str) -> Regex {
    Regex::new(&format!("(?i){}", regex::escape(token))).expect("escaped literal is a valid regex")
}
