//! Configuration types.
//!
//! Everything is read once at startup into an immutable [`RouterConfig`]
//! and handed to constructors. Nothing below reads the environment after
//! `from_env` returns.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::classifier::RepositoryTarget;
use crate::error::ConfigError;

/// Default GitHub REST base URL.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default ZenHub GraphQL endpoint.
pub const DEFAULT_ZENHUB_GRAPHQL_URL: &str = "https://api.zenhub.com/public/graphql";

/// Pipeline every new issue is moved into.
pub const DEFAULT_PIPELINE_NAME: &str = "New Issues";

/// Position within the pipeline.
pub const DEFAULT_PIPELINE_POSITION: &str = "top";

/// Subject marker that flags a message as an issue report.
pub const DEFAULT_ISSUE_MARKER: &str = "ISSUE";

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// IMAP mailbox settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Shared support mailbox name. `None` selects `INBOX`.
    pub support_mailbox: Option<String>,
    /// Socket read timeout.
    pub read_timeout: Duration,
}

impl MailboxConfig {
    /// Mailbox to `SELECT`: `user/<name>` for a shared mailbox, else `INBOX`.
    pub fn mailbox_name(&self) -> String {
        match &self.support_mailbox {
            Some(name) => format!("user/{name}"),
            None => "INBOX".to_string(),
        }
    }
}

/// GitHub REST settings.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

/// ZenHub GraphQL settings.
#[derive(Debug, Clone)]
pub struct ZenHubConfig {
    pub graphql_url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

/// Classification and placement rules.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Ordered target table; first match wins.
    pub targets: Vec<RepositoryTarget>,
    pub issue_marker: String,
    pub pipeline_name: String,
    pub pipeline_position: String,
    /// Enumerate each target's workspaces before routing (diagnostic only).
    pub verify_workspaces: bool,
}

impl RoutingConfig {
    /// Default marker, pipeline and position for the given targets.
    pub fn new(targets: Vec<RepositoryTarget>) -> Self {
        Self {
            targets,
            issue_marker: DEFAULT_ISSUE_MARKER.to_string(),
            pipeline_name: DEFAULT_PIPELINE_NAME.to_string(),
            pipeline_position: DEFAULT_PIPELINE_POSITION.to_string(),
            verify_workspaces: false,
        }
    }
}

/// Full router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mailbox: MailboxConfig,
    pub github: GitHubConfig,
    pub zenhub: ZenHubConfig,
    pub routing: RoutingConfig,
}

impl RouterConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let timeout = Duration::from_secs(parse_or(
            get("ROUTER_REQUEST_TIMEOUT_SECS"),
            "ROUTER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        let mailbox = MailboxConfig {
            host: require("IMAP_SERVER")?,
            port: parse_or(get("IMAP_PORT"), "IMAP_PORT", DEFAULT_IMAP_PORT)?,
            username: require("EMAIL")?,
            password: SecretString::from(require("EMAIL_PASSWORD")?),
            support_mailbox: get("SUPPORT_MAILBOX"),
            read_timeout: timeout,
        };

        let github = GitHubConfig {
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            token: SecretString::from(require("GITHUB_TOKEN")?),
            timeout,
        };

        let zenhub = ZenHubConfig {
            graphql_url: get("ZENHUB_GRAPHQL_URL")
                .unwrap_or_else(|| DEFAULT_ZENHUB_GRAPHQL_URL.to_string()),
            api_key: SecretString::from(require("ZENHUB_API_KEY")?),
            timeout,
        };

        // Order matters: a subject naming both systems routes to WEB.
        let targets = vec![
            RepositoryTarget::new("WEB", require("WEB_REPO_ID")?, require("ZEN_WEB")?),
            RepositoryTarget::new(
                "MOBILE",
                require("MOBILE2_REPO_ID")?,
                require("ZEN_MOBILE")?,
            ),
        ];

        let verify_workspaces = match get("ROUTER_VERIFY_WORKSPACES") {
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::InvalidValue {
                key: "ROUTER_VERIFY_WORKSPACES".into(),
                message: format!("expected true/false, got '{v}'"),
            })?,
            None => false,
        };

        let routing = RoutingConfig {
            pipeline_name: get("ROUTER_PIPELINE_NAME")
                .unwrap_or_else(|| DEFAULT_PIPELINE_NAME.to_string()),
            verify_workspaces,
            ..RoutingConfig::new(targets)
        };

        Ok(Self {
            mailbox,
            github,
            zenhub,
            routing,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Mask a secret for display: first and last four characters only.
pub fn mask_secret(secret: &SecretString) -> String {
    let chars: Vec<char> = secret.expose_secret().chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
