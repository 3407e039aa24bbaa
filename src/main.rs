use std::process::ExitCode;

use support_router::config::{RouterConfig, mask_secret};
use support_router::mailbox::ImapMailbox;
use support_router::router::{IssueRouter, MessageOutcome, Placement, RunReport};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match RouterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Required: EMAIL, EMAIL_PASSWORD, IMAP_SERVER, GITHUB_TOKEN, ZENHUB_API_KEY,");
            eprintln!("            WEB_REPO_ID, ZEN_WEB, MOBILE2_REPO_ID, ZEN_MOBILE");
            return Ok(ExitCode::FAILURE);
        }
    };

    eprintln!("📬 Support Router v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {}@{}:{} ({})",
        config.mailbox.username,
        config.mailbox.host,
        config.mailbox.port,
        config.mailbox.mailbox_name()
    );
    eprintln!("   GitHub: {} (token {})", config.github.api_url, mask_secret(&config.github.token));
    eprintln!(
        "   ZenHub: {} (key {})",
        config.zenhub.graphql_url,
        mask_secret(&config.zenhub.api_key)
    );
    for target in &config.routing.targets {
        eprintln!(
            "   {} -> {} (workspace {})",
            target.name, target.repository_id, target.workspace_id
        );
    }
    eprintln!(
        "   Pipeline: {} ({})\n",
        config.routing.pipeline_name, config.routing.pipeline_position
    );

    let router = IssueRouter::from_config(&config)?;
    let mut mailbox = ImapMailbox::new(config.mailbox);

    match router.run(&mut mailbox).await {
        Ok(report) => {
            print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_report(report: &RunReport) {
    for message in &report.messages {
        let subject = message.subject.as_deref().unwrap_or("-");
        let detail = match &message.outcome {
            MessageOutcome::FetchFailed(e) => format!("fetch failed: {e}"),
            MessageOutcome::Skipped(reason) => format!("skipped ({})", reason.label()),
            MessageOutcome::CreateFailed { target, error } if error.issue_exists() => {
                format!("{}: created, not placed: {error}", target.name)
            }
            MessageOutcome::CreateFailed { target, error } => {
                format!("{}: create failed: {error}", target.name)
            }
            MessageOutcome::Created {
                target,
                issue,
                placement,
            } => match placement {
                Placement::Placed { .. } => format!("{}: #{} {}", target.name, issue.issue_number, issue.url),
                Placement::Failed(e) => format!(
                    "{}: #{} {} (not placed: {e})",
                    target.name, issue.issue_number, issue.url
                ),
            },
        };
        println!("[{}] {subject} -> {detail}", message.message_id);
    }

    println!(
        "\n{} messages: {} created, {} placed, {} skipped, {} failed",
        report.messages.len(),
        report.created(),
        report.placed(),
        report.skipped(),
        report.failed()
    );
}
