use std::time::Duration;

use secrecy::SecretString;
use support_router::classifier::RepositoryTarget;
use support_router::config::GitHubConfig;
use support_router::error::IssueError;
use support_router::github::{GitHubClient, IssueRepository};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, timeout: Duration) -> GitHubClient {
    GitHubClient::new(&GitHubConfig {
        api_url: server.uri(),
        token: SecretString::from("gh-test-token"),
        timeout,
    })
    .unwrap()
}

fn web_target() -> RepositoryTarget {
    RepositoryTarget::new("WEB", "acme/web", "ws_web")
}

#[tokio::test]
async fn test_create_issue_returns_number_on_201() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues"))
        .and(header("authorization", "Bearer gh-test-token"))
        .and(body_json(serde_json::json!({
            "title": "ISSUE: WEB login broken",
            "body": "Users cannot log in."
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 9001,
            "number": 42,
            "html_url": "https://github.com/acme/web/issues/42",
            "title": "ISSUE: WEB login broken"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    let issue = gh
        .create_issue(&web_target(), "ISSUE: WEB login broken", "Users cannot log in.")
        .await
        .unwrap();

    assert_eq!(issue.issue_number, 42);
    assert_eq!(issue.url, "https://github.com/acme/web/issues/42");
}

#[tokio::test]
async fn test_create_issue_rejected_with_422() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Validation Failed"))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    let err = gh
        .create_issue(&web_target(), "ISSUE: WEB", "")
        .await
        .unwrap_err();

    match err {
        IssueError::RemoteCreateFailure { status, body } => {
            assert_eq!(status, Some(422));
            assert_eq!(body, "Validation Failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_create_issue_200_is_not_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": 42,
            "html_url": "https://github.com/acme/web/issues/42"
        })))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    let err = gh
        .create_issue(&web_target(), "ISSUE: WEB", "body")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IssueError::RemoteCreateFailure {
            status: Some(200),
            ..
        }
    ));
}

#[tokio::test]
async fn test_create_issue_timeout_has_no_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_millis(100));
    let err = gh
        .create_issue(&web_target(), "ISSUE: WEB", "body")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IssueError::RemoteCreateFailure { status: None, .. }
    ));
}

#[tokio::test]
async fn test_get_issue_after_create() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/issues/42"))
        .and(header("authorization", "Bearer gh-test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": 42,
            "html_url": "https://github.com/acme/web/issues/42",
            "state": "open"
        })))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    let issue = gh.get_issue("acme/web", 42).await.unwrap();
    assert_eq!(issue.issue_number, 42);

    let missing = gh.get_issue("acme/web", 7).await.unwrap_err();
    assert!(matches!(
        missing,
        IssueError::RemoteQueryFailure {
            status: Some(404),
            ..
        }
    ));
}

#[tokio::test]
async fn test_resolve_repository_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/mobile2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 123456789,
            "full_name": "acme/mobile2"
        })))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    assert_eq!(gh.resolve_repository_id("acme/mobile2").await.unwrap(), 123456789);
}

#[tokio::test]
async fn test_create_issue_unreadable_201_reports_existing_issue() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues"))
        .respond_with(ResponseTemplate::new(201).set_body_string("<html>gateway</html>"))
        .mount(&mock_server)
        .await;

    let gh = client(&mock_server, Duration::from_secs(5));
    let err = gh
        .create_issue(&web_target(), "ISSUE: WEB", "body")
        .await
        .unwrap_err();

    assert!(matches!(err, IssueError::CreatedWithoutNumber(_)));
    assert!(err.issue_exists());
}
