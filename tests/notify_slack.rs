// tests/notify_slack.rs
use chrono::{TimeZone, Utc};
use news_digest::{Item, Notifier, SlackNotifier};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn items() -> Vec<Item> {
    vec![
        Item::new(
            "openai",
            "OpenAI",
            "Older post",
            "https://openai.example/1",
            "first",
            Some(Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()),
        ),
        Item::new(
            "cohere",
            "Cohere",
            "Newer post",
            "https://cohere.example/2",
            "second",
            Some(Utc.with_ymd_and_hms(2025, 9, 5, 0, 0, 0).unwrap()),
        ),
    ]
}

fn notifier(server: &MockServer) -> SlackNotifier {
    SlackNotifier::new(format!("{}/hook", server.uri()))
        .with_timeout(Duration::from_secs(2))
        .with_title("Lab Watch")
}

#[tokio::test]
async fn digest_is_posted_as_block_kit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(notifier(&server).send_digest(&items()).await);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["text"], "Lab Watch: 2 new updates");

    let blocks = body["blocks"].as_array().unwrap();
    let header = blocks[0]["text"]["text"].as_str().unwrap();
    assert!(header.contains("Lab Watch - "));
    assert!(header.contains("2 new updates found"));
    // newest first: Cohere's group leads
    assert_eq!(blocks[2]["text"]["text"], "*Cohere* (1 update)");
    assert_eq!(blocks.last().unwrap()["type"], "context");
}

#[tokio::test]
async fn empty_digest_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert!(notifier(&server).send_digest(&[]).await);
}

#[tokio::test]
async fn webhook_errors_are_reported_as_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let n = notifier(&server).with_retries(2);
    assert!(!n.send_digest(&items()).await);
}

#[tokio::test]
async fn error_notification_carries_the_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(notifier(&server).send_error("state file <locked>").await);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let text = body["blocks"][0]["text"]["text"].as_str().unwrap();
    assert!(text.contains("News Digest Error"));
    assert!(text.contains("state file &lt;locked&gt;"));
}

#[tokio::test]
async fn unreachable_webhook_is_false_not_a_panic() {
    // nothing listens on the discard port
    let n = SlackNotifier::new("http://127.0.0.1:9/hook".to_string())
        .with_timeout(Duration::from_millis(500));
    assert!(!n.send_error("boom").await);
}
