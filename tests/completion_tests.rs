//! Integration tests for completion processing
//!
//! A wiremock server plays the completion endpoint. Worker tests call the
//! endpoint directly; processor tests run whole request files through the
//! probe and the dispatcher.

use lit_harvest::completion::{
    process_requests, CompletionRequest, CompletionWorker, RequestMode, REMAINING_REQUESTS_HEADER,
    REMAINING_TOKENS_HEADER,
};
use lit_harvest::config::{
    CapacityConfig, CompletionConfig, Config, DispatchConfig, OutputConfig, ProbeConfig,
    UserAgentConfig,
};
use lit_harvest::dispatch::{Attempt, FailureKind, Worker};
use lit_harvest::output::replay::read_records;
use lit_harvest::state::{Capacity, WorkItem};
use lit_harvest::HarvestError;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

fn completion_config(server: &MockServer, api_key_env: &str) -> CompletionConfig {
    CompletionConfig {
        endpoint: format!("{}/v1/chat/completions", server.uri()),
        mode: RequestMode::Chat,
        api_key_env: api_key_env.to_string(),
        timeout_seconds: 5,
    }
}

/// Creates a test configuration writing everything under `dir`
fn create_test_config(dir: &Path, completion: CompletionConfig, probe_size: usize) -> Config {
    let file = |name: &str| dir.join(name).display().to_string();

    Config {
        dispatch: DispatchConfig {
            max_concurrent: 4,
            max_redo: 2,
            cooldown_seconds: 0.05,
            tick_millis: 5,
            request_timeout_seconds: 5,
        },
        capacity: CapacityConfig {
            requests_per_minute: 600.0,
            tokens_per_minute: Some(1_000_000.0),
        },
        probe: ProbeConfig {
            enabled: true,
            probe_size,
        },
        user_agent: user_agent(),
        output: OutputConfig {
            log_path: file("outcomes.jsonl"),
            escalation_path: file("escalations.jsonl"),
            database_path: file("ledger.db"),
            summary_path: file("summary.md"),
            articles_dir: file("articles"),
        },
        completion: Some(completion),
        sites: Vec::new(),
    }
}

fn chat_response(completion_tokens: u64) -> Value {
    json!({
        "id": "cmpl-1",
        "choices": [{"message": {"role": "assistant", "content": "ok"}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": completion_tokens}
    })
}

fn item(body: Value) -> WorkItem<CompletionRequest> {
    WorkItem::new(
        0,
        CompletionRequest::from_value(body).unwrap(),
        Capacity::single_request(10.0),
    )
}

fn chat_body(text: &str) -> Value {
    json!({"model": "m", "messages": [{"role": "user", "content": text}]})
}

fn write_requests_file(dir: &Path, count: usize) -> std::path::PathBuf {
    let input = dir.join("requests.jsonl");
    let lines: Vec<String> = (0..count)
        .map(|row| {
            let mut body = chat_body(&format!("question {}", row));
            body["metadata"] = json!({"row": row});
            body.to_string()
        })
        .collect();
    std::fs::write(&input, lines.join("\n")).unwrap();
    input
}

#[tokio::test]
async fn test_worker_reads_usage_and_quota_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response(30))
                .insert_header(REMAINING_REQUESTS_HEADER, "59")
                .insert_header(REMAINING_TOKENS_HEADER, "149000"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let worker =
        CompletionWorker::new(&completion_config(&server, "UNUSED"), &user_agent(), "secret")
            .unwrap();

    let output = match worker.run(&item(chat_body("hello"))).await {
        Attempt::Success(output) => output,
        other => panic!("expected success, got {:?}", other),
    };

    assert_eq!(output.prompt_tokens, 12.0);
    assert_eq!(output.completion_tokens, 30.0);
    assert_eq!(output.remaining, Some(Capacity::with_secondary(59.0, 149000.0)));

    let usage = worker.usage(&output).unwrap();
    assert_eq!(usage.completion, 30.0);
}

#[tokio::test]
async fn test_worker_classifies_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"message": "Rate limit reached for requests", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let worker =
        CompletionWorker::new(&completion_config(&server, "UNUSED"), &user_agent(), "k").unwrap();

    for _ in 0..2 {
        match worker.run(&item(chat_body("hi"))).await {
            Attempt::Failure(failure) => assert_eq!(failure.kind, FailureKind::Throttled),
            other => panic!("expected throttling, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_worker_classifies_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bad-gateway"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/invalid"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Unknown model"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let cases = [
        ("/bad-gateway", FailureKind::Status(502)),
        ("/invalid", FailureKind::Status(400)),
        ("/garbled", FailureKind::Validation),
    ];

    for (route, expected) in cases {
        let mut config = completion_config(&server, "UNUSED");
        config.endpoint = format!("{}{}", server.uri(), route);
        let worker = CompletionWorker::new(&config, &user_agent(), "k").unwrap();

        match worker.run(&item(chat_body("hi"))).await {
            Attempt::Failure(failure) => assert_eq!(failure.kind, expected, "{}", route),
            other => panic!("{}: expected failure, got {:?}", route, other),
        }
    }
}

#[tokio::test]
async fn test_metadata_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(1)))
        .mount(&server)
        .await;

    let worker =
        CompletionWorker::new(&completion_config(&server, "UNUSED"), &user_agent(), "k").unwrap();
    let mut body = chat_body("hi");
    body["metadata"] = json!({"row": 3});
    assert!(worker.run(&item(body)).await.is_success());

    let received = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(sent.get("metadata").is_none());
    assert_eq!(sent["model"], "m");
}

#[tokio::test]
async fn test_process_requests_with_probe() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response(40))
                .insert_header(REMAINING_REQUESTS_HEADER, "500")
                .insert_header(REMAINING_TOKENS_HEADER, "900000"),
        )
        .expect(8)
        .mount(&server)
        .await;

    let env = "LIT_HARVEST_TEST_KEY_PROBE";
    std::env::set_var(env, "secret");

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), completion_config(&server, env), 3);
    let input = write_requests_file(dir.path(), 8);
    let output = dir.path().join("outcomes.jsonl");

    let report = process_requests(&config, &input, &output, true).await.unwrap();

    assert_eq!(report.stats.started, 8);
    assert_eq!(report.stats.succeeded, 8);
    assert!(report.escalated.is_empty());
    assert!(report.halt_reason.is_none());
    assert_eq!(report.calibrated_completion, Some(40.0));

    let records = read_records(&output).unwrap();
    assert_eq!(records.len(), 8);
    let mut rows: Vec<u64> = records
        .iter()
        .map(|r| r.metadata.as_ref().unwrap()["row"].as_u64().unwrap())
        .collect();
    rows.sort();
    assert_eq!(rows, (0..8).collect::<Vec<u64>>());
    assert!(records.iter().all(|r| r.request.get("metadata").is_none()));
    assert!(!Path::new(&config.output.escalation_path).exists());
}

#[tokio::test]
async fn test_process_requests_escalates_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let env = "LIT_HARVEST_TEST_KEY_FAILURES";
    std::env::set_var(env, "secret");

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), completion_config(&server, env), 3);
    let input = write_requests_file(dir.path(), 2);
    let output = dir.path().join("outcomes.jsonl");

    let report = process_requests(&config, &input, &output, false).await.unwrap();

    assert_eq!(report.stats.failed_permanently, 2);
    assert_eq!(report.escalated.len(), 2);
    assert_eq!(report.calibrated_completion, None);

    let records = read_records(&output).unwrap();
    assert!(records.iter().all(|r| r.is_failed()));
    assert!(records.iter().all(|r| r.errors.len() == 2));

    // Escalated lines can be fed straight back in as input
    let escalated = std::fs::read_to_string(&config.output.escalation_path).unwrap();
    let lines: Vec<Value> = escalated
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.get("metadata").is_some()));
}

#[tokio::test]
async fn test_process_requests_requires_api_key() {
    let server = MockServer::start().await;
    let env = "LIT_HARVEST_TEST_KEY_NEVER_SET";
    std::env::remove_var(env);

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), completion_config(&server, env), 3);
    let input = write_requests_file(dir.path(), 1);

    let result = process_requests(&config, &input, &dir.path().join("out.jsonl"), true).await;
    assert!(matches!(result, Err(HarvestError::MissingApiKey(name)) if name == env));
}

#[tokio::test]
async fn test_process_requests_rejects_bad_input_line() {
    let server = MockServer::start().await;
    let env = "LIT_HARVEST_TEST_KEY_BAD_INPUT";
    std::env::set_var(env, "secret");

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), completion_config(&server, env), 3);
    let input = dir.path().join("requests.jsonl");
    std::fs::write(&input, "{\"model\": \"m\"}\n[1, 2]\n").unwrap();

    let result = process_requests(&config, &input, &dir.path().join("out.jsonl"), true).await;
    assert!(matches!(result, Err(HarvestError::Input { line: 2, .. })));
    assert!(server.received_requests().await.unwrap().is_empty());
}
