//! End-to-end simulation tests
//!
//! Drives the engine, exchange client and drivers through the public API with
//! a scripted transport, a recording sleeper and real report files.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loadsim::drivers::{AgbotDriver, Harness};
use loadsim::engine::{CadenceLoop, FnRound, RoundBody, RoundOutcome, RunConfig, RunLabels};
use loadsim::error::{LoadsimError, Result};
use loadsim::exchange::{ApiCall, ExchangeClient};
use loadsim::report::{FileReporter, MemoryReporter, Reporter};
use loadsim::sleeper::RecordingSleeper;
use loadsim::transport::{MockReply, MockTransport, OperationCounter, RetryPolicy, RetryingInvoker};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

fn client(mock: Arc<MockTransport>, reporter: Arc<dyn Reporter>) -> ExchangeClient {
    let invoker = RetryingInvoker::new(
        mock,
        OperationCounter::new(),
        RetryPolicy::immediate(5),
        Arc::new(RecordingSleeper::new()),
    );
    ExchangeClient::new("http://exchange/v1", invoker, reporter)
}

/// Round body that makes a fixed set of exchange calls per round.
struct CallingRound<'a> {
    client: &'a ExchangeClient,
    mutating_status_fails_at: Option<u32>,
    rounds_seen: Vec<u32>,
}

#[async_trait]
impl RoundBody for CallingRound<'_> {
    async fn run_round(&mut self, round: u32) -> Result<RoundOutcome> {
        self.rounds_seen.push(round);
        self.client.call(ApiCall::get("orgs/perf/nodes")).await?;
        let post = ApiCall::post(format!("orgs/perf/nodes/n{}/msgs", round))
            .json_body(&json!({"message": "hey there", "ttl": 5}))?;
        self.client.call(post).await?;
        if self.mutating_status_fails_at == Some(round) {
            self.client.call(ApiCall::put("orgs/perf/agbots/a1").raw_body("{}")).await?;
        }
        Ok(RoundOutcome::new(1))
    }
}

#[tokio::test]
async fn test_operation_count_includes_retries() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..3 {
        mock.fail_times(2, "dial tcp: i/o timeout");
        mock.push_reply(MockReply::status(200));
    }
    let ex = client(mock, Arc::new(MemoryReporter::new()));
    let config = RunConfig::new(1, 1).unwrap().with_no_sleep(true);
    let cadence = CadenceLoop::new(config, Arc::new(RecordingSleeper::new()));

    let mut body = CallsPerRound { client: &ex, calls: 3 };
    let summary = cadence.run(&mut body, ex.counter()).await.unwrap();

    assert_eq!(summary.operations, 9);
}

struct CallsPerRound<'a> {
    client: &'a ExchangeClient,
    calls: usize,
}

#[async_trait]
impl RoundBody for CallsPerRound<'_> {
    async fn run_round(&mut self, _round: u32) -> Result<RoundOutcome> {
        for _ in 0..self.calls {
            self.client.call(ApiCall::get("admin/version")).await?;
        }
        Ok(RoundOutcome::new(self.calls as u64))
    }
}

#[tokio::test]
async fn test_conflict_on_mutating_call_aborts_run() {
    let mock = Arc::new(MockTransport::new());
    mock.route(Method::PUT, "/orgs/perf/agbots/a1", MockReply::text(409, "already exists"));
    let ex = client(mock.clone(), Arc::new(MemoryReporter::new()));
    let sleeper = Arc::new(RecordingSleeper::new());
    let cadence = CadenceLoop::new(RunConfig::new(5, 10).unwrap(), sleeper.clone());

    let mut body = CallingRound {
        client: &ex,
        mutating_status_fails_at: Some(2),
        rounds_seen: Vec::new(),
    };
    let err = cadence.run(&mut body, ex.counter()).await.unwrap_err();

    assert!(matches!(err, LoadsimError::BadStatus { status: 409, .. }));
    assert_eq!(body.rounds_seen, vec![1, 2]);
    assert_eq!(sleeper.count(), 1);
    assert!(mock.requests_to(Method::POST, "/orgs/perf/nodes/n3/msgs").is_empty());
}

#[tokio::test]
async fn test_persistent_refusal_exhausts_retries() {
    let mock = Arc::new(MockTransport::new());
    mock.fail_times(10, "error sending request: tcp connect error: Connection refused (os error 111)");
    let sleeper = Arc::new(RecordingSleeper::new());
    let invoker = RetryingInvoker::new(
        mock.clone(),
        OperationCounter::new(),
        RetryPolicy::new(5, Duration::from_secs(2)),
        sleeper.clone(),
    );
    let ex = ExchangeClient::new("http://exchange/v1", invoker, Arc::new(MemoryReporter::new()));

    let err = ex.call(ApiCall::get("admin/version")).await.unwrap_err();

    assert!(matches!(err, LoadsimError::RetriesExhausted { attempts: 6, .. }));
    assert_eq!(mock.request_count(), 6);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(2); 5]);
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() {
    let mock = Arc::new(MockTransport::new());
    mock.fail_times(1, "invalid request payload");
    let ex = client(mock.clone(), Arc::new(MemoryReporter::new()));

    let err = ex.call(ApiCall::get("admin/version")).await.unwrap_err();

    assert!(matches!(err, LoadsimError::Transport { .. }));
    assert_eq!(mock.request_count(), 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodePolicy {
    properties: Vec<Property>,
    constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Property {
    name: String,
    value: String,
    #[serde(rename = "type")]
    kind: String,
}

#[tokio::test]
async fn test_typed_body_round_trip_through_transport() {
    let mock = Arc::new(MockTransport::new());
    let ex = client(mock.clone(), Arc::new(MemoryReporter::new()));
    let policy = NodePolicy {
        properties: vec![Property {
            name: "purpose".to_string(),
            value: "testing".to_string(),
            kind: "string".to_string(),
        }],
        constraints: vec!["a == b".to_string()],
    };

    ex.call(ApiCall::put("orgs/perf/nodes/n1/policy").json_body(&policy).unwrap())
        .await
        .unwrap();

    let sent = mock.requests_to(Method::PUT, "/policy")[0].body.clone().unwrap();
    mock.push_reply(MockReply::Respond { status: 200, body: sent });
    let (status, echoed) = ex.call_as::<NodePolicy>(ApiCall::get("orgs/perf/nodes/n1/policy")).await.unwrap();

    assert_eq!(status, 200);
    assert_eq!(echoed, Some(policy));
}

#[tokio::test]
async fn test_short_circuit_stops_sleeping_but_not_rounds() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = RunConfig::new(5, 10).unwrap().with_short_circuit(2, 2).unwrap();
    let cadence = CadenceLoop::new(config, sleeper.clone()).with_labels(RunLabels::new(3, "agbots", "agreement checks"));
    let units = [3u64, 0, 0, 0, 5];
    let mut seen = Vec::new();
    let mut body = FnRound(|round: u32| {
        seen.push(round);
        Ok(RoundOutcome::new(units[(round - 1) as usize]))
    });

    let summary = cadence.run(&mut body, &OperationCounter::new()).await.unwrap();

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(summary.short_circuited_at, Some(3));
    assert!(summary.slept_rounds.iter().all(|r| *r < 3));
    assert_eq!(sleeper.count(), 2);
    let text = summary.to_string();
    assert!(text.starts_with("Simulated 3 agbots for 5 agreement checks\n"));
    assert!(text.contains("total=8, avg=1.600000/round, max=5, min=0, last=5"));
    assert!(text.ends_with("Short-circuit: round 3"));
}

#[tokio::test]
async fn test_agbot_run_writes_report_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("agbot").join("perf1-agbot.summary");
    let reporter: Arc<dyn Reporter> = Arc::new(FileReporter::create(&path).unwrap());

    let mock = Arc::new(MockTransport::new());
    // a read outside its accept list is reported and the run goes on
    mock.route(Method::GET, "/orgs/IBM", MockReply::text(500, "boom"));
    let harness = Harness::new(
        "http://exchange/v1",
        mock,
        RetryPolicy::immediate(5),
        Arc::new(RecordingSleeper::new()),
        reporter,
    );
    let exchange = loadsim::config::ExchangeConfig {
        url: "http://exchange/v1".to_string(),
        root_password: "pw".to_string(),
        iam_key: "key".to_string(),
        iam_email: "me@x.com".to_string(),
        ..Default::default()
    };
    let agbot = loadsim::config::AgbotConfig {
        agreement_checks: 2,
        msgs: 1,
        ..Default::default()
    };

    AgbotDriver::new(exchange, agbot, "perf1").run(&harness).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let errors: Vec<&str> = content.lines().filter(|l| l.starts_with("Error:==> ")).collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].ends_with("bad HTTP code 500 from GET http://exchange/v1/orgs/IBM, output: boom"));
    assert!(content.contains("Simulated 1 agbots for 2 agreement checks"));
    assert!(content.trim_end().ends_with("Short-circuit: never"));
}
