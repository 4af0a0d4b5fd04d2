use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cytejob_core::error::ErrorKind;
use cytejob_core::job::{JobId, PollConfig};
use cytejob_core::poller::{JobPoller, TracingPollReporter};
use cytejob_core::submit::submit_job;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use super::common::{TEST_TOKEN, results_body, transport_for};

fn fast_config() -> PollConfig {
    PollConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_tick(Duration::from_millis(10))
        .with_settle_delay(Duration::ZERO)
        .with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn submit_then_poll_to_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-7"})))
        .expect(1)
        .mount(&server)
        .await;

    let status_calls = Arc::new(AtomicUsize::new(0));
    let counter = status_calls.clone();
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => ResponseTemplate::new(404),
                1 => ResponseTemplate::new(200).set_body_json(json!({
                    "jobStatus": "processing",
                    "clusterStatus": {"0": "completed", "1": "processing"}
                })),
                _ => ResponseTemplate::new(200).set_body_json(json!({
                    "jobStatus": "completed",
                    "clusterStatus": {"0": "completed", "1": "completed"}
                })),
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let job_id = submit_job(&transport, &json!({"clusters": 2}), Some(TEST_TOKEN))
        .await
        .unwrap();
    let labels = HashMap::from([("1".to_string(), "cluster_B".to_string())]);
    let poller = JobPoller::new(transport, fast_config()).with_cluster_labels(labels);

    let table = poller
        .run(
            &job_id,
            Some(TEST_TOKEN),
            None,
            &TracingPollReporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("0").unwrap().annotation, "Monocyte");
    assert_eq!(table.get("0").unwrap().supporting_markers_joined(), "LYZ; CD14");
    assert_eq!(table.get("cluster_B").unwrap().annotation, "NK cell");
}

#[tokio::test]
async fn auth_failure_during_polling_stops_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    let poller = JobPoller::new(transport_for(&server), fast_config());

    let err = poller
        .wait_for_result(
            &JobId::new("job-7"),
            Some("expired"),
            None,
            &TracingPollReporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Auth);
}

#[tokio::test]
async fn failed_job_surfaces_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobStatus": "failed",
            "message": "Marker genes missing for cluster 3"
        })))
        .mount(&server)
        .await;
    let poller = JobPoller::new(transport_for(&server), fast_config());

    let err = poller
        .wait_for_result(
            &JobId::new("job-7"),
            None,
            None,
            &TracingPollReporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert_eq!(err.message, "Marker genes missing for cluster 3");
}

#[tokio::test]
async fn stuck_job_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobStatus": "processing"})))
        .mount(&server)
        .await;
    let poller = JobPoller::new(
        transport_for(&server),
        fast_config().with_timeout(Duration::from_millis(100)),
    );

    let err = poller
        .wait_for_result(
            &JobId::new("job-7"),
            None,
            None,
            &TracingPollReporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
}
