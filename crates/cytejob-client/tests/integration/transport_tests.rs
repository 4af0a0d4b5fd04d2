use std::time::Duration;

use cytejob_client::{HttpTransport, TransportConfig};
use cytejob_core::error::ErrorKind;
use cytejob_core::job::{JobId, JobState};
use cytejob_core::resolver::resolve;
use cytejob_core::submit::submit_job;
use cytejob_core::traits::{JobTransport, ResponseBody};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{TEST_TOKEN, transport_for, transport_with_read_timeout};

fn job() -> JobId {
    JobId::new("job-7")
}

#[tokio::test]
async fn status_json_is_decoded_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .and(header("Authorization", "Bearer test-secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobStatus": "pending"})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = transport_for(&server)
        .fetch_status(&job(), Some(TEST_TOKEN))
        .await
        .unwrap();

    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.body, ResponseBody::Json(json!({"jobStatus": "pending"})));
}

#[tokio::test]
async fn unauthorized_and_forbidden_are_auth_errors() {
    for code in [401u16, 403] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(code).set_body_string("token rejected"))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport_for(&server)
            .fetch_status(&job(), Some("bad"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Auth, "HTTP {code}");
        assert!(err.message.contains("token rejected"));
    }
}

#[tokio::test]
async fn not_found_is_an_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/results/job-7"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such job"))
        .mount(&server)
        .await;

    let outcome = transport_for(&server)
        .fetch_results(&job(), None)
        .await
        .unwrap();

    assert!(outcome.is_not_found());
    assert_eq!(outcome.body, ResponseBody::Text("no such job".into()));
}

#[tokio::test]
async fn server_error_carries_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("queue backend down"))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .fetch_status(&job(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert!(err.message.contains("503"));
    assert!(err.message.contains("queue backend down"));
}

#[tokio::test]
async fn server_error_without_body_is_unknown_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .fetch_status(&job(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert!(err.message.contains("Unknown error"));
}

#[tokio::test]
async fn malformed_json_on_success_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"jobStatus\": "))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .fetch_status(&job(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert!(err.message.contains("Failed to decode JSON"));
}

#[tokio::test]
async fn slow_response_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jobStatus": "pending"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = transport_with_read_timeout(&server, Duration::from_millis(50))
        .fetch_status(&job(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Network);
}

#[tokio::test]
async fn refused_connection_is_network_error() {
    // Bind an ephemeral port and release it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport =
        HttpTransport::new(TransportConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();

    let err = transport.fetch_status(&job(), None).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Network);
}

#[tokio::test]
async fn submit_posts_payload_and_returns_job_id() {
    let server = MockServer::start().await;
    let payload = json!({"clusterLabels": {"0": "Monocyte"}, "markerGenes": {"0": ["LYZ"]}});
    Mock::given(method("POST"))
        .and(path("/annotate"))
        .and(header("Authorization", "Bearer test-secret-token"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-7"})))
        .expect(1)
        .mount(&server)
        .await;

    let id = submit_job(&transport_for(&server), &payload, Some(TEST_TOKEN))
        .await
        .unwrap();

    assert_eq!(id, job());
}

#[tokio::test]
async fn base_path_prefix_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/status/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobStatus": "processing"})))
        .expect(1)
        .mount(&server)
        .await;
    let transport =
        HttpTransport::new(TransportConfig::new(format!("{}/api/v2", server.uri()))).unwrap();

    let snapshot = resolve(&transport, &job(), None).await.unwrap();

    assert_eq!(snapshot.state(), JobState::Processing);
}

#[tokio::test]
async fn resolver_downgrades_completed_without_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobStatus": "completed"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/job-7"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let snapshot = resolve(&transport_for(&server), &job(), None)
        .await
        .unwrap();

    assert_eq!(snapshot.state(), JobState::Failed);
    assert_eq!(snapshot.message(), "results unavailable");
}

#[tokio::test]
async fn html_status_body_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Down for maintenance</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = resolve(&transport_for(&server), &job(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert!(err.message.contains("Failed to decode JSON"));
}

#[tokio::test]
async fn empty_status_body_is_error_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-7"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let snapshot = resolve(&transport_for(&server), &job(), None)
        .await
        .unwrap();

    assert_eq!(snapshot.state(), JobState::Error);
    assert!(snapshot.message().contains("not JSON"));
}
