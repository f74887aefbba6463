use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use linkstash::error::AppError;
use linkstash::services::Fetcher;

#[tokio::test]
async fn fetch_returns_body_on_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("Accept-Encoding", "identity"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new();
    let body = fetcher
        .fetch_url(&format!("{}/page", server.uri()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(body, "<html>hello</html>");
}

#[tokio::test]
async fn non_2xx_status_fails_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new();
    let err = fetcher
        .fetch_url(&format!("{}/missing", server.uri()), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        AppError::UnexpectedStatus(status) => assert_eq!(status.as_u16(), 404),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn accepted_is_retried_once_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ready now"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new();
    let body = fetcher
        .fetch_url(&format!("{}/slow", server.uri()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(body, "ready now");
}

#[tokio::test]
async fn permanent_202_fails_after_exactly_two_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stuck"))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new();
    let err = fetcher
        .fetch_url(&format!("{}/stuck", server.uri()), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        AppError::UnexpectedStatus(status) => assert_eq!(status.as_u16(), 202),
        other => panic!("expected status error, got {other:?}"),
    }
    // Mock expectations verify the attempt count when the server drops.
}

#[tokio::test]
async fn cancellation_interrupts_an_in_flight_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("too late")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let fetcher = Fetcher::new();
    let started = Instant::now();
    let err = fetcher
        .fetch_url(&format!("{}/slow", server.uri()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    // Well under the server's 10s delay: the request itself was interrupted.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_aborts_the_retry_wait() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stuck"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let fetcher = Fetcher::new();
    let started = Instant::now();
    let err = fetcher
        .fetch_url(&format!("{}/stuck", server.uri()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    // Well under the 750ms retry delay: the wait was interrupted.
    assert!(started.elapsed() < Duration::from_millis(700));
}
