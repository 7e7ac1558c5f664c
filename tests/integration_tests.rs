//! Integration tests for request dispatch

use ingest_transport::{
    Config, Credentials, Dispatcher, Endpoint, ErrorKind, RESPONSE, RequestMethod, ResponseState,
    STATUS, Result,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_for(server: &MockServer) -> Result<Arc<Config>> {
    Ok(Arc::new(
        Config::builder()
            .data_plane_url(server.uri())
            .control_plane_url(server.uri())
            .sdk_version("1.0.0")
            .user_agent("ingest-transport-integration-test/1.0")
            .request_timeout(Duration::from_secs(5))
            .build()?,
    ))
}

#[tokio::test]
async fn test_batch_post_succeeds() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .and(header("Authorization", "Basic auth-token"))
        .and(header("AnonymousId", "anon-token"))
        .and(header("Content-Type", "application/json"))
        .and(body_string(r#"{"batch":[]}"#))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(config_for(&server)?, "auth-token", "anon-token")?;
    let response = dispatcher
        .send(r#"{"batch":[]}"#, Endpoint::Batch, RequestMethod::Post)
        .await;

    assert_eq!(response.status(), Some(200));
    assert_eq!(response.text().as_deref(), Some("OK"));
    assert!(response.error().is_none());
    assert_eq!(response.state(), ResponseState::Success);

    Ok(())
}

#[tokio::test]
async fn test_source_config_get() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sourceConfig"))
        .and(query_param("p", "ios"))
        .and(query_param("v", "1.0.0"))
        .and(header("Authorization", "Basic auth-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"source":{}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(config_for(&server)?, "auth-token", "anon-token")?;
    let response = dispatcher
        .send("", Endpoint::SourceConfig, RequestMethod::Get)
        .await;

    assert_eq!(response.status(), Some(200));
    let map = response.to_map();
    assert_eq!(map[STATUS], 200);
    assert_eq!(map[RESPONSE], r#"{"source":{}}"#);

    Ok(())
}

#[tokio::test]
async fn test_error_status_codes() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid write key"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(config_for(&server)?, "auth-token", "anon-token")?;

    let response = dispatcher.send("{}", Endpoint::Batch, RequestMethod::Post).await;
    assert_eq!(response.status(), Some(400));
    assert_eq!(response.error(), Some(&ErrorKind::Http));
    assert_eq!(response.state(), ResponseState::WrongWriteKey);

    let response = dispatcher
        .send("{}", Endpoint::Transform, RequestMethod::Post)
        .await;
    assert_eq!(response.status(), Some(500));
    assert_eq!(response.error(), Some(&ErrorKind::Http));
    assert!(response.body().is_none());

    Ok(())
}

#[tokio::test]
async fn test_unreachable_host() -> Result<()> {
    let config = Arc::new(
        Config::builder()
            .data_plane_url("http://127.0.0.1:1")
            .request_timeout(Duration::from_secs(2))
            .build()?,
    );
    let dispatcher = Dispatcher::new(config, "auth-token", "anon-token")?;

    let response = dispatcher.send("{}", Endpoint::Batch, RequestMethod::Post).await;

    assert_eq!(response.status(), None);
    assert!(response.body().is_none());
    assert!(matches!(response.error(), Some(ErrorKind::Transport { .. })));
    assert_eq!(response.state(), ResponseState::NetworkError);

    Ok(())
}

#[tokio::test]
async fn test_timeout() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = Arc::new(
        Config::builder()
            .data_plane_url(server.uri())
            .request_timeout(Duration::from_millis(100)) // Very short timeout
            .build()?,
    );
    let dispatcher = Dispatcher::new(config, "auth-token", "anon-token")?;

    let response = dispatcher.send("{}", Endpoint::Batch, RequestMethod::Post).await;

    assert_eq!(response.status(), None);
    assert!(response.is_transport_error());

    Ok(())
}

#[test]
fn test_send_blocking() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| {
        ingest_transport::Error::Internal(format!("failed to create runtime: {}", e))
    })?;
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;
        server
    });

    let dispatcher = Dispatcher::new(config_for(&server)?, "auth-token", "anon-token")?;
    for _ in 0..3 {
        let response = dispatcher.send_blocking("{}", Endpoint::Batch, RequestMethod::Post);
        assert_eq!(response.status(), Some(200));
    }
    runtime.block_on(async move { drop(server) });
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_never_mixes_tokens() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(config_for(&server)?, "auth-0", "anon-0")?;

    let refresher = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            for i in 1..=200 {
                dispatcher.set_credentials(Credentials::new(
                    format!("auth-{}", i),
                    format!("anon-{}", i),
                ));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut sends = Vec::new();
    for _ in 0..100 {
        let dispatcher = dispatcher.clone();
        sends.push(tokio::spawn(async move {
            dispatcher.send("{}", Endpoint::Batch, RequestMethod::Post).await
        }));
    }

    refresher.await.expect("refresher panicked");
    for send in sends {
        let response = send.await.expect("send panicked");
        assert_eq!(response.status(), Some(200));
    }

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 100);
    for request in requests {
        let auth = request.headers["authorization"].to_str().unwrap_or_default();
        let anon = request.headers["anonymousid"].to_str().unwrap_or_default();
        assert_eq!(
            auth.trim_start_matches("Basic auth-"),
            anon.trim_start_matches("anon-")
        );
    }

    Ok(())
}
