//! End-to-end tests of the buffered request pipeline against a mock server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_request::prelude::*;
use serde_json::json;
use wiremock::matchers::{header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, store: Arc<MemoryTokenStore>) -> Client {
    Client::builder()
        .config(ClientConfig::builder().base_url(server.uri()).build())
        .token_store(store)
        .build()
}

/// A store whose token is always due for refresh.
fn stale_store(token: &str) -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_token(token).refresh_after(Duration::ZERO))
}

#[tokio::test]
async fn error_status_becomes_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/42"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = client.get("/devices/42").await.unwrap_err();

    match err {
        ClientError::Request {
            status_code,
            message,
            ..
        } => {
            assert_eq!(status_code, 404);
            assert_eq!(message, "not found");
        }
        other => panic!("expected request error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_uses_generic_message() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = client
        .send(RequestOptions::delete("/devices/1"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(500));
    assert_eq!(err.to_string(), format!("Request error: {}", keel_request::DEFAULT_ERROR_MESSAGE));
}

#[tokio::test]
async fn json_body_and_api_key_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/devices"))
        .and(query_param("apikey", "s3cret"))
        .and(header_eq("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let response = client
        .send(
            RequestOptions::post("/devices")
                .json(&json!({ "name": "pi" }))
                .api_key("s3cret"),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.body(), &json!({ "id": 7 }));
}

#[tokio::test]
async fn stale_token_is_refreshed_through_whoami() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/whoami"))
        .and(header_eq("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new-token"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(header_eq("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = stale_store("old-token");
    let client = client_for(&server, store.clone());

    client.get("/devices").await.unwrap();
    assert_eq!(store.get().await.unwrap().as_deref(), Some("new-token"));
}

#[tokio::test]
async fn rejected_whoami_expires_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/whoami"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Unauthorized" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/devices"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = stale_store("old-token");
    let client = client_for(&server, store.clone());

    let err = client.get("/devices").await.unwrap_err();
    match err {
        ClientError::ExpiredToken { token } => assert_eq!(token.as_deref(), Some("old-token")),
        other => panic!("expected ExpiredToken, got {other:?}"),
    }
    assert_eq!(store.get().await.unwrap(), None);
}

#[tokio::test]
async fn fresh_token_skips_whoami() {
    let server = MockServer::start().await;
    Mock::given(path("/whoami"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unused"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(path("/devices"))
        .and(header_eq("authorization", "Bearer current"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::with_token("current")));
    client.get("/devices").await.unwrap();
}

#[tokio::test]
async fn absolute_url_ignores_base_url() {
    let server = MockServer::start().await;
    Mock::given(path("/absolute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .config(
            ClientConfig::builder()
                .base_url("http://base.invalid")
                .build(),
        )
        .build();

    let response = client
        .get(format!("{}/absolute", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.text(), Some("ok"));
}

struct TraceHeader;

#[async_trait]
impl Interceptor for TraceHeader {
    async fn request(&self, mut options: RequestOptions) -> keel_request::Result<RequestOptions> {
        options.insert_header("x-trace", "abc")?;
        Ok(options)
    }
}

struct RecoverUnavailable;

#[async_trait]
impl Interceptor for RecoverUnavailable {
    async fn response_error(&self, error: ClientError) -> keel_request::Result<Response> {
        match error.status_code() {
            Some(503) => Ok(Response::new(
                StatusCode::OK,
                HeaderMap::new(),
                keel_request::Url::parse("http://fallback.invalid/").unwrap(),
                json!({ "cached": true }),
            )),
            _ => Err(error),
        }
    }
}

#[tokio::test]
async fn interceptors_modify_requests_and_recover_responses() {
    let server = MockServer::start().await;
    Mock::given(path("/status"))
        .and(header_eq("x-trace", "abc"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    client.interceptors().push(RecoverUnavailable);
    client.interceptors().push(TraceHeader);

    let response = client.get("/status").await.unwrap();
    assert_eq!(response.body(), &json!({ "cached": true }));
}

#[tokio::test]
async fn connection_failures_are_passed_through() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = Client::new(ClientConfig::default());
    let err = client
        .send(RequestOptions::get(format!("http://127.0.0.1:{port}/")).retries(2))
        .await
        .unwrap_err();

    assert!(err.is_connection(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn timeouts_are_retried_up_to_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = client
        .send(
            RequestOptions::get("/slow")
                .timeout(Duration::from_millis(50))
                .retries(2),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    server.verify().await;
}

#[tokio::test]
async fn error_statuses_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "message": "busy" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = client
        .send(RequestOptions::get("/busy").retries(2))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(503));
    server.verify().await;
}

#[tokio::test]
async fn option_bag_drives_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/notes/1"))
        .and(header_eq("x-client", "bag"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::from_value(json!({
        "method": "put",
        "uri": "/notes/1",
        "headers": { "x-client": "bag" },
        "data": "plain text",
        "json": false,
    }))
    .unwrap();

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let response = client.send(options).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.body().is_null());
}
