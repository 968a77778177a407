// tests/http_protocol.rs

//! End-to-end coverage of the HTTP decision table, driven through a real
//! `axum::Router` with `tower::ServiceExt::oneshot` against an in-process
//! mock symbol server and a fake transcoder binary.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use support::{SymbolServerBehavior, TestGateway, spawn_mock_symbol_server};
use symcache_gateway::core::version::SemanticVersion;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_header(uri: &str, name: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

/// Scenario 1: fresh positive. Empty cache, symbol server resolves the PDB,
/// the fake transcoder succeeds, and the response streams the published
/// artifact.
#[tokio::test]
async fn fresh_positive_transcodes_synchronously_and_streams_the_artifact() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::Found(
        "/srv/sym/ntdll.pdb/ABCD/ntdll.pdb".to_string(),
    ))
    .await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;
    let cache_root = gateway.cache_root.path().to_path_buf();

    let response = gateway
        .router()
        .oneshot(get("/v3.1.0/ntdll.pdb/ABCDEF0123456789ABCDEF0123456789/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(content_type, "application/vnd.ms-symcache; version=3.1.0");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"fake symcache bytes");

    let published = cache_root
        .join("ntdll.pdb")
        .join("ABCDEF0123456789ABCDEF01234567891")
        .join("ntdll.pdb-v3.1.0.symcache");
    assert!(published.exists(), "expected published artifact at {published:?}");

    gateway.shutdown().await;
}

/// Scenario 2: async miss. The requested format version is above the async
/// threshold, so a cache miss returns 404 immediately with `Retry-After`
/// and enqueues the key rather than transcoding inline.
#[tokio::test]
async fn async_eligible_miss_returns_404_with_retry_after_and_enqueues() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::NotFound).await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;

    let response = gateway
        .router()
        .oneshot(get("/v3.2.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap().to_str().unwrap(),
        "1"
    );

    // Give the background worker a moment to pick the key up and observe it
    // was in fact handed off rather than handled inline.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    gateway.shutdown().await;
}

/// Scenario 3: negative hit. A prior failed attempt left an unexpired
/// negative marker; the handler must not re-attempt a transcode.
#[tokio::test]
async fn negative_marker_short_circuits_without_retry_after() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::NotFound).await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;

    let key = symcache_gateway::core::key::ArtifactKey::new(
        SemanticVersion::new(3, 1, 0),
        "a.pdb",
        0xABCDEF0123456789ABCDEF0123456789,
        1,
    );
    gateway.state.cache.mark_negative(&key).await.unwrap();

    let response = gateway
        .router()
        .oneshot(get("/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(header::RETRY_AFTER).is_none());

    gateway.shutdown().await;
}

/// Scenario 4: conditional requests against a positive entry at 3.1.0.
#[tokio::test]
async fn conditional_requests_against_a_positive_entry() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::Found(
        "/srv/sym/a.pdb/ABCD/a.pdb".to_string(),
    ))
    .await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;

    // Publish the entry first with an ordinary request.
    let warm = gateway
        .router()
        .oneshot(get("/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1"))
        .await
        .unwrap();
    assert_eq!(warm.status(), StatusCode::OK);

    // 3.0.5 < 3.1.0 (cached version): the bound does not exclude the cached
    // entry, so the gateway serves it.
    let response = gateway
        .router()
        .oneshot(get_with_header(
            "/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1",
            "if-version-exceeds",
            "3.0.5",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 3.1.0 is not strictly less than the requested version (3.1.0): 400.
    let response = gateway
        .router()
        .oneshot(get_with_header(
            "/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1",
            "if-version-exceeds",
            "3.1.0",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    gateway.shutdown().await;
}

/// Scenario 5: two `If-Version-Exceeds` headers on one request is malformed.
#[tokio::test]
async fn duplicate_if_version_exceeds_header_is_a_400_naming_the_header() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::NotFound).await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;

    let request = Request::builder()
        .uri("/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1")
        .header("if-version-exceeds", "3.0.0")
        .header("if-version-exceeds", "3.0.1")
        .body(Body::empty())
        .unwrap();

    let response = gateway.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body).to_lowercase();
    assert!(text.contains("if-version-exceeds"));

    gateway.shutdown().await;
}

/// Scenario 6: the age segment is optional and defaults to 1, landing on
/// the same cache entry as an explicit `/1`.
#[tokio::test]
async fn omitted_age_is_handled_identically_to_age_one() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::Found(
        "/srv/sym/a.pdb/ABCD/a.pdb".to_string(),
    ))
    .await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;
    let cache_root = gateway.cache_root.path().to_path_buf();

    let response = gateway
        .router()
        .oneshot(get("/v3.1.0/a.pdb/ABCDEF0123456789ABCDEF0123456789"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let published = cache_root
        .join("a.pdb")
        .join("ABCDEF0123456789ABCDEF01234567891")
        .join("a.pdb-v3.1.0.symcache");
    assert!(published.exists(), "expected published artifact at {published:?}");

    gateway.shutdown().await;
}

/// Version gate: a request at or below the minimum supported version is
/// rejected as if the artifact doesn't exist, before any cache lookup.
#[tokio::test]
async fn request_at_or_below_minimum_supported_version_is_404() {
    let symbol_base = spawn_mock_symbol_server(SymbolServerBehavior::NotFound).await;
    let gateway = TestGateway::new(symbol_base, SemanticVersion::new(3, 1, 0)).await;

    let response = gateway
        .router()
        .oneshot(get("/v3.0.0/a.pdb/ABCDEF0123456789ABCDEF0123456789/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    gateway.shutdown().await;
}
