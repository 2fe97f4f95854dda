//! End-to-end tests of the request pipeline through a live listener.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use guardian::config::{PathRouteConfig, ServiceConfig};

mod common;
use common::MockResponse;

#[tokio::test]
async fn test_forwards_with_hardening_headers() {
    let backend = common::start_mock_backend("hello from upstream").await;
    let gateway = common::start_gateway(common::gateway_config(backend.port())).await;

    let res = common::client()
        .get(common::url(&gateway, "frontend", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert_eq!(res.headers()["x-frame-options"], "SAMEORIGIN");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hello from upstream");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_waf_blocks_injection_and_traversal() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            MockResponse::ok("reached")
        }
    })
    .await;
    let gateway = common::start_gateway(common::gateway_config(backend.port())).await;
    let client = common::client();

    let res = client
        .get(common::url(&gateway, "frontend", "/search?q=1%20union%20select%20password"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(res.text().await.unwrap().contains("sqli-001"));

    let res = client
        .get(common::url(&gateway, "frontend", "/read?file=..%2F..%2Fetc%2Fpasswd"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(res.text().await.unwrap().contains("lfi-"));

    let res = client
        .get(common::url(&gateway, "frontend", "/search?q=shoes"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_honeypot_bans_the_caller() {
    let backend = common::start_mock_backend("ok").await;
    let gateway = common::start_gateway(common::gateway_config(backend.port())).await;
    let client = common::client();

    let res = client
        .get(common::url(&gateway, "frontend", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(common::url(&gateway, "frontend", "/wp-admin/setup.php"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(common::url(&gateway, "frontend", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let loopback = "127.0.0.1".parse().unwrap();
    let ban = gateway.gateway().bans().is_banned(loopback).unwrap();
    assert!(ban.reason.contains("/wp-admin"));
    assert!(gateway.gateway().bans().unban(loopback));

    let res = client
        .get(common::url(&gateway, "frontend", "/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_hostile_user_agent_rejected() {
    let backend = common::start_mock_backend("ok").await;
    let gateway = common::start_gateway(common::gateway_config(backend.port())).await;

    let res = common::client()
        .get(common::url(&gateway, "frontend", "/"))
        .header("user-agent", "sqlmap/1.7.2#stable (https://sqlmap.org)")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let backend = common::start_mock_backend("ok").await;
    let mut config = common::gateway_config(backend.port());
    config.rate_limit.capacity = 3.0;
    config.rate_limit.fill_rate = 0.1;
    let gateway = common::start_gateway(config).await;
    let client = common::client();
    let url = common::url(&gateway, "frontend", "/");

    for _ in 0..3 {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_path_route_selects_service() {
    let frontend = common::start_mock_backend("frontend").await;
    let api = common::start_mock_backend("api").await;

    let mut config = common::gateway_config(frontend.port());
    config.services.push(ServiceConfig::external("backend", api.port()));
    config.listeners[0].routes.push(PathRouteConfig {
        path_prefix: "/api".to_string(),
        service: "backend".to_string(),
    });
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let body = |path: &'static str| {
        let client = client.clone();
        let url = common::url(&gateway, "frontend", path);
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    };
    assert_eq!(body("/api/users").await, "api");
    assert_eq!(body("/api").await, "api");
    assert_eq!(body("/apix").await, "frontend");
    assert_eq!(body("/").await, "frontend");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_location_rewritten_to_public_host() {
    let port = common::closed_port();
    let location = format!("http://127.0.0.1:{port}/dashboard");
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    common::serve_programmable(listener, move || {
        let location = location.clone();
        async move { MockResponse::status(302, "").header("location", &location) }
    });

    let gateway = common::start_gateway(common::gateway_config(port)).await;
    let addr = gateway.addr("frontend").unwrap();

    let res = common::client()
        .get(format!("http://{addr}/login"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], format!("http://{addr}/dashboard").as_str());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_static_assets_are_cached_until_expiry() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let c = c.clone();
        async move {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            MockResponse::ok(&format!("bundle v{n}")).header("content-type", "application/javascript")
        }
    })
    .await;

    let mut config = common::gateway_config(backend.port());
    config.cache.ttl_secs = 1;
    let gateway = common::start_gateway(config).await;
    let client = common::client();
    let url = common::url(&gateway, "frontend", "/static/app.js");

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.headers()["x-cache"], "MISS");
    assert_eq!(res.text().await.unwrap(), "bundle v1");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.headers()["x-cache"], "HIT");
    assert_eq!(res.text().await.unwrap(), "bundle v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.headers()["x-cache"], "MISS");
    assert_eq!(res.text().await.unwrap(), "bundle v2");

    // Dynamic paths always reach the upstream.
    let res = client
        .get(common::url(&gateway, "frontend", "/api/session"))
        .send()
        .await
        .unwrap();
    assert!(!res.headers().contains_key("x-cache"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_unknown_host_still_served_by_listener() {
    let backend = common::start_mock_backend("ok").await;
    let gateway = common::start_gateway(common::gateway_config(backend.port())).await;

    let res = common::client()
        .get(common::url(&gateway, "frontend", "/"))
        .header("host", "somewhere.example:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gateway.shutdown().await;
}
