// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Router;

use super::*;

/// Spin up a counting endpoint that fails the first `fail_first` requests.
async fn counting_server(fail_first: u32) -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let state = (Arc::clone(&hits), fail_first);

    let app = Router::new()
        .route(
            "/v1/notify",
            post(
                |State((hits, fail_first)): State<(Arc<AtomicU32>, u32)>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= fail_first {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        axum::http::StatusCode::OK
                    }
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), hits)
}

#[tokio::test]
async fn push_succeeds_first_try() {
    let (base, hits) = counting_server(0).await;
    let client = GatewayClient::new(&base, "tok");

    let delivered = client.push("/v1/notify", &serde_json::json!({"title": "t"})).await;
    assert!(delivered);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn push_retries_transient_failures() {
    let (base, hits) = counting_server(2).await;
    let client = GatewayClient::new(&base, "tok");

    let delivered = client.push("/v1/notify", &serde_json::json!({"title": "t"})).await;
    assert!(delivered, "third attempt should succeed");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn push_drops_after_three_attempts() {
    let (base, hits) = counting_server(10).await;
    let client = GatewayClient::new(&base, "tok");

    let delivered = client.push("/v1/notify", &serde_json::json!({"title": "t"})).await;
    assert!(!delivered);
    assert_eq!(hits.load(Ordering::SeqCst), 3, "exactly three attempts");
}

#[tokio::test]
async fn push_handles_connection_refused() {
    // Bind-then-drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = GatewayClient::new(&format!("http://{addr}"), "tok");
    let delivered = client.push("/v1/notify", &serde_json::json!({})).await;
    assert!(!delivered);
}
