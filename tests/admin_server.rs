//! Admin server lifecycle tests.
//!
//! Binds the probe surface on an ephemeral port, talks to it over real TCP,
//! and verifies graceful shutdown via the cancellation token.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use folio_apm::health::{AdminServer, AdminServerConfig, Probe};
use folio_apm::{ApmConfig, ApmState};

fn find_available_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

async fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect to admin server");
    let request = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    response
}

#[tokio::test]
async fn test_admin_server_serves_probes_and_shuts_down() {
    let state = ApmState::new(ApmConfig::default());
    let probe = Arc::new(Probe::new(
        Arc::clone(&state.config),
        Arc::clone(&state.metrics),
    ));
    state
        .metrics
        .record_task("send_email", true, Duration::from_millis(120), 3);

    let port = find_available_port();
    let server = AdminServer::with_config(
        probe,
        AdminServerConfig {
            port,
            bind_addr: "127.0.0.1".to_string(),
        },
    );

    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(server.run(shutdown.clone()));

    // Give the listener a moment to bind.
    let mut live = String::new();
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            drop(stream);
            live = http_get(port, "/health/live").await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(live.starts_with("HTTP/1.1 200"), "got: {live}");
    assert!(live.contains(r#"{"status":"alive"}"#));

    let metrics_json = http_get(port, "/metrics/json").await;
    assert!(metrics_json.starts_with("HTTP/1.1 200"));
    assert!(metrics_json.contains(r#""last_queue_depth":3"#));

    let metrics_text = http_get(port, "/metrics").await;
    assert!(metrics_text.contains("folio_tasks_total"));

    // Cancelling the token stops the server cleanly.
    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("server should stop after cancellation")
        .expect("server task should not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_admin_server_bind_conflict_is_an_error() {
    let state = ApmState::new(ApmConfig::default());
    let probe = Arc::new(Probe::new(
        Arc::clone(&state.config),
        Arc::clone(&state.metrics),
    ));

    // Hold the port so the server cannot bind it.
    let holder = StdTcpListener::bind("127.0.0.1:0").expect("bind holder");
    let port = holder.local_addr().expect("local addr").port();

    let server = AdminServer::with_config(
        probe,
        AdminServerConfig {
            port,
            bind_addr: "127.0.0.1".to_string(),
        },
    );
    let result = server.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(folio_apm::ApmError::Bind { .. })));
}
