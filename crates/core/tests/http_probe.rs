//! HTTP status probe tests against a local responder.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use gantry_core::monitor::ReportState;
use gantry_core::{HttpStatusProbe, StatusProbe};

/// Serve the given body for every request on a fresh local port.
async fn spawn_artifact_server(body: &'static str) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind artifact server");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                // One read is enough for a header-only GET.
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    port
}

#[tokio::test]
async fn test_probe_parses_status_artifact() {
    let port =
        spawn_artifact_server(r#"{"nonce":"run-1","state":"running","message":"graph loaded"}"#)
            .await;
    let probe = HttpStatusProbe::new(port, "/status.json").unwrap();

    let report = probe.fetch("127.0.0.1").await.unwrap().expect("report");
    assert_eq!(report.nonce, "run-1");
    assert_eq!(report.state, ReportState::Running);
    assert_eq!(report.message.as_deref(), Some("graph loaded"));
}

#[tokio::test]
async fn test_probe_maps_unknown_state_to_pending() {
    let port = spawn_artifact_server(r#"{"nonce":"run-1","state":"downloading_bundle"}"#).await;
    let probe = HttpStatusProbe::new(port, "/status.json").unwrap();

    let report = probe.fetch("127.0.0.1").await.unwrap().expect("report");
    assert_eq!(report.state, ReportState::Pending);
}

#[tokio::test]
async fn test_unreachable_instance_yields_no_report() {
    // Bind and immediately drop a listener to get a port nothing answers on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let probe = HttpStatusProbe::new(port, "/status.json").unwrap();

    let report = probe.fetch("127.0.0.1").await.unwrap();
    assert!(report.is_none());
}
