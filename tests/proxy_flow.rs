//! End-to-end relay and notification tests.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tcp_proxy::config::{AppConfig, ProxyInstanceConfig};
use tcp_proxy::notify::Notificator;
use tcp_proxy::proxy::ProxyOrchestrator;
use tcp_proxy::sniff::H2C_PREFACE;

mod common;

use common::{
    eventually, http_client, start_proxy, CaptureServer, HttpTestServer, RecordingNotifier, RemoteServer,
    TcpPingServer,
};

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn http_requests_are_aggregated_until_stop() {
    let remote = HttpTestServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;
    let client = http_client();

    for _ in 0..3 {
        let body = client
            .get(format!("http://{addr}/hello"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok GET /hello");
    }

    let secret = format!("secret-{}", uuid::Uuid::new_v4());
    let response = client
        .post(format!("http://{addr}/submit"))
        .header("content-type", "text/plain")
        .body(secret.clone())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Nothing is delivered before the flush.
    assert!(recorder.requests().is_empty());
    assert_eq!(proxy.aggregator().pending(), 2);

    let report = proxy.stop().await;
    assert_eq!(report.delivered, 2);

    let mut requests = recorder.requests();
    requests.sort_by(|a, b| a.0.url.cmp(&b.0.url));
    assert_eq!(requests.len(), 2);

    let (hello, destination, count) = &requests[0];
    assert_eq!(hello.method, "GET");
    assert_eq!(hello.url, "/hello");
    assert_eq!(*count, 3);
    assert_eq!(destination, &format!("127.0.0.1:{}", remote.destination_port()));

    let (submit, _, count) = &requests[1];
    assert_eq!(submit.method, "POST");
    assert_eq!(submit.url, "/submit");
    assert_eq!(submit.content_type, "text/plain");
    assert_eq!(submit.body, secret);
    assert_eq!(submit.body_length, secret.len());
    assert!(submit.remote_ip.starts_with("127.0.0.1:"));
    assert_eq!(*count, 1);
}

#[tokio::test]
async fn stop_delivers_one_notification_per_key() {
    let remote = HttpTestServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;
    let client = http_client();

    let paths = ["/a", "/b", "/c", "/d"];
    for path in paths {
        for _ in 0..2 {
            client.get(format!("http://{addr}{path}")).send().await.unwrap();
        }
    }

    let report = proxy.stop().await;
    assert_eq!(report.delivered, paths.len());
    assert_eq!(report.failed, 0);

    let requests = recorder.requests();
    assert_eq!(requests.len(), paths.len());
    assert!(requests.iter().all(|(_, _, count)| *count == 2));
    assert_eq!(proxy.aggregator().pending(), 0);
}

#[tokio::test]
async fn same_caller_on_two_connections_counts_twice() {
    let remote = CaptureServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    let request = b"GET /api/sample HTTP/1.1\r\nHost: x\r\n\r\n";
    let forwarded = b"GET /api/sample HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n";
    for _ in 0..2 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request).await.unwrap();
        let mut echoed = vec![0u8; forwarded.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, forwarded);
    }

    proxy.stop().await;
    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.url, "/api/sample");
    assert_eq!(requests[0].2, 2);
}

#[tokio::test]
async fn notify_disabled_relays_without_notifications() {
    let remote = HttpTestServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, false, recorder.clone()).await;

    let body = http_client()
        .get(format!("http://{addr}/quiet"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok GET /quiet");

    proxy.stop().await;
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn tcp_protocol_passes_through() {
    let remote = TcpPingServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (rx, mut tx) = stream.into_split();
    let mut lines = BufReader::new(rx).lines();

    for _ in 0..3 {
        tx.write_all(b"PING\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("OK"));
    }

    proxy.stop().await;
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn h2c_preface_is_reported_once_and_relayed_intact() {
    let remote = CaptureServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    // Preface followed by an empty SETTINGS frame.
    let mut sent = H2C_PREFACE.to_vec();
    sent.extend_from_slice(&[0, 0, 0, 0x04, 0, 0, 0, 0, 0]);

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&sent).await.unwrap();

    let mut echoed = vec![0u8; sent.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, sent);
    assert_eq!(remote.wait_for(sent.len(), WAIT).await, sent);

    assert!(eventually(WAIT, || recorder.grpc().len() == 1).await);
    let (remote_addr, destination) = &recorder.grpc()[0];
    assert!(remote_addr.starts_with("127.0.0.1:"));
    assert_eq!(destination, &format!("127.0.0.1:{}", remote.destination_port()));

    proxy.stop().await;
    assert!(recorder.requests().is_empty());
    assert_eq!(recorder.grpc().len(), 1);
}

#[tokio::test]
async fn opaque_bytes_are_relayed_unchanged() {
    let remote = CaptureServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    let mut payload = vec![0u8; 4096];
    rand::thread_rng().fill_bytes(&mut payload);
    // TLS record type; can be neither a request method nor the h2c preface.
    payload[0] = 0x16;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);

    proxy.stop().await;
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn stalled_request_is_forwarded_once_after_deadline() {
    let remote = CaptureServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET /x").await.unwrap();

    let captured = remote.wait_for(6, WAIT).await;
    assert_eq!(captured, b"GET /x");

    // The rest of the request goes straight through afterwards.
    client.write_all(b" HTTP/1.1\r\n\r\n").await.unwrap();
    let captured = remote.wait_for(19, WAIT).await;
    assert_eq!(captured, b"GET /x HTTP/1.1\r\n\r\n");

    proxy.stop().await;
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn chunked_request_is_reframed_and_later_requests_untouched() {
    let remote = CaptureServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, true, recorder.clone()).await;

    let first = b"POST /c HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n";
    let second = b"GET /next HTTP/1.1\r\nHost: x\r\n\r\n";
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(first).await.unwrap();
    client.write_all(second).await.unwrap();

    let mut expected = b"POST /c HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nWiki".to_vec();
    expected.extend_from_slice(second);
    assert_eq!(remote.wait_for(expected.len(), WAIT).await, expected);

    proxy.stop().await;
    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.url, "/c");
    assert_eq!(requests[0].0.body, "Wiki");
}

#[tokio::test]
async fn unreachable_destination_closes_client() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    struct Dead(u16);
    impl RemoteServer for Dead {
        fn destination_port(&self) -> u16 {
            self.0
        }
    }

    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&Dead(port), false, recorder.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut buf = Vec::new();
    let closed = tokio::time::timeout(WAIT, client.read_to_end(&mut buf)).await;
    assert!(closed.is_ok());
    assert!(buf.is_empty());

    proxy.stop().await;
}

#[tokio::test]
async fn orchestrator_reports_bind_failure() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = holder.local_addr().unwrap().port();

    let config = AppConfig {
        proxy_list: vec![ProxyInstanceConfig {
            listen_address: "127.0.0.1".to_string(),
            ..ProxyInstanceConfig::new(taken, "127.0.0.1", 9)
        }],
        ..AppConfig::default()
    };
    let recorder = RecordingNotifier::new();
    let notifier: Arc<dyn Notificator> = recorder.clone();
    let mut orchestrator = ProxyOrchestrator::from_config(&config, notifier);

    let err = orchestrator.start().await.unwrap_err();
    assert!(err.to_string().contains(&format!("127.0.0.1:{taken}")));
    assert!(orchestrator.instances().iter().all(|i| !i.is_running()));
}

#[tokio::test]
async fn stop_leaves_relaying_connections_open() {
    let remote = TcpPingServer::start().await;
    let recorder = RecordingNotifier::new();
    let (mut proxy, addr) = start_proxy(&remote, false, recorder.clone()).await;
    assert_eq!(proxy.active_connections(), 0);

    let stream = TcpStream::connect(addr).await.unwrap();
    let (rx, mut tx) = stream.into_split();
    let mut lines = BufReader::new(rx).lines();
    tx.write_all(b"PING\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("OK"));
    assert_eq!(proxy.active_connections(), 1);

    proxy.stop().await;
    assert!(TcpStream::connect(addr).await.is_err());

    // The established session keeps relaying after the listener is gone.
    tx.write_all(b"PING\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("OK"));

    drop(tx);
    drop(lines);
    assert!(eventually(WAIT, || proxy.active_connections() == 0).await);
}
