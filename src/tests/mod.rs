//! End-to-end checks of the sender over real sockets.

mod server;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::certificates::KeyStores;
use crate::network::message::{HttpMessage, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use crate::network::options::ConnectionOptions;
use crate::network::proxy::{HttpProxy, PasswordAuthentication};
use crate::network::request_config::HttpRequestConfig;
use crate::network::sender::{HttpSender, SenderServices, MANUAL_REQUEST_INITIATOR};
use crate::network::{SendError, TransportError};

use server::{Reply, TestServer};

fn options() -> ConnectionOptions {
    let mut options = ConnectionOptions::default();
    options.set_timeout(Duration::from_secs(5));
    options
}

fn sender_with(options: ConnectionOptions) -> HttpSender {
    let services = Arc::new(SenderServices::with_reqwest(options, Arc::new(KeyStores::new())));
    HttpSender::new(services, MANUAL_REQUEST_INITIATOR)
}

fn proxied_options(proxy_port: u16, realm: &str) -> ConnectionOptions {
    let mut options = options();
    let proxy = HttpProxy::new(
        "127.0.0.1",
        u32::from(proxy_port),
        realm,
        PasswordAuthentication::new("user", "pass"),
    )
    .unwrap();
    options.set_http_proxy(proxy);
    options.set_http_proxy_enabled(true);
    options.set_http_proxy_auth_enabled(true);
    options
}

#[test]
fn host_header_is_synthesized_from_the_authority() {
    let server = TestServer::start(|_, _| Reply::text(200, "OK", &[], "ok"));
    let sender = sender_with(options());
    let mut msg = HttpMessage::get(&server.url("/")).unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].header(HOST),
        Some(format!("127.0.0.1:{}", server.port()).as_str())
    );
    assert_eq!(msg.response_body().as_bytes(), b"ok");
    assert!(msg.is_response_from_target_host());
}

#[test]
fn user_supplied_host_header_is_preserved() {
    let server = TestServer::start(|_, _| Reply::text(200, "OK", &[], ""));
    let sender = sender_with(options());
    let mut msg = HttpMessage::get(&server.url("/")).unwrap();
    msg.request_header_mut().set_header(HOST, "vhost.example");

    sender.send_and_receive(&mut msg).unwrap();

    assert_eq!(server.requests()[0].header(HOST), Some("vhost.example"));
}

#[test]
fn chunked_responses_are_reassembled_with_a_content_length() {
    let payload: Vec<u8> = (0..5050u32).map(|i| b'a' + (i % 26) as u8).collect();
    let expected = payload.clone();
    let server = TestServer::start(move |_, _| {
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut offset = 0;
        for size in 1..=100usize {
            chunks.push(&payload[offset..offset + size]);
            offset += size;
        }
        Reply::chunked(&chunks)
    });
    let sender = sender_with(options());
    let mut msg = HttpMessage::get(&server.url("/chunked")).unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    assert_eq!(msg.response_body().as_bytes(), expected.as_slice());
    assert_eq!(msg.response_header().header(TRANSFER_ENCODING), None);
    assert_eq!(msg.response_header().header(CONTENT_LENGTH), Some("5050"));
}

#[test]
fn closed_connections_are_retried() {
    let server = TestServer::start(|_, index| {
        if index < 2 {
            Reply::Close
        } else {
            Reply::text(200, "OK", &[], "third time")
        }
    });
    let sender = sender_with(options());
    sender.set_max_retries_on_io_error(3);
    let mut msg = HttpMessage::get(&server.url("/flaky")).unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    assert_eq!(server.requests().len(), 3);
    assert_eq!(msg.response_body().as_bytes(), b"third time");
}

#[test]
fn exhausted_retries_leave_no_target_response() {
    let server = TestServer::start(|_, _| Reply::Close);
    let sender = sender_with(options());
    sender.set_max_retries_on_io_error(2);
    let mut msg = HttpMessage::get(&server.url("/down")).unwrap();

    let err = sender.send_and_receive(&mut msg).unwrap_err();

    assert!(matches!(err, SendError::Transport(TransportError::Io(_))));
    assert_eq!(server.requests().len(), 2);
    assert!(!msg.is_response_from_target_host());
}

#[test]
fn proxy_credentials_follow_a_matching_realm_challenge() {
    let proxy = TestServer::start(|request, _| match request.header("Proxy-Authorization") {
        Some(_) => Reply::text(200, "OK", &[], "through"),
        None => Reply::text(
            407,
            "Proxy Authentication Required",
            &[("Proxy-Authenticate", "Basic realm=\"Corp\"")],
            "",
        ),
    });
    let sender = sender_with(proxied_options(proxy.port(), "Corp"));
    let mut msg = HttpMessage::get("http://target.invalid/resource").unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    let requests = proxy.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].request_line, "GET http://target.invalid/resource HTTP/1.1");
    assert_eq!(requests[0].header("Proxy-Authorization"), None);
    assert_eq!(requests[1].header("Proxy-Authorization"), Some("Basic dXNlcjpwYXNz"));
    assert_eq!(msg.response_header().status_code(), 200);
}

#[test]
fn proxy_credentials_are_withheld_on_realm_mismatch() {
    let proxy = TestServer::start(|_, _| {
        Reply::text(
            407,
            "Proxy Authentication Required",
            &[("Proxy-Authenticate", "Basic realm=\"Other\"")],
            "",
        )
    });
    let sender = sender_with(proxied_options(proxy.port(), "Corp"));
    let mut msg = HttpMessage::get("http://target.invalid/").unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Proxy-Authorization"), None);
    assert_eq!(msg.response_header().status_code(), 407);
}

fn tunnel_proxy(realm: &'static str) -> TestServer {
    TestServer::start(move |request, _| match request.header("Proxy-Authorization") {
        Some(_) => Reply::Raw(b"HTTP/1.1 200 Connection established\r\n\r\n".to_vec()),
        None => {
            let challenge = format!("Basic realm=\"{realm}\"");
            Reply::text(
                407,
                "Proxy Authentication Required",
                &[("Proxy-Authenticate", challenge.as_str())],
                "",
            )
        }
    })
}

#[test]
fn tunnel_credentials_follow_a_matching_realm_challenge() {
    let proxy = tunnel_proxy("Corp");
    let sender = sender_with(proxied_options(proxy.port(), "Corp"));
    sender.set_max_retries_on_io_error(1);
    let mut msg = HttpMessage::get("https://target.invalid/").unwrap();

    // the tunnel opens but nothing speaks TLS behind it
    assert!(sender.send_and_receive(&mut msg).is_err());

    let requests = proxy.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| r.request_line == "CONNECT target.invalid:443 HTTP/1.1"));
    assert_eq!(requests[0].header("Proxy-Authorization"), None);
    assert_eq!(requests[1].header("Proxy-Authorization"), None);
    assert_eq!(requests[2].header("Proxy-Authorization"), Some("Basic dXNlcjpwYXNz"));
}

#[test]
fn tunnel_credentials_are_withheld_on_realm_mismatch() {
    let proxy = tunnel_proxy("Other");
    let sender = sender_with(proxied_options(proxy.port(), "Corp"));
    sender.set_max_retries_on_io_error(1);
    let mut msg = HttpMessage::get("https://target.invalid/").unwrap();

    sender.send_and_receive(&mut msg).unwrap();

    let requests = proxy.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.header("Proxy-Authorization").is_none()));
    assert_eq!(msg.response_header().status_code(), 407);
}

#[test]
fn redirects_are_followed_across_real_connections() {
    let server = TestServer::start(|request, _| {
        if request.request_line.starts_with("POST /start") {
            Reply::text(302, "Found", &[("Location", "/landing")], "")
        } else {
            Reply::text(200, "OK", &[], "landed")
        }
    });
    let sender = sender_with(options());
    let mut msg = HttpMessage::get(&server.url("/start")).unwrap();
    msg.request_header_mut().set_method("POST");
    msg.set_request_body("a=1");
    let config = HttpRequestConfig::builder().follow_redirects(true).build();

    sender.send_and_receive_with_config(&mut msg, &config).unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, b"a=1");
    assert_eq!(requests[1].request_line, "GET /landing HTTP/1.1");
    assert!(requests[1].body.is_empty());
    assert_eq!(msg.response_body().as_bytes(), b"landed");
}

#[test]
fn download_streams_the_body_to_a_file() {
    let server = TestServer::start(|_, _| Reply::text(200, "OK", &[], "file contents"));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("body.bin");
    let sender = sender_with(options());
    let mut msg = HttpMessage::get(&server.url("/download")).unwrap();

    sender
        .send_and_receive_to_file(&mut msg, &HttpRequestConfig::default(), &path)
        .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"file contents");
    assert!(msg.response_body().is_empty());
    assert_eq!(msg.response_header().status_code(), 200);
}
