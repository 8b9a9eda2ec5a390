use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::certificates::ClientIdentity;
use crate::network::error::TransportError;
use crate::network::message::HeaderFields;
use crate::network::proxy::{HttpProxy, SocksProxy, SocksVersion};
use crate::network::user::basic_credentials;

// largest CONNECT response head read before giving up
const MAX_CONNECT_HEAD: usize = 16 * 1024;

/// How the connection for an exchange is established.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Direct,
    /// Forward proxy. With `tunnel_credentials` the configured credentials are
    /// presented when opening a CONNECT tunnel.
    HttpProxy {
        proxy: HttpProxy,
        tunnel_credentials: bool,
    },
    /// SOCKS tunnel; `remote_dns` makes the proxy resolve the target host.
    Socks { proxy: SocksProxy, remote_dns: bool },
}

impl Route {
    pub fn is_proxied(&self) -> bool {
        !matches!(self, Route::Direct)
    }

    fn proxy_host(&self) -> Option<&str> {
        match self {
            Route::Direct => None,
            Route::HttpProxy { proxy, .. } => Some(proxy.host()),
            Route::Socks { proxy, .. } => Some(proxy.host()),
        }
    }
}

/// One request as it goes on the wire.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub method: String,
    pub url: Url,
    pub headers: HeaderFields,
    pub body: Vec<u8>,
    pub route: Route,
    pub identity: Option<ClientIdentity>,
    pub timeout: Duration,
    /// Stream the response body into this file instead of memory.
    pub download: Option<PathBuf>,
    /// Keep redirect bodies in memory even when downloading.
    pub buffer_redirects: bool,
}

/// Response as read from the connection, body already de-chunked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderFields,
    pub body: Vec<u8>,
    /// Bytes written to the download file, when the body went to disk.
    pub downloaded: Option<u64>,
}

impl RawResponse {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            version: crate::network::message::HTTP11.to_string(),
            status,
            reason: reason.to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// A single request/response exchange with the network.
pub trait Transport: Send + Sync {
    fn exchange(&self, exchange: &Exchange) -> Result<RawResponse, TransportError>;

    /// Asks the forward proxy of `exchange` to open a tunnel to its target and
    /// returns the proxy's answer; the tunnel itself is not used.
    fn proxy_connect(&self, exchange: &Exchange) -> Result<RawResponse, TransportError>;
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    route: Route,
    identity: Option<(u64, u64)>,
}

/// Blocking reqwest transport. One client (and connection pool) per route and
/// client identity; redirects are never followed here.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, exchange: &Exchange) -> Result<Client, TransportError> {
        let key = ClientKey {
            route: exchange.route.clone(),
            identity: exchange.identity.as_ref().map(ClientIdentity::cache_key),
        };
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&exchange.route, exchange.identity.as_ref())?;
        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(route: &Route, identity: Option<&ClientIdentity>) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true)
        .http1_only()
        .no_proxy();

    match route {
        Route::Direct => {}
        Route::HttpProxy {
            proxy,
            tunnel_credentials,
        } => {
            let mut forward = reqwest::Proxy::all(format!("http://{}:{}", proxy.host(), proxy.port()))
                .map_err(|e| TransportError::InvalidRequest(format!("invalid proxy {proxy}: {e}")))?;
            if *tunnel_credentials {
                forward = forward.basic_auth(
                    proxy.credentials().user_name(),
                    proxy.credentials().password(),
                );
            }
            builder = builder.proxy(forward);
        }
        Route::Socks { proxy, remote_dns } => {
            builder = builder.proxy(socks_proxy(proxy, *remote_dns)?);
        }
    }

    if let Some(identity) = identity {
        let identity = identity
            .to_reqwest()
            .map_err(|e| TransportError::Tls(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| TransportError::Tls(format!("failed to build http client: {e}")))
}

fn socks_proxy(proxy: &SocksProxy, remote_dns: bool) -> Result<reqwest::Proxy, TransportError> {
    let scheme = match (proxy.version(), remote_dns) {
        (SocksVersion::Socks5, true) => "socks5h",
        (SocksVersion::Socks5, false) => "socks5",
        (SocksVersion::Socks4a, true) => "socks4a",
        (SocksVersion::Socks4a, false) => "socks4",
    };
    let invalid = |e: String| TransportError::InvalidRequest(format!("invalid SOCKS proxy {proxy}: {e}"));
    let mut url = Url::parse(&format!("{scheme}://{}:{}", proxy.host(), proxy.port()))
        .map_err(|e| invalid(e.to_string()))?;
    let credentials = proxy.credentials();
    if !credentials.user_name().is_empty() {
        url.set_username(credentials.user_name())
            .map_err(|_| invalid("bad user name".to_string()))?;
        url.set_password(Some(credentials.password()))
            .map_err(|_| invalid("bad password".to_string()))?;
    }
    reqwest::Proxy::all(url.as_str()).map_err(|e| invalid(e.to_string()))
}

fn header_map(headers: &HeaderFields) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header value for '{name}': {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn classify(err: reqwest::Error, exchange: &Exchange) -> TransportError {
    let message = error_chain(&err);
    let lower = message.to_ascii_lowercase();
    if err.is_timeout() {
        return TransportError::Timeout(exchange.timeout);
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(message);
    }
    if err.is_connect() {
        if lower.contains("dns error") || lower.contains("failed to lookup address") {
            // behind an HTTP proxy the target is never resolved locally
            let from_outgoing_proxy = matches!(exchange.route, Route::HttpProxy { .. })
                || matches!(exchange.route, Route::Socks { remote_dns: true, .. });
            let host = if from_outgoing_proxy {
                exchange.route.proxy_host().unwrap_or_default().to_string()
            } else {
                exchange.url.host_str().unwrap_or_default().to_string()
            };
            return TransportError::UnknownHost {
                host,
                from_outgoing_proxy,
            };
        }
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            return TransportError::Tls(message);
        }
        let target = match exchange.route.proxy_host() {
            Some(host) => host.to_string(),
            None => exchange.url.host_str().unwrap_or_default().to_string(),
        };
        return TransportError::Connect { target, message };
    }
    if err.is_decode() || lower.contains("invalid http") || lower.contains("parse error") {
        return TransportError::Malformed(message);
    }
    TransportError::Io(message)
}

impl Transport for ReqwestTransport {
    fn exchange(&self, exchange: &Exchange) -> Result<RawResponse, TransportError> {
        let client = self.client(exchange)?;
        let method = reqwest::Method::from_bytes(exchange.method.as_bytes()).map_err(|e| {
            TransportError::InvalidRequest(format!("method '{}': {e}", exchange.method))
        })?;

        let mut request = client
            .request(method, exchange.url.clone())
            .headers(header_map(&exchange.headers)?)
            .timeout(exchange.timeout);
        if !exchange.body.is_empty() {
            request = request.body(exchange.body.clone());
        }

        debug!(
            method = %exchange.method,
            url = %exchange.url,
            proxied = exchange.route.is_proxied(),
            "exchange"
        );
        let mut response = request.send().map_err(|e| classify(e, exchange))?;

        let status = response.status();
        let mut raw = RawResponse {
            version: format!("{:?}", response.version()),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body: Vec::new(),
            downloaded: None,
        };

        match &exchange.download {
            Some(path) if !(exchange.buffer_redirects && is_redirect(raw.status)) => {
                let mut file = File::create(path).map_err(|source| TransportError::Download {
                    path: path.clone(),
                    source,
                })?;
                let written = response
                    .copy_to(&mut file)
                    .map_err(|e| classify(e, exchange))?;
                raw.downloaded = Some(written);
            }
            _ => {
                raw.body = response
                    .bytes()
                    .map_err(|e| classify(e, exchange))?
                    .to_vec();
            }
        }
        Ok(raw)
    }

    fn proxy_connect(&self, exchange: &Exchange) -> Result<RawResponse, TransportError> {
        let Route::HttpProxy {
            proxy,
            tunnel_credentials,
        } = &exchange.route
        else {
            return Err(TransportError::InvalidRequest(
                "CONNECT needs a forward proxy route".to_string(),
            ));
        };
        let authority = tunnel_authority(&exchange.url)?;
        let target = format!("{}:{}", proxy.host(), proxy.port());
        let io_error = |e: std::io::Error| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout(exchange.timeout),
            _ => TransportError::Io(e.to_string()),
        };

        let mut stream = TcpStream::connect((proxy.host(), proxy.port())).map_err(|e| {
            TransportError::Connect {
                target: target.clone(),
                message: e.to_string(),
            }
        })?;
        stream.set_read_timeout(Some(exchange.timeout)).map_err(io_error)?;
        stream.set_write_timeout(Some(exchange.timeout)).map_err(io_error)?;

        let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
        if *tunnel_credentials {
            let credentials = proxy.credentials();
            request.push_str(&format!(
                "Proxy-Authorization: {}\r\n",
                basic_credentials(credentials.user_name(), credentials.password())
            ));
        }
        request.push_str("\r\n");
        debug!(proxy = %target, tunnel = %authority, "CONNECT");
        stream.write_all(request.as_bytes()).map_err(io_error)?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).map_err(io_error)?;
            if n == 0 {
                return Err(TransportError::Io(format!(
                    "proxy {target} closed the connection before answering CONNECT"
                )));
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(response) = parse_connect_response(&buf)? {
                return Ok(response);
            }
            if buf.len() > MAX_CONNECT_HEAD {
                return Err(TransportError::Malformed(format!(
                    "CONNECT response from {target} exceeds {MAX_CONNECT_HEAD} bytes"
                )));
            }
        }
    }
}

fn tunnel_authority(url: &Url) -> Result<String, TransportError> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidRequest(format!("no host in {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::InvalidRequest(format!("no port for {url}")))?;
    Ok(format!("{host}:{port}"))
}

// None while the head is still incomplete
fn parse_connect_response(buf: &[u8]) -> Result<Option<RawResponse>, TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut headers);
    let status = response
        .parse(buf)
        .map_err(|e| TransportError::Malformed(format!("CONNECT response: {e}")))?;
    if status.is_partial() {
        return Ok(None);
    }

    let version = match response.version {
        Some(0) => "HTTP/1.0",
        _ => crate::network::message::HTTP11,
    };
    Ok(Some(RawResponse {
        version: version.to_string(),
        status: response.code.unwrap_or_default(),
        reason: response.reason.unwrap_or_default().to_string(),
        headers: response
            .headers
            .iter()
            .map(|header| {
                (
                    header.name.to_string(),
                    String::from_utf8_lossy(header.value).into_owned(),
                )
            })
            .collect(),
        body: Vec::new(),
        downloaded: None,
    }))
}
