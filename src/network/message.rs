use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use url::Url;

use crate::network::user::User;

pub const HOST: &str = "Host";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const LOCATION: &str = "Location";
pub const AUTHORIZATION: &str = "Authorization";
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
pub const COOKIE: &str = "Cookie";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const USER_AGENT: &str = "User-Agent";

pub const HTTP11: &str = "HTTP/1.1";

// the HeaderFields struct keeps header lines in wire order, names compared case-insensitively
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderFields {
    fields: Vec<(String, String)>,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces the first field with this name in place and drops the others,
    /// appending a new field when none exists.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(idx) => {
                self.fields[idx].1 = value;
                let mut seen = 0usize;
                self.fields.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderFields {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Request target. The base URL is derived on first use and kept for the
/// lifetime of the value; changing the target means building a new one.
#[derive(Clone, Debug)]
pub struct RequestUri {
    url: Url,
    base_url: OnceLock<String>,
}

impl RequestUri {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            base_url: OnceLock::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `scheme://host[:port]`, the port only when it is not the scheme default.
    pub fn base_url(&self) -> &str {
        self.base_url.get_or_init(|| {
            let mut base = format!("{}://", self.url.scheme());
            if let Some(authority) = authority(&self.url) {
                base.push_str(&authority);
            }
            base
        })
    }
}

impl PartialEq for RequestUri {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for RequestUri {}

/// `host[:port]` as it belongs in a `Host` header.
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host()?.to_string();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestHeader {
    method: String,
    uri: RequestUri,
    version: String,
    headers: HeaderFields,
}

impl HttpRequestHeader {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            uri: RequestUri::new(url),
            version: HTTP11.to_string(),
            headers: HeaderFields::new(),
        }
    }

    pub fn parse(method: &str, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn uri(&self) -> &Url {
        self.uri.url()
    }

    pub fn set_uri(&mut self, url: Url) {
        self.uri = RequestUri::new(url);
    }

    pub fn base_url(&self) -> &str {
        self.uri.base_url()
    }

    pub fn host_name(&self) -> String {
        self.uri.url().host_str().unwrap_or_default().to_string()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderFields {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn is_secure(&self) -> bool {
        self.uri.url().scheme().eq_ignore_ascii_case("https")
    }

    /// Whether the path names an image resource, judged by its extension.
    pub fn is_image(&self) -> bool {
        let path = self.uri.url().path();
        let Some((_, extension)) = path.rsplit_once('.') else {
            return false;
        };
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

const IMAGE_EXTENSIONS: [&str; 8] = ["bmp", "ico", "jpg", "jpeg", "gif", "tiff", "tif", "png"];

impl fmt::Display for HttpRequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri.url(), self.version)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponseHeader {
    version: String,
    status_code: u16,
    reason: String,
    headers: HeaderFields,
}

impl HttpResponseHeader {
    pub fn new(
        version: impl Into<String>,
        status_code: u16,
        reason: impl Into<String>,
        headers: HeaderFields,
    ) -> Self {
        Self {
            version: version.into(),
            status_code,
            reason: reason.into(),
            headers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status_code == 0
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderFields {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get(CONTENT_LENGTH)?.trim().parse().ok()
    }
}

impl fmt::Display for HttpResponseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(f, "{} {} {}\r\n", self.version, self.status_code, self.reason)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpBody {
    bytes: Vec<u8>,
}

impl HttpBody {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn set(&mut self, bytes: impl Into<Vec<u8>>) {
        self.bytes = bytes.into();
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for HttpBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

/// A request and (once sent) its response. The same value is updated in
/// place for every hop of a send, so after a followed redirect chain it holds
/// the last hop.
#[derive(Clone)]
pub struct HttpMessage {
    request_header: HttpRequestHeader,
    request_body: HttpBody,
    response_header: HttpResponseHeader,
    response_body: HttpBody,
    response_from_target_host: bool,
    time_sent: Option<SystemTime>,
    time_elapsed: Option<Duration>,
    requesting_user: Option<Arc<dyn User>>,
}

impl HttpMessage {
    pub fn new(request_header: HttpRequestHeader) -> Self {
        Self {
            request_header,
            request_body: HttpBody::default(),
            response_header: HttpResponseHeader::default(),
            response_body: HttpBody::default(),
            response_from_target_host: false,
            time_sent: None,
            time_elapsed: None,
            requesting_user: None,
        }
    }

    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(HttpRequestHeader::parse("GET", url)?))
    }

    pub fn request_header(&self) -> &HttpRequestHeader {
        &self.request_header
    }

    pub fn request_header_mut(&mut self) -> &mut HttpRequestHeader {
        &mut self.request_header
    }

    pub fn set_request_header(&mut self, header: HttpRequestHeader) {
        self.request_header = header;
    }

    pub fn request_body(&self) -> &HttpBody {
        &self.request_body
    }

    pub fn request_body_mut(&mut self) -> &mut HttpBody {
        &mut self.request_body
    }

    pub fn set_request_body(&mut self, body: impl Into<Vec<u8>>) {
        self.request_body.set(body);
    }

    pub fn response_header(&self) -> &HttpResponseHeader {
        &self.response_header
    }

    pub fn response_header_mut(&mut self) -> &mut HttpResponseHeader {
        &mut self.response_header
    }

    pub fn set_response_header(&mut self, header: HttpResponseHeader) {
        self.response_header = header;
    }

    pub fn response_body(&self) -> &HttpBody {
        &self.response_body
    }

    pub fn set_response_body(&mut self, body: impl Into<Vec<u8>>) {
        self.response_body.set(body);
    }

    pub fn clear_response(&mut self) {
        self.response_header = HttpResponseHeader::default();
        self.response_body.clear();
    }

    pub fn is_response_from_target_host(&self) -> bool {
        self.response_from_target_host
    }

    pub fn set_response_from_target_host(&mut self, value: bool) {
        self.response_from_target_host = value;
    }

    pub fn time_sent(&self) -> Option<SystemTime> {
        self.time_sent
    }

    pub fn set_time_sent(&mut self, time: SystemTime) {
        self.time_sent = Some(time);
    }

    pub fn time_elapsed(&self) -> Option<Duration> {
        self.time_elapsed
    }

    pub fn set_time_elapsed(&mut self, elapsed: Duration) {
        self.time_elapsed = Some(elapsed);
    }

    pub fn requesting_user(&self) -> Option<&Arc<dyn User>> {
        self.requesting_user.as_ref()
    }

    pub fn set_requesting_user(&mut self, user: Option<Arc<dyn User>>) {
        self.requesting_user = user;
    }

    /// Copy of the request side only.
    pub fn clone_request(&self) -> Self {
        let mut copy = Self::new(self.request_header.clone());
        copy.request_body = self.request_body.clone();
        copy.requesting_user = self.requesting_user.clone();
        copy
    }
}

impl fmt::Debug for HttpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMessage")
            .field("request_header", &self.request_header)
            .field("request_body_len", &self.request_body.len())
            .field("response_header", &self.response_header)
            .field("response_body_len", &self.response_body.len())
            .field("response_from_target_host", &self.response_from_target_host)
            .finish_non_exhaustive()
    }
}
