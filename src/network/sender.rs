use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::RwLock;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{debug, warn};
use url::Url;

use crate::certificates::KeyStores;
use crate::network::error::{SendError, SendResult};
use crate::network::listeners::{HttpSenderListener, ListenerRegistry};
use crate::network::message::{
    authority, HttpMessage, HttpResponseHeader, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
    COOKIE, HOST, LOCATION, SET_COOKIE, TRANSFER_ENCODING, USER_AGENT,
};
use crate::network::negotiator::ProxyNegotiator;
use crate::network::options::ConnectionOptions;
use crate::network::request_config::HttpRequestConfig;
use crate::network::transport::{is_redirect, Exchange, RawResponse, ReqwestTransport, Transport};
use crate::network::user::User;

pub const PROXY_INITIATOR: i32 = 1;
pub const ACTIVE_SCANNER_INITIATOR: i32 = 2;
pub const SPIDER_INITIATOR: i32 = 3;
pub const FUZZER_INITIATOR: i32 = 4;
pub const AUTHENTICATION_INITIATOR: i32 = 5;
pub const MANUAL_REQUEST_INITIATOR: i32 = 6;
pub const CHECK_FOR_UPDATES_INITIATOR: i32 = 7;
pub const BEAN_SHELL_INITIATOR: i32 = 8;
pub const ACCESS_CONTROL_SCANNER_INITIATOR: i32 = 9;
pub const AJAX_SPIDER_INITIATOR: i32 = 10;
pub const FORCED_BROWSE_INITIATOR: i32 = 11;
pub const TOKEN_GENERATOR_INITIATOR: i32 = 12;
pub const WEB_SOCKET_INITIATOR: i32 = 13;
pub const AUTHENTICATION_HELPER_INITIATOR: i32 = 14;
pub const AUTHENTICATION_POLL_INITIATOR: i32 = 15;

pub const DEFAULT_MAX_REDIRECTS: u32 = 100;
pub const DEFAULT_MAX_RETRIES_ON_IO_ERROR: u32 = 3;

/// Collaborators shared by every sender of a session.
pub struct SenderServices {
    options: RwLock<ConnectionOptions>,
    key_stores: Arc<KeyStores>,
    global_cookies: Arc<Jar>,
    transport: Arc<dyn Transport>,
    use_client_certificate: AtomicBool,
}

impl SenderServices {
    pub fn new(options: ConnectionOptions, key_stores: Arc<KeyStores>, transport: Arc<dyn Transport>) -> Self {
        Self {
            options: RwLock::new(options),
            key_stores,
            global_cookies: Arc::new(Jar::default()),
            transport,
            use_client_certificate: AtomicBool::new(false),
        }
    }

    /// Services backed by the reqwest transport.
    pub fn with_reqwest(options: ConnectionOptions, key_stores: Arc<KeyStores>) -> Self {
        Self::new(options, key_stores, Arc::new(ReqwestTransport::new()))
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options.read().clone()
    }

    pub fn set_options(&self, options: ConnectionOptions) {
        *self.options.write() = options;
    }

    pub fn key_stores(&self) -> &Arc<KeyStores> {
        &self.key_stores
    }

    pub fn global_cookies(&self) -> &Arc<Jar> {
        &self.global_cookies
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_use_client_certificate(&self) -> bool {
        self.use_client_certificate.load(Ordering::Acquire)
    }

    pub fn set_use_client_certificate(&self, value: bool) {
        self.use_client_certificate.store(value, Ordering::Release);
    }
}

/// Which cookie jar a send reads and updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieUsage {
    Global,
    Local,
    Ignore,
}

/// Per-sender defaults, snapshotted at the start of every send.
#[derive(Clone)]
pub struct SenderContext {
    follow_redirects: bool,
    max_redirects: u32,
    max_retries_on_io_error: u32,
    use_cookies: bool,
    use_global_state: bool,
    remove_user_defined_auth_headers: bool,
    user: Option<Arc<dyn User>>,
    local_cookies: Arc<Jar>,
}

impl Default for SenderContext {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_retries_on_io_error: DEFAULT_MAX_RETRIES_ON_IO_ERROR,
            use_cookies: false,
            use_global_state: false,
            remove_user_defined_auth_headers: false,
            user: None,
            local_cookies: Arc::new(Jar::default()),
        }
    }
}

impl SenderContext {
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn max_retries_on_io_error(&self) -> u32 {
        self.max_retries_on_io_error
    }

    pub fn remove_user_defined_auth_headers(&self) -> bool {
        self.remove_user_defined_auth_headers
    }

    pub fn user(&self) -> Option<&Arc<dyn User>> {
        self.user.as_ref()
    }

    pub fn cookie_usage(&self, options: &ConnectionOptions) -> CookieUsage {
        if !self.use_cookies {
            CookieUsage::Ignore
        } else if self.use_global_state && options.is_use_global_http_state() {
            CookieUsage::Global
        } else {
            CookieUsage::Local
        }
    }
}

impl fmt::Debug for SenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderContext")
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("max_retries_on_io_error", &self.max_retries_on_io_error)
            .field("use_cookies", &self.use_cookies)
            .field("use_global_state", &self.use_global_state)
            .field("remove_user_defined_auth_headers", &self.remove_user_defined_auth_headers)
            .field("user", &self.user.as_ref().map(|u| u.name().to_string()))
            .finish_non_exhaustive()
    }
}

// the Hop struct carries what stays fixed across the hops of one send
struct Hop<'a> {
    config: &'a HttpRequestConfig,
    context: &'a SenderContext,
    download: Option<&'a Path>,
    follow_redirects: bool,
}

/// Sends messages, following redirects and retrying I/O failures, and notifies
/// its listeners of every hop.
///
/// A sender is safe to share between threads; each call works on the message it
/// was given and a snapshot of the sender's context.
pub struct HttpSender {
    services: Arc<SenderServices>,
    initiator: i32,
    listeners: ListenerRegistry,
    context: RwLock<SenderContext>,
}

impl HttpSender {
    pub fn new(services: Arc<SenderServices>, initiator: i32) -> Self {
        Self {
            services,
            initiator,
            listeners: ListenerRegistry::new(),
            context: RwLock::new(SenderContext::default()),
        }
    }

    pub fn initiator(&self) -> i32 {
        self.initiator
    }

    pub fn services(&self) -> &Arc<SenderServices> {
        &self.services
    }

    pub fn add_listener(&self, listener: Arc<dyn HttpSenderListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn HttpSenderListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn context(&self) -> SenderContext {
        self.context.read().clone()
    }

    pub fn set_follow_redirects(&self, value: bool) {
        self.context.write().follow_redirects = value;
    }

    pub fn set_max_redirects(&self, value: u32) {
        self.context.write().max_redirects = value;
    }

    /// Total attempts per hop; values below 1 still make one attempt.
    pub fn set_max_retries_on_io_error(&self, value: u32) {
        self.context.write().max_retries_on_io_error = value;
    }

    pub fn set_use_cookies(&self, value: bool) {
        self.context.write().use_cookies = value;
    }

    pub fn set_use_global_state(&self, value: bool) {
        self.context.write().use_global_state = value;
    }

    pub fn set_remove_user_defined_auth_headers(&self, value: bool) {
        self.context.write().remove_user_defined_auth_headers = value;
    }

    pub fn set_user(&self, user: Option<Arc<dyn User>>) {
        self.context.write().user = user;
    }

    pub fn send_and_receive(&self, msg: &mut HttpMessage) -> SendResult<()> {
        self.send(msg, &HttpRequestConfig::default(), None)
    }

    pub fn send_and_receive_with_config(
        &self,
        msg: &mut HttpMessage,
        config: &HttpRequestConfig,
    ) -> SendResult<()> {
        self.send(msg, config, None)
    }

    /// Streams the final response body into `path`; only headers stay in `msg`.
    pub fn send_and_receive_to_file(
        &self,
        msg: &mut HttpMessage,
        config: &HttpRequestConfig,
        path: &Path,
    ) -> SendResult<()> {
        self.send(msg, config, Some(path))
    }

    fn send(&self, msg: &mut HttpMessage, config: &HttpRequestConfig, download: Option<&Path>) -> SendResult<()> {
        let context = self.context();
        let hop = Hop {
            config,
            context: &context,
            download,
            follow_redirects: config.follow_redirects().unwrap_or(context.follow_redirects),
        };
        let max_redirects = config.max_redirects().unwrap_or(context.max_redirects);

        self.send_hop(msg, &hop)?;
        if !hop.follow_redirects {
            return Ok(());
        }
        if let Some(validator) = config.redirection_validator() {
            validator.notify_message_received(msg);
        }

        let mut redirects = 0;
        while is_redirect(msg.response_header().status_code()) {
            if redirects >= max_redirects {
                debug!("Reached the maximum of {max_redirects} redirects");
                break;
            }
            let Some(location) = msg.response_header().header(LOCATION) else {
                debug!("Redirect without {LOCATION} header, not following");
                break;
            };
            let target = msg
                .request_header()
                .uri()
                .join(location.trim())
                .map_err(|source| SendError::InvalidRedirectLocation {
                    location: location.to_string(),
                    source,
                })?;
            if let Some(validator) = config.redirection_validator() {
                if !validator.is_valid(&target) {
                    debug!("Redirection to {target} rejected by validator");
                    break;
                }
            }

            prepare_redirect(msg, target);
            redirects += 1;
            self.send_hop(msg, &hop)?;
            if let Some(validator) = config.redirection_validator() {
                validator.notify_message_received(msg);
            }
        }
        Ok(())
    }

    // one hop: request notification, user handling, exchange, response notification
    fn send_hop(&self, msg: &mut HttpMessage, hop: &Hop<'_>) -> SendResult<()> {
        let notify = hop.config.notify_listeners();
        if notify {
            self.listeners.notify_request(msg, self.initiator, self)?;
        }

        let user = msg.requesting_user().cloned().or_else(|| hop.context.user.clone());
        let user_defined_auth = msg.request_header().header(AUTHORIZATION).map(str::to_string);
        if let Some(user) = user.as_ref() {
            match self.initiator {
                AUTHENTICATION_INITIATOR => {}
                AUTHENTICATION_POLL_INITIATOR => user.process_message_to_match_authenticated_session(msg),
                _ => user.process_message_to_match_user(msg),
            }
        }

        self.transmit(msg, hop)?;

        if let Some(user) = user.as_ref() {
            if self.initiator != AUTHENTICATION_INITIATOR
                && self.initiator != AUTHENTICATION_POLL_INITIATOR
                && !msg.request_header().is_image()
                && !user.is_authenticated(msg)
            {
                debug!("User {} is not authenticated, authenticating and resending", user.name());
                user.queue_authentication(msg);
                user.process_message_to_match_user(msg);
                self.transmit(msg, hop)?;
            }
        }

        if hop.context.remove_user_defined_auth_headers
            && matches!(msg.response_header().status_code(), 401 | 403)
            && user_defined_auth.is_some()
            && msg.request_header().header(AUTHORIZATION) == user_defined_auth.as_deref()
        {
            debug!(
                "Removing user defined {AUTHORIZATION} after {}",
                msg.response_header().status_code()
            );
            msg.request_header_mut().headers_mut().remove(AUTHORIZATION);
            if let Some(user) = user.as_ref() {
                user.process_message_to_match_user(msg);
            }
            self.transmit(msg, hop)?;
        }

        if notify {
            self.listeners.notify_response(msg, self.initiator, self)?;
        }
        Ok(())
    }

    // puts the request on the wire, retrying I/O failures on the same exchange
    fn transmit(&self, msg: &mut HttpMessage, hop: &Hop<'_>) -> SendResult<()> {
        let options = self.services.options();
        let negotiator = ProxyNegotiator::new(&options);
        let url = msg.request_header().uri().clone();

        if !msg.request_header().headers().contains(HOST) {
            if let Some(host) = authority(&url) {
                msg.request_header_mut().set_header(HOST, host);
            }
        }

        let jar = match hop.context.cookie_usage(&options) {
            CookieUsage::Global => Some(Arc::clone(&self.services.global_cookies)),
            CookieUsage::Local => Some(Arc::clone(&hop.context.local_cookies)),
            CookieUsage::Ignore => None,
        };

        let mut headers = msg.request_header().headers().clone();
        if !headers.contains(USER_AGENT) && !options.default_user_agent().is_empty() {
            headers.set(USER_AGENT, options.default_user_agent());
        }
        if let Some(stored) = jar.as_ref().and_then(|jar| jar.cookies(&url)) {
            if let Ok(stored) = stored.to_str() {
                let merged = merge_cookie_header(headers.get(COOKIE), stored);
                headers.set(COOKIE, merged);
            }
        }

        let identity = if self.services.is_use_client_certificate() {
            self.services.key_stores.active_identity()
        } else {
            None
        };
        let exchange = Exchange {
            method: msg.request_header().method().to_string(),
            url: url.clone(),
            headers,
            body: msg.request_body().as_bytes().to_vec(),
            route: negotiator.route_for(&url),
            identity,
            timeout: hop.config.response_timeout().unwrap_or(options.timeout()),
            download: hop.download.map(Path::to_path_buf),
            buffer_redirects: hop.follow_redirects,
        };

        let attempts = hop.context.max_retries_on_io_error.max(1);
        debug!("Sending {} {}", exchange.method, url);
        msg.set_time_sent(SystemTime::now());
        let started = Instant::now();
        let mut attempt = 1;
        let result = loop {
            let mut current = exchange.clone();
            match negotiator.execute(
                self.services.transport.as_ref(),
                &mut current,
                hop.context.remove_user_defined_auth_headers,
            ) {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("I/O error on attempt {attempt}/{attempts} for {url}, retrying: {e}");
                    attempt += 1;
                }
                other => break other,
            }
        };
        let elapsed = started.elapsed();
        msg.set_time_elapsed(elapsed);

        match result {
            Ok(response) => {
                debug!("Received {} for {url} in {elapsed:?}", response.status);
                if let Some(jar) = jar.as_ref() {
                    store_cookies(jar, &response, &url);
                }
                apply_response(msg, response);
                Ok(())
            }
            Err(e) => {
                debug!("Failed to send {url} after {attempt} attempt(s): {e}");
                msg.set_response_from_target_host(false);
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSender")
            .field("initiator", &self.initiator)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

fn apply_response(msg: &mut HttpMessage, response: RawResponse) {
    let RawResponse {
        version,
        status,
        reason,
        mut headers,
        body,
        downloaded,
    } = response;

    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .any(|te| te.to_ascii_lowercase().contains("chunked"));
    if chunked {
        headers.remove(TRANSFER_ENCODING);
        let length = downloaded.unwrap_or(body.len() as u64);
        headers.set(CONTENT_LENGTH, length.to_string());
    }

    msg.set_response_header(HttpResponseHeader::new(version, status, reason, headers));
    msg.set_response_body(body);
    msg.set_response_from_target_host(true);
}

fn store_cookies(jar: &Jar, response: &RawResponse, url: &Url) {
    let values: Vec<HeaderValue> = response
        .headers
        .get_all(SET_COOKIE)
        .into_iter()
        .filter_map(|value| HeaderValue::from_str(value).ok())
        .collect();
    if !values.is_empty() {
        jar.set_cookies(&mut values.iter(), url);
    }
}

/// Adds stored cookies to a request's `Cookie` value; cookies the request
/// already names win.
pub fn merge_cookie_header(existing: Option<&str>, stored: &str) -> String {
    let Some(existing) = existing.map(str::trim).filter(|e| !e.is_empty()) else {
        return stored.to_string();
    };
    let present: Vec<&str> = existing
        .split(';')
        .filter_map(|pair| pair.split('=').next())
        .map(str::trim)
        .collect();
    let mut merged = existing.to_string();
    for pair in stored.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let name = pair.split('=').next().unwrap_or_default().trim();
        if !present.contains(&name) {
            merged.push_str("; ");
            merged.push_str(pair);
        }
    }
    merged
}

// rewrites the request of `msg` into the next hop towards `target`
fn prepare_redirect(msg: &mut HttpMessage, target: Url) {
    let status = msg.response_header().status_code();
    let method = msg.request_header().method().to_ascii_uppercase();
    let to_get = match status {
        301 | 302 => method == "POST",
        303 => method != "GET" && method != "HEAD",
        _ => false,
    };

    let host = authority(&target);
    let header = msg.request_header_mut();
    if to_get {
        header.set_method("GET");
        header.headers_mut().remove(CONTENT_TYPE);
        header.headers_mut().remove(CONTENT_LENGTH);
    }
    header.set_uri(target);
    if let Some(host) = host {
        header.set_header(HOST, host);
    }
    if to_get {
        msg.request_body_mut().clear();
    }
    msg.clear_response();
}
