use std::time::Duration;

use crate::network::proxy::{HttpProxy, HttpProxyExclusion, SocksProxy};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:100.0) Gecko/20100101 Firefox/100.0";

pub fn is_loopback_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    matches!(
        host.as_str(),
        "localhost" | "[::1]" | "::1" | "0.0.0.0" | "[::0]" | "::0"
    ) || host.starts_with("127.")
}

/// Connection settings shared by all senders.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    timeout: Duration,
    default_user_agent: String,
    use_global_http_state: bool,
    http_proxy: HttpProxy,
    http_proxy_enabled: bool,
    http_proxy_auth_enabled: bool,
    http_proxy_exclusions: Vec<HttpProxyExclusion>,
    socks_proxy: SocksProxy,
    socks_proxy_enabled: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            use_global_http_state: false,
            http_proxy: HttpProxy::default(),
            http_proxy_enabled: false,
            http_proxy_auth_enabled: false,
            http_proxy_exclusions: Vec::new(),
            socks_proxy: SocksProxy::default(),
            socks_proxy_enabled: false,
        }
    }
}

impl ConnectionOptions {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn default_user_agent(&self) -> &str {
        &self.default_user_agent
    }

    pub fn set_default_user_agent(&mut self, user_agent: &str) {
        self.default_user_agent = user_agent.to_string();
    }

    pub fn is_use_global_http_state(&self) -> bool {
        self.use_global_http_state
    }

    pub fn set_use_global_http_state(&mut self, value: bool) {
        self.use_global_http_state = value;
    }

    pub fn http_proxy(&self) -> &HttpProxy {
        &self.http_proxy
    }

    pub fn set_http_proxy(&mut self, proxy: HttpProxy) {
        self.http_proxy = proxy;
    }

    pub fn is_http_proxy_enabled(&self) -> bool {
        self.http_proxy_enabled
    }

    pub fn set_http_proxy_enabled(&mut self, enabled: bool) {
        self.http_proxy_enabled = enabled;
    }

    pub fn is_http_proxy_auth_enabled(&self) -> bool {
        self.http_proxy_auth_enabled
    }

    pub fn set_http_proxy_auth_enabled(&mut self, enabled: bool) {
        self.http_proxy_auth_enabled = enabled;
    }

    pub fn http_proxy_exclusions(&self) -> &[HttpProxyExclusion] {
        &self.http_proxy_exclusions
    }

    pub fn set_http_proxy_exclusions(&mut self, exclusions: Vec<HttpProxyExclusion>) {
        self.http_proxy_exclusions = exclusions;
    }

    pub fn socks_proxy(&self) -> &SocksProxy {
        &self.socks_proxy
    }

    pub fn set_socks_proxy(&mut self, proxy: SocksProxy) {
        self.socks_proxy = proxy;
    }

    pub fn is_socks_proxy_enabled(&self) -> bool {
        self.socks_proxy_enabled
    }

    pub fn set_socks_proxy_enabled(&mut self, enabled: bool) {
        self.socks_proxy_enabled = enabled;
    }

    /// Whether requests to `host` go through the HTTP proxy.
    pub fn is_use_http_proxy(&self, host: &str) -> bool {
        if !self.http_proxy_enabled || host.is_empty() {
            return false;
        }
        !self.http_proxy_exclusions.iter().any(|e| e.test(host))
    }

    /// Whether `host` should be resolved by the SOCKS proxy instead of locally.
    pub fn should_resolve_remote_hostname(&self, host: &str) -> bool {
        if !self.socks_proxy_enabled || is_loopback_host(host) {
            return false;
        }
        self.socks_proxy.use_dns()
    }
}
