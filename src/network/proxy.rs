use std::fmt;
use std::hash::{Hash, Hasher};

use regex::{Regex, RegexBuilder};

use crate::network::error::ProxyConfigError;

// the PasswordAuthentication struct holds proxy credentials, the password never shows in Debug
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct PasswordAuthentication {
    user_name: String,
    password: String,
}

impl PasswordAuthentication {
    pub fn new(user_name: &str, password: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            password: password.to_string(),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for PasswordAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordAuthentication")
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .finish()
    }
}

fn validate_endpoint(host: &str, port: u32) -> Result<(), ProxyConfigError> {
    if host.trim().is_empty() {
        return Err(ProxyConfigError::EmptyHost);
    }
    if !(1..=65535).contains(&port) {
        return Err(ProxyConfigError::InvalidPort(port));
    }
    Ok(())
}

/// Forward HTTP proxy. Equality is by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HttpProxy {
    host: String,
    port: u16,
    realm: String,
    credentials: PasswordAuthentication,
}

impl HttpProxy {
    pub fn new(
        host: &str,
        port: u32,
        realm: &str,
        credentials: PasswordAuthentication,
    ) -> Result<Self, ProxyConfigError> {
        validate_endpoint(host, port)?;
        Ok(Self {
            host: host.to_string(),
            port: port as u16,
            realm: realm.to_string(),
            credentials,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn credentials(&self) -> &PasswordAuthentication {
        &self.credentials
    }
}

impl Default for HttpProxy {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8090,
            realm: String::new(),
            credentials: PasswordAuthentication::default(),
        }
    }
}

impl fmt::Display for HttpProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Host={}, Port={}, Realm={}, UserName={}, Password=***]",
            self.host,
            self.port,
            self.realm,
            self.credentials.user_name()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocksVersion {
    Socks4a,
    Socks5,
}

impl SocksVersion {
    /// Exactly `"4"` selects SOCKS4A, anything else (including nothing) SOCKS5.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("4") => Self::Socks4a,
            _ => Self::Socks5,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Socks4a => 4,
            Self::Socks5 => 5,
        }
    }
}

impl fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocksProxy {
    host: String,
    port: u16,
    version: SocksVersion,
    use_dns: bool,
    credentials: PasswordAuthentication,
}

impl SocksProxy {
    pub fn new(
        host: &str,
        port: u32,
        version: SocksVersion,
        use_dns: bool,
        credentials: PasswordAuthentication,
    ) -> Result<Self, ProxyConfigError> {
        validate_endpoint(host, port)?;
        Ok(Self {
            host: host.to_string(),
            port: port as u16,
            version,
            use_dns,
            credentials,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn version(&self) -> SocksVersion {
        self.version
    }

    /// Whether host names are resolved by the proxy.
    pub fn use_dns(&self) -> bool {
        self.use_dns
    }

    pub fn credentials(&self) -> &PasswordAuthentication {
        &self.credentials
    }
}

impl Default for SocksProxy {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1080,
            version: SocksVersion::Socks5,
            use_dns: true,
            credentials: PasswordAuthentication::default(),
        }
    }
}

impl fmt::Display for SocksProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Host={}, Port={}, Version={}, UseDns={}, UserName={}, Password=***]",
            self.host,
            self.port,
            self.version,
            self.use_dns,
            self.credentials.user_name()
        )
    }
}

/// Host pattern that bypasses the HTTP proxy. The pattern must match the
/// whole host name, ignoring case.
#[derive(Clone, Debug)]
pub struct HttpProxyExclusion {
    pattern: String,
    host: Regex,
    enabled: bool,
}

impl HttpProxyExclusion {
    pub fn new(pattern: &str, enabled: bool) -> Result<Self, ProxyConfigError> {
        let host = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(true)
            .build()
            .map_err(|e| ProxyConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            host,
            enabled,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn test(&self, host: &str) -> bool {
        self.enabled && self.host.is_match(host)
    }
}

impl PartialEq for HttpProxyExclusion {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.enabled == other.enabled
    }
}

impl Eq for HttpProxyExclusion {}

impl Hash for HttpProxyExclusion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
        self.enabled.hash(state);
    }
}
