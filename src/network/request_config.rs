use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::network::message::HttpMessage;

/// Decides whether a redirect is followed and sees every hop's response.
pub trait RedirectionValidator: Send + Sync {
    fn is_valid(&self, uri: &Url) -> bool;

    fn notify_message_received(&self, _msg: &HttpMessage) {}
}

/// Per-call overrides. Unset fields fall back to the sender's context.
#[derive(Clone)]
pub struct HttpRequestConfig {
    follow_redirects: Option<bool>,
    max_redirects: Option<u32>,
    notify_listeners: bool,
    response_timeout: Option<Duration>,
    redirection_validator: Option<Arc<dyn RedirectionValidator>>,
}

impl Default for HttpRequestConfig {
    fn default() -> Self {
        Self {
            follow_redirects: None,
            max_redirects: None,
            notify_listeners: true,
            response_timeout: None,
            redirection_validator: None,
        }
    }
}

impl HttpRequestConfig {
    pub fn builder() -> HttpRequestConfigBuilder {
        HttpRequestConfigBuilder::default()
    }

    pub fn follow_redirects(&self) -> Option<bool> {
        self.follow_redirects
    }

    pub fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    pub fn notify_listeners(&self) -> bool {
        self.notify_listeners
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    pub fn redirection_validator(&self) -> Option<&Arc<dyn RedirectionValidator>> {
        self.redirection_validator.as_ref()
    }
}

impl fmt::Debug for HttpRequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequestConfig")
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("notify_listeners", &self.notify_listeners)
            .field("response_timeout", &self.response_timeout)
            .field(
                "redirection_validator",
                &self.redirection_validator.is_some(),
            )
            .finish()
    }
}

#[derive(Default)]
pub struct HttpRequestConfigBuilder {
    config: HttpRequestConfig,
}

impl HttpRequestConfigBuilder {
    pub fn follow_redirects(mut self, value: bool) -> Self {
        self.config.follow_redirects = Some(value);
        self
    }

    pub fn max_redirects(mut self, value: u32) -> Self {
        self.config.max_redirects = Some(value);
        self
    }

    pub fn notify_listeners(mut self, value: bool) -> Self {
        self.config.notify_listeners = value;
        self
    }

    pub fn response_timeout(mut self, value: Duration) -> Self {
        self.config.response_timeout = Some(value);
        self
    }

    pub fn redirection_validator(mut self, validator: Arc<dyn RedirectionValidator>) -> Self {
        self.config.redirection_validator = Some(validator);
        self
    }

    pub fn build(self) -> HttpRequestConfig {
        self.config
    }
}
