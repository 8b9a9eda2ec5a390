//! The HTTP sender engine: message model, proxy negotiation, the transport
//! boundary and the listener pipeline.

pub mod error;
pub mod listeners;
pub mod message;
pub mod negotiator;
pub mod options;
pub mod proxy;
pub mod request_config;
pub mod sender;
pub mod transport;
pub mod user;

pub use error::{ProxyConfigError, SendError, SendResult, TransportError};
pub use listeners::{HttpSenderListener, ListenerError, ListenerResult};
pub use message::{HeaderFields, HttpMessage, HttpRequestHeader, HttpResponseHeader};
pub use options::ConnectionOptions;
pub use proxy::{HttpProxy, HttpProxyExclusion, PasswordAuthentication, SocksProxy, SocksVersion};
pub use request_config::{HttpRequestConfig, RedirectionValidator};
pub use sender::{CookieUsage, HttpSender, SenderContext, SenderServices};
pub use transport::{ReqwestTransport, Transport};
pub use user::{BasicAuthUser, User};
