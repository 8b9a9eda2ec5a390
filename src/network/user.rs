use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::network::message::{HttpMessage, AUTHORIZATION};

/// Identity whose credentials are injected into outgoing requests.
pub trait User: Send + Sync {
    fn name(&self) -> &str;

    /// Adds whatever the request needs to be sent as this user.
    fn process_message_to_match_user(&self, msg: &mut HttpMessage);

    /// Variant used while polling an authentication endpoint.
    fn process_message_to_match_authenticated_session(&self, msg: &mut HttpMessage) {
        self.process_message_to_match_user(msg);
    }

    /// Inspects a response; `false` makes the sender authenticate and resend once.
    fn is_authenticated(&self, _msg: &HttpMessage) -> bool {
        true
    }

    fn queue_authentication(&self, _msg: &HttpMessage) {}
}

// the BasicAuthUser struct sends fixed HTTP Basic credentials
#[derive(Clone)]
pub struct BasicAuthUser {
    name: String,
    username: String,
    password: String,
}

impl BasicAuthUser {
    pub fn new(name: &str, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn header_value(&self) -> String {
        basic_credentials(&self.username, &self.password)
    }
}

impl User for BasicAuthUser {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_message_to_match_user(&self, msg: &mut HttpMessage) {
        msg.request_header_mut()
            .set_header(AUTHORIZATION, self.header_value());
    }

    fn is_authenticated(&self, msg: &HttpMessage) -> bool {
        msg.response_header().status_code() != 401
    }
}

/// `Basic base64(user:password)`.
pub fn basic_credentials(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
