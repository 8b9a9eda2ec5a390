use tracing::debug;
use url::Url;

use crate::network::error::TransportError;
use crate::network::message::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use crate::network::options::ConnectionOptions;
use crate::network::transport::{Exchange, RawResponse, Route, Transport};
use crate::network::user::basic_credentials;

/// Picks the route for a request and answers forward-proxy challenges.
pub struct ProxyNegotiator<'a> {
    options: &'a ConnectionOptions,
}

impl<'a> ProxyNegotiator<'a> {
    pub fn new(options: &'a ConnectionOptions) -> Self {
        Self { options }
    }

    /// HTTP proxy first (unless the host is excluded), then SOCKS, then direct.
    pub fn route_for(&self, url: &Url) -> Route {
        let host = url.host_str().unwrap_or_default();
        if self.options.is_use_http_proxy(host) {
            return Route::HttpProxy {
                proxy: self.options.http_proxy().clone(),
                tunnel_credentials: false,
            };
        }
        if self.options.is_socks_proxy_enabled() {
            return Route::Socks {
                proxy: self.options.socks_proxy().clone(),
                remote_dns: self.options.should_resolve_remote_hostname(host),
            };
        }
        Route::Direct
    }

    /// Runs the exchange, resending it when the forward proxy asks for credentials.
    ///
    /// Credentials are never sent up front: only a `407` whose Basic realm equals
    /// the configured realm gets an authenticated resend. A user supplied
    /// `Proxy-Authorization` is sent as is; with `remove_user_defined_auth` it is
    /// dropped after a rejection and the exchange negotiated again.
    pub fn execute(
        &self,
        transport: &dyn Transport,
        exchange: &mut Exchange,
        remove_user_defined_auth: bool,
    ) -> Result<RawResponse, TransportError> {
        let Route::HttpProxy { .. } = exchange.route else {
            return transport.exchange(exchange);
        };
        let auth_enabled = self.options.is_http_proxy_auth_enabled();

        let mut response = match transport.exchange(exchange) {
            Err(e) if auth_enabled && is_tunnel_auth_required(&e) => {
                return self.authenticate_tunnel(transport, exchange, e);
            }
            other => other?,
        };

        if exchange.headers.contains(PROXY_AUTHORIZATION) {
            if !(remove_user_defined_auth && auth_enabled && matches!(response.status, 403 | 407)) {
                return Ok(response);
            }
            debug!("Removing user defined Proxy-Authorization after {}", response.status);
            exchange.headers.remove(PROXY_AUTHORIZATION);
            response = transport.exchange(exchange)?;
        }

        if response.status == 407 && auth_enabled {
            if let Some(credentials) = self.challenge_response(&response) {
                exchange.headers.set(PROXY_AUTHORIZATION, credentials);
                response = transport.exchange(exchange)?;
            }
        }
        Ok(response)
    }

    // the tunnel error hides the challenge, so ask the proxy again to read its realm
    fn authenticate_tunnel(
        &self,
        transport: &dyn Transport,
        exchange: &mut Exchange,
        tunnel_error: TransportError,
    ) -> Result<RawResponse, TransportError> {
        let challenge = match transport.proxy_connect(exchange) {
            Ok(challenge) if challenge.status == 407 => challenge,
            Ok(other) => {
                debug!("Proxy answered CONNECT with {} on second attempt", other.status);
                return Err(tunnel_error);
            }
            Err(e) => {
                debug!("Failed to read the CONNECT challenge: {e}");
                return Err(tunnel_error);
            }
        };
        if self.challenge_response(&challenge).is_none() {
            return Ok(challenge);
        }

        debug!("Proxy requires authentication to open the tunnel, resending with credentials");
        if let Route::HttpProxy {
            tunnel_credentials, ..
        } = &mut exchange.route
        {
            *tunnel_credentials = true;
        }
        transport.exchange(exchange)
    }

    fn challenge_response(&self, response: &RawResponse) -> Option<String> {
        let proxy = self.options.http_proxy();
        let realms: Vec<String> = response
            .headers
            .get_all(PROXY_AUTHENTICATE)
            .into_iter()
            .filter_map(parse_basic_realm)
            .collect();
        if realms.iter().any(|realm| realm == proxy.realm()) {
            let credentials = proxy.credentials();
            return Some(basic_credentials(
                credentials.user_name(),
                credentials.password(),
            ));
        }
        debug!(
            "No Basic challenge for realm '{}' (offered: {:?}), not authenticating",
            proxy.realm(),
            realms
        );
        None
    }
}

fn is_tunnel_auth_required(err: &TransportError) -> bool {
    let message = match err {
        TransportError::Connect { message, .. } => message,
        TransportError::Io(message) => message,
        _ => return false,
    };
    let message = message.to_ascii_lowercase();
    ["proxy authentication required", "proxy authorization required", " 407"]
        .iter()
        .any(|marker| message.contains(marker))
}

/// Realm of a `Basic` challenge, `""` when the challenge names none.
pub fn parse_basic_realm(challenge: &str) -> Option<String> {
    let challenge = challenge.trim();
    let (scheme, params) = match challenge.split_once(char::is_whitespace) {
        Some((scheme, params)) => (scheme, params.trim()),
        None => (challenge, ""),
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let mut rest = params;
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=')?;
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };
        if name.trim().eq_ignore_ascii_case("realm") {
            return Some(value.to_string());
        }
        rest = remaining.trim_start_matches([',', ' ', '\t']);
    }
    Some(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::HeaderFields;
    use crate::network::proxy::{HttpProxy, HttpProxyExclusion, PasswordAuthentication};
    use crate::network::transport::scripted::ScriptedTransport;
    use std::time::Duration;

    fn options(realm: &str, auth: bool) -> ConnectionOptions {
        let mut options = ConnectionOptions::default();
        options.set_http_proxy(
            HttpProxy::new(
                "proxy.local",
                3128,
                realm,
                PasswordAuthentication::new("username", "password"),
            )
            .unwrap(),
        );
        options.set_http_proxy_enabled(true);
        options.set_http_proxy_auth_enabled(auth);
        options
    }

    fn exchange(route: Route) -> Exchange {
        Exchange {
            method: "GET".to_string(),
            url: Url::parse("http://example.com/").unwrap(),
            headers: HeaderFields::new(),
            body: Vec::new(),
            route,
            identity: None,
            timeout: Duration::from_secs(5),
            download: None,
            buffer_redirects: false,
        }
    }

    fn challenging_proxy(realm: &'static str) -> ScriptedTransport {
        ScriptedTransport::new(move |exchange, _| {
            if exchange.headers.get(PROXY_AUTHORIZATION)
                == Some("Basic dXNlcm5hbWU6cGFzc3dvcmQ=")
            {
                Ok(RawResponse::new(200, "OK"))
            } else {
                Ok(RawResponse::new(407, "Proxy Authentication Required")
                    .with_header(PROXY_AUTHENTICATE, &format!("Basic realm=\"{realm}\"")))
            }
        })
    }

    #[test]
    fn parses_basic_realms() {
        assert_eq!(parse_basic_realm("Basic realm=\"Proxy\""), Some("Proxy".to_string()));
        assert_eq!(parse_basic_realm("basic REALM=\"\""), Some(String::new()));
        assert_eq!(
            parse_basic_realm("Basic charset=\"UTF-8\", realm=\"a, b\""),
            Some("a, b".to_string())
        );
        assert_eq!(parse_basic_realm("Basic realm=token"), Some("token".to_string()));
        assert_eq!(parse_basic_realm("Basic"), Some(String::new()));
        assert_eq!(parse_basic_realm("Digest realm=\"x\""), None);
    }

    #[test]
    fn routes_by_enabled_proxy() {
        let url = Url::parse("http://example.com/").unwrap();
        let mut options = ConnectionOptions::default();
        assert_eq!(ProxyNegotiator::new(&options).route_for(&url), Route::Direct);

        options.set_socks_proxy_enabled(true);
        assert!(matches!(
            ProxyNegotiator::new(&options).route_for(&url),
            Route::Socks { remote_dns: true, .. }
        ));

        options.set_http_proxy_enabled(true);
        assert!(matches!(
            ProxyNegotiator::new(&options).route_for(&url),
            Route::HttpProxy { tunnel_credentials: false, .. }
        ));

        options.set_http_proxy_exclusions(vec![HttpProxyExclusion::new("example\\.com", true).unwrap()]);
        assert!(matches!(
            ProxyNegotiator::new(&options).route_for(&url),
            Route::Socks { .. }
        ));
    }

    #[test]
    fn authenticates_on_matching_realm_only_after_challenge() {
        let options = options("MyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("MyRealm");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 200);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].headers.get(PROXY_AUTHORIZATION), None);
        assert_eq!(
            seen[1].headers.get(PROXY_AUTHORIZATION),
            Some("Basic dXNlcm5hbWU6cGFzc3dvcmQ=")
        );
    }

    #[test]
    fn empty_realm_matches_empty_challenge() {
        let options = options("", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.exchanges().len(), 2);
    }

    #[test]
    fn realm_mismatch_never_sends_credentials() {
        let options = options("NotMyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("MyRealm");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 407);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 1);
        assert!(seen.iter().all(|e| !e.headers.contains(PROXY_AUTHORIZATION)));
    }

    #[test]
    fn disabled_auth_skips_the_resend() {
        let options = options("MyRealm", false);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("MyRealm");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 407);
        assert_eq!(transport.exchanges().len(), 1);
    }

    #[test]
    fn user_defined_header_is_kept_without_removal_flag() {
        let options = options("MyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("MyRealm");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));
        exchange.headers.add(PROXY_AUTHORIZATION, "Basic dXNlcjp3cm9uZw==");

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 407);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers.get(PROXY_AUTHORIZATION), Some("Basic dXNlcjp3cm9uZw=="));
    }

    #[test]
    fn user_defined_header_is_replaced_with_removal_flag() {
        let options = options("MyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = challenging_proxy("MyRealm");
        let mut exchange = exchange(negotiator.route_for(&Url::parse("http://example.com/").unwrap()));
        exchange.headers.add(PROXY_AUTHORIZATION, "Basic dXNlcjp3cm9uZw==");

        let response = negotiator.execute(&transport, &mut exchange, true).unwrap();

        assert_eq!(response.status, 200);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].headers.get(PROXY_AUTHORIZATION), Some("Basic dXNlcjp3cm9uZw=="));
        assert_eq!(seen[1].headers.get(PROXY_AUTHORIZATION), None);
        assert_eq!(
            seen[2].headers.get(PROXY_AUTHORIZATION),
            Some("Basic dXNlcm5hbWU6cGFzc3dvcmQ=")
        );
    }

    // refuses every tunnel opened without credentials, like reqwest reports it
    fn tunnel_proxy(realm: &'static str) -> ScriptedTransport {
        ScriptedTransport::new(move |exchange, _| match (&exchange.route, exchange.method.as_str()) {
            (_, "CONNECT") => Ok(RawResponse::new(407, "Proxy Authentication Required")
                .with_header(PROXY_AUTHENTICATE, &format!("Basic realm=\"{realm}\""))),
            (
                Route::HttpProxy {
                    tunnel_credentials: false,
                    ..
                },
                _,
            ) => Err(TransportError::Connect {
                target: "proxy.local".to_string(),
                message: "error sending request: client error (Connect): tunnel error: proxy authorization required"
                    .to_string(),
            }),
            _ => Ok(RawResponse::new(200, "OK")),
        })
    }

    fn https_exchange(negotiator: &ProxyNegotiator<'_>) -> Exchange {
        let url = Url::parse("https://example.com/").unwrap();
        let mut exchange = exchange(negotiator.route_for(&url));
        exchange.url = url;
        exchange
    }

    #[test]
    fn tunnel_challenge_with_matching_realm_resends_with_credentials() {
        let options = options("MyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = tunnel_proxy("MyRealm");
        let mut exchange = https_exchange(&negotiator);

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 200);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].method, "CONNECT");
        assert!(matches!(
            seen[2].route,
            Route::HttpProxy {
                tunnel_credentials: true,
                ..
            }
        ));
    }

    #[test]
    fn tunnel_challenge_with_other_realm_returns_the_challenge() {
        let options = options("NotMyRealm", true);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = tunnel_proxy("MyRealm");
        let mut exchange = https_exchange(&negotiator);

        let response = negotiator.execute(&transport, &mut exchange, false).unwrap();

        assert_eq!(response.status, 407);
        let seen = transport.exchanges();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| matches!(
            e.route,
            Route::HttpProxy {
                tunnel_credentials: false,
                ..
            }
        )));
    }

    #[test]
    fn tunnel_challenge_without_auth_is_an_error() {
        let options = options("MyRealm", false);
        let negotiator = ProxyNegotiator::new(&options);
        let transport = tunnel_proxy("MyRealm");
        let mut exchange = https_exchange(&negotiator);

        let err = negotiator.execute(&transport, &mut exchange, false).unwrap_err();

        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(transport.exchanges().len(), 1);
    }

    #[test]
    fn tunnel_auth_errors_are_recognized() {
        let connect = |message: &str| TransportError::Connect {
            target: "proxy".to_string(),
            message: message.to_string(),
        };
        assert!(is_tunnel_auth_required(&connect("tunnel error: proxy authorization required")));
        assert!(is_tunnel_auth_required(&connect("Proxy Authentication Required")));
        assert!(is_tunnel_auth_required(&TransportError::Io("unsuccessful tunnel: 407".to_string())));
        assert!(!is_tunnel_auth_required(&connect("connection refused")));
        assert!(!is_tunnel_auth_required(&TransportError::Malformed(
            "proxy authorization required".to_string()
        )));
    }

    #[test]
    fn direct_route_is_a_single_exchange() {
        let options = ConnectionOptions::default();
        let negotiator = ProxyNegotiator::new(&options);
        let transport = ScriptedTransport::new(|_, _| {
            Ok(RawResponse::new(407, "Proxy Authentication Required")
                .with_header(PROXY_AUTHENTICATE, "Basic realm=\"\""))
        });
        let mut exchange = exchange(Route::Direct);

        let response = negotiator.execute(&transport, &mut exchange, true).unwrap();

        assert_eq!(response.status, 407);
        assert_eq!(transport.exchanges().len(), 1);
    }
}
