use crate::network::proxy::SocksVersion;

/// Splits `host:port`, tolerating a leading `scheme://`, a trailing `/` and
/// bracketed IPv6 hosts.
pub fn parse_host_port(value: &str) -> Result<(String, u32), String> {
    let raw = value.trim();
    let raw = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let raw = raw.trim_end_matches('/');
    if raw.is_empty() {
        return Err("expected HOST:PORT".to_string());
    }

    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 address".to_string())?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| "expected HOST:PORT".to_string())?;
        (format!("[{host}]"), port)
    } else {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| "expected HOST:PORT".to_string())?;
        (host.to_string(), port)
    };

    if host.trim().is_empty() || host == "[]" {
        return Err("host is empty".to_string());
    }
    let port: u32 = port
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{port}'"))?;
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(format!("port out of range '{port}'"));
    }
    Ok((host, port))
}

/// `Name: value` as given to `-H`.
pub fn parse_header_line(value: &str) -> Result<(String, String), String> {
    let (name, header_value) = value
        .split_once(':')
        .ok_or_else(|| "expected 'Name: value'".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("invalid header name '{name}'"));
    }
    Ok((name.to_string(), header_value.trim().to_string()))
}

pub fn parse_http_method(value: &str) -> Result<String, String> {
    let canonical = value.trim().to_ascii_uppercase();
    if canonical.is_empty() {
        return Err("method is empty".to_string());
    }
    let method = reqwest::Method::from_bytes(canonical.as_bytes())
        .map_err(|_| format!("invalid method '{}'", value.trim()))?;
    Ok(method.as_str().to_string())
}

/// `user:password`; the password may be empty or contain further colons.
pub fn parse_credentials(value: &str) -> Result<(String, String), String> {
    let (user, password) = value
        .split_once(':')
        .ok_or_else(|| "expected USER:PASSWORD".to_string())?;
    if user.is_empty() {
        return Err("user name is empty".to_string());
    }
    Ok((user.to_string(), password.to_string()))
}

/// Strict form of the SOCKS version used on the command line.
pub fn parse_socks_version(value: &str) -> Result<SocksVersion, String> {
    match value.trim() {
        "4" | "4a" => Ok(SocksVersion::Socks4a),
        "5" => Ok(SocksVersion::Socks5),
        other => Err(format!("invalid SOCKS version '{other}', expected 4 or 5")),
    }
}
