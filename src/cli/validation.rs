use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(raw) = args.method.as_deref() {
        crate::utils::parse_http_method(raw).map_err(|e| format!("invalid --method '{raw}': {e}"))?;
    }
    for raw in args.header.iter() {
        crate::utils::parse_header_line(raw).map_err(|e| format!("invalid --header '{raw}': {e}"))?;
    }
    if let Some(raw) = args.auth.as_deref() {
        crate::utils::parse_credentials(raw).map_err(|e| format!("invalid --auth: {e}"))?;
    }
    if let Some(raw) = args.proxy.as_deref() {
        crate::utils::parse_host_port(raw).map_err(|e| format!("invalid --proxy '{raw}': {e}"))?;
    }
    if let Some(raw) = args.socks.as_deref() {
        crate::utils::parse_host_port(raw).map_err(|e| format!("invalid --socks '{raw}': {e}"))?;
    }
    if let Some(raw) = args.socks_version.as_deref() {
        crate::utils::parse_socks_version(raw)?;
    }
    for raw in args.proxy_exclude.iter() {
        regex::Regex::new(raw).map_err(|e| format!("invalid --proxy-exclude '{raw}': {e}"))?;
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid timeout, expected positive integer".to_string());
        }
    }
    if let Some(raw) = args.format.as_deref() {
        if crate::output::OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --format '{raw}', expected text or json"));
        }
    }
    if args.pkcs12_password.is_some() && args.pkcs12.is_none() {
        return Err("--pkcs12-password requires --pkcs12".to_string());
    }
    Ok(())
}
