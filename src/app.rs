use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use parking_lot::Mutex;
use tracing::debug;

use crate::certificates::{ClientCertificatesOptions, KeyStores, Pkcs11Driver, Pkcs11Drivers};
use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::network::listeners::{HttpSenderListener, ListenerResult};
use crate::network::message::{HttpMessage, HttpRequestHeader, CONTENT_TYPE};
use crate::network::options::{ConnectionOptions, DEFAULT_TIMEOUT};
use crate::network::proxy::{HttpProxy, HttpProxyExclusion, PasswordAuthentication, SocksProxy, SocksVersion};
use crate::network::request_config::HttpRequestConfig;
use crate::network::sender::{
    HttpSender, SenderServices, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES_ON_IO_ERROR,
    MANUAL_REQUEST_INITIATOR,
};
use crate::network::user::BasicAuthUser;
use crate::output::{self, HopRecord, OutputFormat};

fn init_tracing(verbose: u8) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
}

fn format_kv_line(label: &str, value: &str) {
    eprintln!(":: {:<10}: {}", label, value);
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    if let Some(version) = cmd.get_version() {
        out.push_str(cmd.get_name());
        out.push(' ');
        out.push_str(version);
        out.push('\n');
    } else {
        out.push_str(cmd.get_name());
        out.push('\n');
    }

    if let Some(about) = cmd.get_about() {
        out.push_str(&about.to_string());
        out.push('\n');
    }

    if let Some(long_about) = cmd.get_long_about() {
        out.push('\n');
        out.push_str(&long_about.to_string());
        out.push('\n');
    }

    out.push('\n');
    out.push_str("Usage: ");
    out.push_str(cmd.get_name());
    out.push_str(" [OPTIONS] -u <URL>\n\n");

    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    let mut section_idx: HashMap<String, usize> = HashMap::new();

    for arg in cmd.get_arguments() {
        if arg.is_hide_set() {
            continue;
        }

        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        let idx = match section_idx.get(&heading).copied() {
            Some(i) => i,
            None => {
                sections.push((heading.clone(), Vec::new()));
                let i = sections.len() - 1;
                section_idx.insert(heading, i);
                i
            }
        };
        sections[idx].1.push(arg);
    }

    for (heading, args) in sections {
        out.push_str(&heading);
        out.push_str(":\n");

        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            if let Some(aliases) = arg.get_visible_aliases() {
                for alias in aliases {
                    let rendered = format!("--{alias}");
                    if !parts.iter().any(|p| p == &rendered) {
                        parts.push(rendered);
                    }
                }
            }

            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                let placeholder = format!("<{value_name}>");
                let min_values = arg.get_num_args().map(|r| r.min_values()).unwrap_or(1);
                if min_values == 0 {
                    flags.push_str(&format!(" [{placeholder}]"));
                } else {
                    flags.push(' ');
                    flags.push_str(&placeholder);
                }
            }

            out.push_str("  ");
            out.push_str(&flags);
            out.push('\n');

            if let Some(help) = arg.get_help() {
                let help = help.to_string();
                if !help.trim().is_empty() {
                    out.push_str("          ");
                    out.push_str(help.trim());
                    out.push('\n');
                }
            }
            out.push('\n');
        }
    }

    out
}

#[derive(Clone, Debug)]
struct RunConfig {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    data: Option<String>,
    auth: Option<(String, String)>,
    follow_redirects: bool,
    max_redirects: u32,
    retries: u32,
    cookies: bool,
    remove_user_defined_auth_headers: bool,
    connection: ConnectionOptions,
    certificates: ClientCertificatesOptions,
    output: Option<PathBuf>,
    format: OutputFormat,
    verbose: u8,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let url = args
        .url
        .clone()
        .ok_or_else(|| "missing target, use -u/--url".to_string())?;
    let parsed = url::Url::parse(url.trim()).map_err(|e| format!("invalid --url '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("invalid --url '{url}': expected http or https"));
    }

    let method = match args.method.as_deref() {
        Some(raw) => crate::utils::parse_http_method(raw)?,
        None if args.data.is_some() => "POST".to_string(),
        None => "GET".to_string(),
    };
    let headers = args
        .header
        .iter()
        .map(|raw| crate::utils::parse_header_line(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let auth = args
        .auth
        .as_deref()
        .map(crate::utils::parse_credentials)
        .transpose()?;

    let timeout = args
        .timeout
        .or(cfg.timeout)
        .unwrap_or(DEFAULT_TIMEOUT.as_secs());
    let follow_redirects = args.follow_redirects || cfg.follow_redirects.unwrap_or(false);
    let max_redirects = args
        .max_redirects
        .or(cfg.max_redirects)
        .unwrap_or(DEFAULT_MAX_REDIRECTS);
    let retries = args
        .retries
        .or(cfg.max_retries)
        .unwrap_or(DEFAULT_MAX_RETRIES_ON_IO_ERROR);
    let remove_user_defined_auth_headers =
        args.remove_user_defined_auth || cfg.remove_user_defined_auth_headers.unwrap_or(false);

    let format_raw = args
        .format
        .clone()
        .or(cfg.output_format.clone())
        .unwrap_or_else(|| "text".to_string());
    let format = OutputFormat::parse(&format_raw)
        .ok_or_else(|| format!("invalid output format '{format_raw}', expected text or json"))?;

    let mut connection = ConnectionOptions::default();
    connection.set_timeout(Duration::from_secs(timeout));
    if let Some(user_agent) = args.user_agent.clone().or(cfg.user_agent.clone()) {
        connection.set_default_user_agent(&user_agent);
    }
    connection.set_use_global_http_state(cfg.use_global_http_state.unwrap_or(false));

    if let Some(raw) = args.proxy.clone().or(cfg.proxy.clone()) {
        let (host, port) =
            crate::utils::parse_host_port(&raw).map_err(|e| format!("invalid proxy '{raw}': {e}"))?;
        let realm = args
            .proxy_realm
            .clone()
            .or(cfg.proxy_realm.clone())
            .unwrap_or_default();
        let user = args.proxy_user.clone().or(cfg.proxy_user.clone());
        let password = args
            .proxy_password
            .clone()
            .or(cfg.proxy_password.clone())
            .unwrap_or_default();
        let auth_enabled = cfg.proxy_auth.unwrap_or(false) || user.is_some();
        let credentials = PasswordAuthentication::new(&user.unwrap_or_default(), &password);
        let proxy = HttpProxy::new(&host, port, &realm, credentials)
            .map_err(|e| format!("invalid proxy '{raw}': {e}"))?;
        connection.set_http_proxy(proxy);
        connection.set_http_proxy_enabled(true);
        connection.set_http_proxy_auth_enabled(auth_enabled);
    }

    let exclusions = if args.proxy_exclude.is_empty() {
        cfg.proxy_exclusions.clone().unwrap_or_default()
    } else {
        args.proxy_exclude.clone()
    };
    let exclusions = exclusions
        .iter()
        .map(|pattern| {
            HttpProxyExclusion::new(pattern, true)
                .map_err(|e| format!("invalid proxy exclusion '{pattern}': {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    connection.set_http_proxy_exclusions(exclusions);

    if let Some(raw) = args.socks.clone().or(cfg.socks.clone()) {
        let (host, port) =
            crate::utils::parse_host_port(&raw).map_err(|e| format!("invalid socks '{raw}': {e}"))?;
        let version = match args.socks_version.as_deref() {
            Some(value) => crate::utils::parse_socks_version(value)?,
            None => SocksVersion::parse(cfg.socks_version.as_deref()),
        };
        let use_dns = args.socks_dns.or(cfg.socks_dns).unwrap_or(true);
        let credentials = PasswordAuthentication::new(
            cfg.socks_user.as_deref().unwrap_or_default(),
            cfg.socks_password.as_deref().unwrap_or_default(),
        );
        let proxy = SocksProxy::new(&host, port, version, use_dns, credentials)
            .map_err(|e| format!("invalid socks '{raw}': {e}"))?;
        connection.set_socks_proxy(proxy);
        connection.set_socks_proxy_enabled(true);
    }

    let pkcs12_file = args
        .pkcs12
        .clone()
        .or(cfg.pkcs12_file.clone())
        .map(|p| config::expand_tilde(&p));
    let certificates = ClientCertificatesOptions {
        use_certificate: pkcs12_file.is_some(),
        pkcs12_file,
        pkcs12_password: args
            .pkcs12_password
            .clone()
            .or(cfg.pkcs12_password.clone())
            .unwrap_or_default(),
        pkcs12_index: args.pkcs12_index.or(cfg.pkcs12_index).unwrap_or(0),
        pkcs11_use_slot_list_index: cfg.pkcs11_use_slot_list_index.unwrap_or(false),
    };

    Ok(RunConfig {
        url: url.trim().to_string(),
        method,
        headers,
        data: args.data.clone(),
        auth,
        follow_redirects,
        max_redirects,
        retries,
        cookies: args.cookies,
        remove_user_defined_auth_headers,
        connection,
        certificates,
        output: args.output.as_deref().map(config::expand_tilde),
        format,
        verbose: args.verbose,
    })
}

fn print_settings(run: &RunConfig) {
    format_kv_line("URL", &run.url);
    format_kv_line("Method", &run.method);
    format_kv_line("Redirects", &format!(
        "{} (max {})",
        format_bool(run.follow_redirects),
        run.max_redirects
    ));
    format_kv_line("Retries", &run.retries.to_string());
    format_kv_line("Timeout", &format!("{}s", run.connection.timeout().as_secs()));
    if run.connection.is_http_proxy_enabled() {
        format_kv_line("Proxy", &run.connection.http_proxy().to_string());
    }
    if run.connection.is_socks_proxy_enabled() {
        format_kv_line("SOCKS", &run.connection.socks_proxy().to_string());
    }
    if let Some(path) = run.certificates.pkcs12_file.as_deref() {
        format_kv_line(
            "PKCS#12",
            &format!("{} [{}]", path.display(), run.certificates.pkcs12_index),
        );
    }
    eprintln!();
}

// the HopPrinter struct prints each hop and keeps it for the final report
#[derive(Default)]
struct HopPrinter {
    hops: Mutex<Vec<HopRecord>>,
}

impl HttpSenderListener for HopPrinter {
    fn listener_order(&self) -> i32 {
        i32::MAX
    }

    fn on_http_request_send(&self, msg: &mut HttpMessage, _: i32, _: &HttpSender) -> ListenerResult {
        eprintln!(
            "{}",
            output::format_request_hop(
                msg.request_header().method(),
                msg.request_header().uri().as_str()
            )
        );
        Ok(())
    }

    fn on_http_response_receive(&self, msg: &mut HttpMessage, _: i32, _: &HttpSender) -> ListenerResult {
        let hop = HopRecord::from_message(msg);
        eprintln!("{}", output::format_response_hop(hop.status, &hop.reason));
        self.hops.lock().push(hop);
        Ok(())
    }

    fn listener_name(&self) -> &'static str {
        "HopPrinter"
    }
}

fn build_message(run: &RunConfig) -> Result<HttpMessage, String> {
    let header = HttpRequestHeader::parse(&run.method, &run.url)
        .map_err(|e| format!("invalid --url '{}': {e}", run.url))?;
    let mut msg = HttpMessage::new(header);
    for (name, value) in run.headers.iter() {
        msg.request_header_mut().headers_mut().add(name.as_str(), value.as_str());
    }
    if let Some(data) = run.data.as_deref() {
        if msg.request_header().header(CONTENT_TYPE).is_none() {
            msg.request_header_mut()
                .set_header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        }
        msg.set_request_body(data.as_bytes());
    }
    Ok(msg)
}

fn build_sender(run: &RunConfig) -> Result<HttpSender, String> {
    let key_stores = Arc::new(KeyStores::new());
    let use_certificate = run
        .certificates
        .apply(&key_stores)
        .map_err(|e| format!("failed to load client certificate: {e}"))?;
    if run.certificates.use_certificate && !use_certificate {
        return Err(
            "client certificate could not be activated, check --pkcs12-index and --pkcs12-password"
                .to_string(),
        );
    }

    let services = Arc::new(SenderServices::with_reqwest(run.connection.clone(), key_stores));
    services.set_use_client_certificate(use_certificate);

    let sender = HttpSender::new(services, MANUAL_REQUEST_INITIATOR);
    sender.set_follow_redirects(run.follow_redirects);
    sender.set_max_redirects(run.max_redirects);
    sender.set_max_retries_on_io_error(run.retries);
    sender.set_use_cookies(run.cookies);
    sender.set_remove_user_defined_auth_headers(run.remove_user_defined_auth_headers);
    if let Some((user, password)) = run.auth.as_ref() {
        sender.set_user(Some(Arc::new(BasicAuthUser::new(user, user, password))));
    }
    Ok(sender)
}

fn run_request(run: RunConfig) -> Result<(), String> {
    if run.verbose > 0 {
        print_settings(&run);
    }

    let sender = build_sender(&run)?;
    let printer = Arc::new(HopPrinter::default());
    sender.add_listener(Arc::clone(&printer) as Arc<dyn HttpSenderListener>);

    let mut msg = build_message(&run)?;
    let config = HttpRequestConfig::builder()
        .follow_redirects(run.follow_redirects)
        .max_redirects(run.max_redirects)
        .build();

    let result = match run.output.as_deref() {
        Some(path) => sender.send_and_receive_to_file(&mut msg, &config, path),
        None => sender.send_and_receive_with_config(&mut msg, &config),
    };
    result.map_err(|e| format!("request to {} failed: {e}", msg.request_header().uri()))?;
    debug!("Completed in {} hop(s)", printer.hops.lock().len());

    let hops = printer.hops.lock().clone();
    let body_file = run.output.as_deref().map(|p| p.display().to_string());
    let record = output::build_record(&msg, hops, body_file.as_deref());

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&output::render(&record, run.format))
        .and_then(|_| stdout.flush())
        .map_err(|e| format!("failed to write response: {e}"))
}

fn list_pkcs11_drivers(path: &Path, certificates: &ClientCertificatesOptions) {
    let drivers = Pkcs11Drivers::load(path);
    format_kv_line("Catalog", &path.display().to_string());
    if drivers.drivers().is_empty() {
        eprintln!("{}", "no PKCS#11 drivers configured".yellow());
        return;
    }
    for (idx, driver) in drivers.drivers().iter().enumerate() {
        println!(
            "[{}] {} {} ({})",
            idx,
            driver.name().bold(),
            driver.library(),
            describe_slot(driver, certificates)
        );
    }
}

// the slot selector a token of this driver would be opened with
fn describe_slot(driver: &Pkcs11Driver, certificates: &ClientCertificatesOptions) -> String {
    match certificates.pkcs11_configuration(driver) {
        Ok(configuration) => match (configuration.slot_id(), configuration.slot_list_index()) {
            (Some(slot), _) => format!("slot {slot}"),
            (_, Some(index)) => format!("slot list index {index}"),
            _ => "no slot".to_string(),
        },
        Err(e) => e.to_string(),
    }
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    if let Err(e) = init_tracing(args.verbose) {
        eprintln!("failed to initialize logging: {e}");
    }

    let user_config_path = args.config.as_deref().map(config::expand_tilde);
    if args.init_config {
        let path = user_config_path
            .or_else(config::default_config_path)
            .ok_or_else(|| "could not determine the home directory".to_string())?;
        config::ensure_default_config_file(&path)?;
        format_kv_line("Config", &path.display().to_string());
        return Ok(());
    }

    let cfg = match user_config_path.as_ref() {
        Some(path) => config::load_config(path, false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    if args.no_color || cfg.no_color.unwrap_or(false) {
        colored::control::set_override(false);
    }

    if args.list_pkcs11_drivers {
        let path = cfg
            .pkcs11_drivers_file
            .as_deref()
            .map(config::expand_tilde)
            .or_else(config::default_drivers_path)
            .ok_or_else(|| "could not determine the home directory".to_string())?;
        let certificates = ClientCertificatesOptions {
            pkcs11_use_slot_list_index: cfg.pkcs11_use_slot_list_index.unwrap_or(false),
            ..ClientCertificatesOptions::default()
        };
        list_pkcs11_drivers(&path, &certificates);
        return Ok(());
    }

    let run = build_run_config(args, cfg)?;
    run_request(run)
}
