use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hopwire",
    version,
    about = "HTTP sender for testing web applications",
    long_about = "hopwire sends a request through a redirect-aware, retrying HTTP sender with forward/SOCKS proxy negotiation and client certificates, printing every hop.\n\nExamples:\n  hopwire -u https://target.tld/\n  hopwire -u https://target.tld/login -X POST -d 'user=a&pass=b' -L\n  hopwire -u http://target.tld/ --proxy 127.0.0.1:8080 --proxy-realm Corp --proxy-user u --proxy-password p\n  hopwire -u https://target.tld/ --pkcs12 ~/client.p12 --pkcs12-password secret\n\nTip: Use --init-config to write ~/.hopwire/config.yml and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "vb",
        visible_alias = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase verbosity (-v, -vv, -vvv)."
    )]
    pub verbose: u8,

    #[arg(
        long = "nc",
        visible_alias = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Download the final response body to a file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "fmt",
        visible_alias = "format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Response rendering: text or json."
    )]
    pub format: Option<String>,

    #[arg(
        short = 'u',
        long = "u",
        visible_alias = "url",
        value_name = "URL",
        help_heading = "Request",
        help = "Target URL."
    )]
    pub url: Option<String>,

    #[arg(
        short = 'X',
        long = "mth",
        visible_alias = "method",
        value_name = "METHOD",
        help_heading = "Request",
        help = "HTTP method (default GET, or POST with --data)."
    )]
    pub method: Option<String>,

    #[arg(
        short = 'H',
        long = "hdr",
        visible_alias = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "Request",
        help = "Request header 'Name: value' (repeatable)."
    )]
    pub header: Vec<String>,

    #[arg(
        short = 'd',
        long = "dt",
        visible_alias = "data",
        value_name = "BODY",
        help_heading = "Request",
        help = "Request body."
    )]
    pub data: Option<String>,

    #[arg(
        long = "au",
        visible_alias = "auth",
        value_name = "USER:PASS",
        help_heading = "Request",
        help = "Send as a user authenticating with HTTP Basic."
    )]
    pub auth: Option<String>,

    #[arg(
        long = "ruda",
        visible_alias = "remove-user-defined-auth",
        help_heading = "Request",
        help = "Drop user supplied Authorization/Proxy-Authorization headers that get rejected."
    )]
    pub remove_user_defined_auth: bool,

    #[arg(
        short = 'L',
        long = "frd",
        visible_alias = "follow-redirects",
        help_heading = "Sending",
        help = "Follow redirects (301, 302, 303, 307, 308)."
    )]
    pub follow_redirects: bool,

    #[arg(
        long = "mr",
        visible_alias = "max-redirects",
        value_name = "N",
        help_heading = "Sending",
        help = "Maximum redirects to follow (default 100)."
    )]
    pub max_redirects: Option<u32>,

    #[arg(
        long = "rty",
        visible_alias = "retries",
        value_name = "N",
        help_heading = "Sending",
        help = "Attempts per hop on I/O errors (default 3)."
    )]
    pub retries: Option<u32>,

    #[arg(
        long = "to",
        visible_alias = "timeout",
        value_name = "SECS",
        help_heading = "Sending",
        help = "Response timeout in seconds (default 20)."
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "ua",
        visible_alias = "user-agent",
        value_name = "UA",
        help_heading = "Sending",
        help = "User-Agent used when the request sets none."
    )]
    pub user_agent: Option<String>,

    #[arg(
        long = "cj",
        visible_alias = "cookies",
        help_heading = "Sending",
        help = "Keep cookies across redirect hops."
    )]
    pub cookies: bool,

    #[arg(
        long = "px",
        visible_alias = "proxy",
        value_name = "HOST:PORT",
        help_heading = "Proxy",
        help = "Forward HTTP proxy."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "prm",
        visible_alias = "proxy-realm",
        value_name = "REALM",
        help_heading = "Proxy",
        help = "Realm the proxy credentials answer (default empty)."
    )]
    pub proxy_realm: Option<String>,

    #[arg(
        long = "pu",
        visible_alias = "proxy-user",
        value_name = "USER",
        help_heading = "Proxy",
        help = "Proxy user name; enables proxy authentication."
    )]
    pub proxy_user: Option<String>,

    #[arg(
        long = "ppw",
        visible_alias = "proxy-password",
        value_name = "PASSWORD",
        help_heading = "Proxy",
        help = "Proxy password."
    )]
    pub proxy_password: Option<String>,

    #[arg(
        long = "pex",
        visible_alias = "proxy-exclude",
        value_name = "REGEX",
        action = ArgAction::Append,
        help_heading = "Proxy",
        help = "Host pattern that bypasses the HTTP proxy (repeatable)."
    )]
    pub proxy_exclude: Vec<String>,

    #[arg(
        long = "sx",
        visible_alias = "socks",
        value_name = "HOST:PORT",
        help_heading = "Proxy",
        help = "SOCKS proxy (used when no HTTP proxy applies)."
    )]
    pub socks: Option<String>,

    #[arg(
        long = "sxv",
        visible_alias = "socks-version",
        value_name = "4|5",
        help_heading = "Proxy",
        help = "SOCKS version (default 5)."
    )]
    pub socks_version: Option<String>,

    #[arg(
        long = "sxd",
        visible_alias = "socks-dns",
        num_args = 0..=1,
        default_missing_value = "true",
        help_heading = "Proxy",
        help = "Resolve host names through the SOCKS proxy (default true)."
    )]
    pub socks_dns: Option<bool>,

    #[arg(
        long = "p12",
        visible_alias = "pkcs12",
        value_name = "FILE",
        help_heading = "Client Certificate",
        help = "PKCS#12 key store with the client certificate."
    )]
    pub pkcs12: Option<String>,

    #[arg(
        long = "p12pw",
        visible_alias = "pkcs12-password",
        value_name = "PASSWORD",
        help_heading = "Client Certificate",
        help = "PKCS#12 key store password."
    )]
    pub pkcs12_password: Option<String>,

    #[arg(
        long = "p12i",
        visible_alias = "pkcs12-index",
        value_name = "N",
        help_heading = "Client Certificate",
        help = "Index of the certificate to use (default 0)."
    )]
    pub pkcs12_index: Option<usize>,

    #[arg(
        long = "p11l",
        visible_alias = "list-pkcs11-drivers",
        help_heading = "Client Certificate",
        help = "List the PKCS#11 driver catalog and exit."
    )]
    pub list_pkcs11_drivers: bool,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Config",
        help = "Path to config file (defaults to ~/.hopwire/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "ic",
        visible_alias = "init-config",
        help_heading = "Config",
        help = "Write a default config file and exit."
    )]
    pub init_config: bool,
}
