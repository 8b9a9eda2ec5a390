use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct ConfigFile {
    pub timeout: Option<u64>,
    pub user_agent: Option<String>,
    pub use_global_http_state: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    #[serde(alias = "retries")]
    pub max_retries: Option<u32>,
    pub remove_user_defined_auth_headers: Option<bool>,
    pub proxy: Option<String>,
    pub proxy_realm: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    pub proxy_auth: Option<bool>,
    pub proxy_exclusions: Option<Vec<String>>,
    pub socks: Option<String>,
    pub socks_version: Option<String>,
    pub socks_dns: Option<bool>,
    pub socks_user: Option<String>,
    pub socks_password: Option<String>,
    pub pkcs12_file: Option<String>,
    pub pkcs12_password: Option<String>,
    pub pkcs12_index: Option<usize>,
    pub pkcs11_drivers_file: Option<String>,
    pub pkcs11_use_slot_list_index: Option<bool>,
    pub output_format: Option<String>,
    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn config_dir() -> Option<PathBuf> {
    Some(home_dir()?.join(".hopwire"))
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(config_dir()?.join("config.yml"))
}

pub fn default_drivers_path() -> Option<PathBuf> {
    Some(config_dir()?.join("drivers.xml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &Path, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(ConfigFile::default()),
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# hopwire config
#
# Location (default):
#   ~/.hopwire/config.yml
#
# Command line flags override every value set here.

# Connection
timeout: 20
# user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:100.0) Gecko/20100101 Firefox/100.0"
use_global_http_state: false

# Sending
follow_redirects: false
max_redirects: 100
max_retries: 3
remove_user_defined_auth_headers: false

# HTTP proxy (optional)
# proxy: 127.0.0.1:8080
# proxy_realm: ""
# proxy_user: user
# proxy_password: secret
# proxy_auth: false
# proxy_exclusions:
#   - ".*\\.internal"

# SOCKS proxy (optional, the HTTP proxy wins when both are set)
# socks: 127.0.0.1:1080
# socks_version: "5"
# socks_dns: true
# socks_user: user
# socks_password: secret

# Client certificate (optional)
# pkcs12_file: ~/.hopwire/client.p12
# pkcs12_password: secret
# pkcs12_index: 0
# pkcs11_drivers_file: ~/.hopwire/drivers.xml
# pkcs11_use_slot_list_index: false

# Output
output_format: text
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
