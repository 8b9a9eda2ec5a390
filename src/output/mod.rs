use colored::Colorize;
use serde::Serialize;

use crate::network::message::HttpMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

// the HopRecord struct is one request/response pair of a redirect chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HopRecord {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub reason: String,
    pub elapsed_ms: Option<u128>,
}

impl HopRecord {
    pub fn from_message(msg: &HttpMessage) -> Self {
        let response = msg.response_header();
        Self {
            method: msg.request_header().method().to_string(),
            url: msg.request_header().uri().to_string(),
            status: response.status_code(),
            reason: response.reason().to_string(),
            elapsed_ms: msg.time_elapsed().map(|d| d.as_millis()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseRecord {
    pub method: String,
    pub url: String,
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub body_file: Option<String>,
    pub from_target_host: bool,
    pub elapsed_ms: Option<u128>,
    pub hops: Vec<HopRecord>,
}

pub fn build_record(msg: &HttpMessage, hops: Vec<HopRecord>, body_file: Option<&str>) -> ResponseRecord {
    let response = msg.response_header();
    ResponseRecord {
        method: msg.request_header().method().to_string(),
        url: msg.request_header().uri().to_string(),
        version: response.version().to_string(),
        status: response.status_code(),
        reason: response.reason().to_string(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body: msg.response_body().to_string(),
        body_file: body_file.map(str::to_string),
        from_target_host: msg.is_response_from_target_host(),
        elapsed_ms: msg.time_elapsed().map(|d| d.as_millis()),
        hops,
    }
}

/// `-> METHOD URI` for a request about to be sent.
pub fn format_request_hop(method: &str, url: &str) -> String {
    format!("{} {} {}", "->".cyan(), method.bold(), url)
}

/// `<- STATUS reason`, colored by status class.
pub fn format_response_hop(status: u16, reason: &str) -> String {
    let code = status.to_string();
    let code = match status {
        200..=299 => code.green(),
        300..=399 => code.yellow(),
        400..=599 => code.red(),
        _ => code.normal(),
    };
    format!("{} {} {}", "<-".cyan(), code, reason).trim_end().to_string()
}

pub fn render_text(record: &ResponseRecord) -> Vec<u8> {
    let mut out = String::new();
    let status_line = format!("{} {} {}", record.version, record.status, record.reason);
    out.push_str(status_line.trim_end());
    out.push('\n');
    for (name, value) in record.headers.iter() {
        out.push_str(&format!("{name}: {value}\n"));
    }
    out.push('\n');
    match record.body_file.as_deref() {
        Some(path) => out.push_str(&format!("[body saved to {path}]\n")),
        None => {
            out.push_str(&record.body);
            if !record.body.is_empty() && !record.body.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out.into_bytes()
}

pub fn render_json(record: &ResponseRecord) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(record).unwrap_or_else(|_| b"{}".to_vec());
    out.push(b'\n');
    out
}

pub fn render(record: &ResponseRecord, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(record),
        OutputFormat::Json => render_json(record),
    }
}
