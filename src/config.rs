//! CLI parsing and the immutable connection configuration built from it.
//!
//! Uses the `clap` builder API (`Command`/`Arg`), not the derive macros,
//! matching how this codebase's other single-binary services parse their
//! command lines.

use clap::{Arg, Command};
use std::path::PathBuf;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plain,
    Tls,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Plain => "ws",
            Scheme::Tls => "wss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Stdout,
}

/// Immutable for the lifetime of the connection, built once at startup.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub scheme: Scheme,
    pub hostname: String,
    pub port: u16,
    pub output: OutputTarget,
    /// Zero disables keepalive pings.
    pub keepalive_secs: u64,
    /// The opaque filter array read from stdin, e.g. `[{"kinds":[1]}]`.
    pub filters: Vec<serde_json::Value>,
}

impl ConnectionConfig {
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.hostname)
    }
}

fn validate_scheme(value: &str) -> Result<String, String> {
    match value {
        "ws" | "wss" => Ok(value.to_owned()),
        other => Err(format!("invalid scheme {other:?}: expected \"ws\" or \"wss\"")),
    }
}

fn validate_port(value: &str) -> Result<u16, String> {
    value.parse::<u16>().map_err(|_| "invalid port number".to_owned())
}

fn validate_keepalive(value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| "invalid keepalive interval".to_owned())
}

fn command() -> Command {
    Command::new("nostr-deflate-client")
        .version(env!("CARGO_PKG_VERSION"))
        .author("iwismer")
        .about("Subscribes to a relay over permessage-deflate WebSocket and streams matching events")
        .arg(
            Arg::new("scheme")
                .long("scheme")
                .value_name("ws|wss")
                .value_parser(validate_scheme)
                .default_value("wss"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("hostname")
                .required(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("port")
                .value_parser(validate_port)
                .required(true),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("path|-")
                .default_value("events.jsonl"),
        )
        .arg(
            Arg::new("keepalive")
                .long("keepalive")
                .value_name("seconds")
                .value_parser(validate_keepalive)
                .default_value("0"),
        )
}

/// Parses CLI flags and reads the filter document from `stdin_text`
/// (the caller supplies the already-read stdin content so this function
/// stays free of I/O and is trivial to unit test).
pub fn build_config_from_args<I, T>(
    args: I,
    stdin_text: &str,
) -> Result<ConnectionConfig, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args).map_err(|e| {
        ConfigError::InvalidPort(e.to_string())
    })?;

    let scheme = match matches.get_one::<String>("scheme").map(String::as_str) {
        Some("ws") => Scheme::Plain,
        Some("wss") => Scheme::Tls,
        other => return Err(ConfigError::InvalidScheme(other.unwrap_or("").to_owned())),
    };
    let hostname = matches
        .get_one::<String>("host")
        .expect("host is required")
        .clone();
    let port = *matches.get_one::<u16>("port").expect("port is required");
    let output_raw = matches
        .get_one::<String>("output")
        .expect("output has a default")
        .clone();
    let output = if output_raw == "-" {
        OutputTarget::Stdout
    } else {
        OutputTarget::File(PathBuf::from(output_raw))
    };
    let keepalive_secs = *matches
        .get_one::<u64>("keepalive")
        .expect("keepalive has a default");

    let filters = parse_filters(stdin_text)?;

    Ok(ConnectionConfig {
        scheme,
        hostname,
        port,
        output,
        keepalive_secs,
        filters,
    })
}

/// A single JSON object is wrapped into a one-element list; an explicit
/// JSON array of filters is passed through as-is; an empty stdin document
/// yields no filters at all (no REQ is ever sent in that case).
fn parse_filters(stdin_text: &str) -> Result<Vec<serde_json::Value>, ConfigError> {
    let trimmed = stdin_text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        single => Ok(vec![single]),
    }
}
