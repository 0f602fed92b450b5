//! Signaling endpoint derivation
//!
//! Builds the HTTP API url an SDP offer is posted to, following the SRS
//! sdk conventions: control keys `api`/`play` are consumed, every other
//! query parameter is forwarded to the server.

use super::UrlDescriptor;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Port the SRS HTTP API listens on for plain-http signaling
pub const DEFAULT_API_PORT: i32 = 1985;

/// Port used when the signaling schema is https
pub const DEFAULT_SECURE_API_PORT: i32 = 443;

const TRANSACTION_ID_LEN: usize = 7;

/// Fallback path and schema used when the locator does not carry them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefaults {
    pub path: String,
    pub schema: String,
}

impl EndpointDefaults {
    pub fn new(path: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            schema: schema.into(),
        }
    }
}

/// Resolved HTTP signaling target for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalingEndpoint {
    /// Url the offer is POSTed to
    pub api_url: String,
    /// Stream url carried by the locator
    pub stream_url: String,
    /// Effective signaling schema, without the trailing `:`
    pub schema: String,
    /// Effective signaling port
    pub port: i32,
    /// Correlation id for logs, not a secret
    pub transaction_id: String,
    pub descriptor: UrlDescriptor,
}

impl SignalingEndpoint {
    /// Derive the endpoint for `descriptor`.
    ///
    /// The query string is assembled by appending `&key=value` for every
    /// forwarded parameter and then turning the first `<api>&` into `<api>?`.
    /// Servers in the wild accept exactly this shape, keep it.
    pub fn build(descriptor: &UrlDescriptor, default_path: &str, default_schema: &str) -> Self {
        let schema = descriptor
            .query
            .get("schema")
            .unwrap_or(default_schema)
            .trim_end_matches(':')
            .to_string();

        let port = if descriptor.port != -1 {
            descriptor.port
        } else if schema == "https" {
            DEFAULT_SECURE_API_PORT
        } else {
            DEFAULT_API_PORT
        };

        let mut api = descriptor
            .query
            .get("play")
            .unwrap_or(default_path)
            .to_string();
        if !api.ends_with('/') {
            api.push('/');
        }

        let mut api_url = format!("{}://{}:{}{}", schema, descriptor.host, port, api);
        for (key, value) in descriptor.query.iter() {
            if key != "api" && key != "play" {
                api_url.push('&');
                api_url.push_str(key);
                api_url.push('=');
                api_url.push_str(value);
            }
        }
        let api_url = api_url.replacen(&format!("{}&", api), &format!("{}?", api), 1);

        Self {
            api_url,
            stream_url: descriptor.url.clone(),
            schema,
            port,
            transaction_id: transaction_id(),
            descriptor: descriptor.clone(),
        }
    }
}

/// Random 7-digit lowercase hex id seeded from wall-clock time
pub fn transaction_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0);
    let value = (rand::random::<f64>() * millis * 100.0).floor() as u64;
    format_transaction_id(value)
}

fn format_transaction_id(value: u64) -> String {
    let hex = format!("{:0width$x}", value, width = TRANSACTION_ID_LEN);
    hex[..TRANSACTION_ID_LEN].to_string()
}
