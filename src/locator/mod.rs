//! Stream locator parsing
//!
//! Turns an SRS stream locator such as
//! `webrtc://example.com/live/livestream?vhost=foo.com` into a structured
//! [`UrlDescriptor`] and derives the HTTP signaling endpoint from it.

pub mod endpoint;

pub use endpoint::{EndpointDefaults, SignalingEndpoint};

use crate::error::SignalingError;
use log::debug;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::sync::OnceLock;
use url::Url;

/// Vhost used when the locator host is a bare IPv4 literal
pub const DEFAULT_VHOST: &str = "__defaultVhost__";

/// Scheme assumed for locators without `://`
pub const DEFAULT_SCHEME: &str = "rtmp";

/// Marker some legacy players put in the app segment instead of `?vhost=`
const LEGACY_VHOST_ESCAPE: &str = "...vhost...";

/// Query parameters in first-insertion order.
///
/// A repeated key replaces the earlier value in place, so forwarding the
/// parameters always reproduces the order the locator introduced them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl Serialize for QueryParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Structured view of a stream locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlDescriptor {
    /// Input after scheme defaulting
    pub raw_url: String,
    /// Stream url, replaced by a `url` query parameter when present
    pub url: String,
    pub scheme: String,
    pub host: String,
    /// Resolved port, `-1` while unresolved
    pub port: i32,
    pub vhost: String,
    pub app: String,
    pub stream: String,
    pub domain: Option<String>,
    pub query: QueryParams,
}

impl UrlDescriptor {
    /// Parse a locator string.
    ///
    /// Inputs without `://` are treated as `rtmp://` locators.
    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        let raw_url = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("{}://{}", DEFAULT_SCHEME, raw)
        };

        let parsed = Url::parse(&raw_url)
            .map_err(|e| SignalingError::MalformedUrl(format!("{}: {}", raw_url, e)))?;

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(SignalingError::MalformedUrl(format!("{}: missing host", raw_url))),
        };
        let scheme = parsed.scheme().to_string();

        let path = match parsed.path() {
            "" => "/",
            path => path,
        };
        let (mut app, stream) = split_path(path);

        let mut vhost = host.clone();
        app = app.replace(LEGACY_VHOST_ESCAPE, "?vhost=");
        if let Some(idx) = app.find('?') {
            let params = app[idx..].to_string();
            app.truncate(idx);
            if let Some(pos) = params.find("vhost=") {
                let value = &params[pos + "vhost=".len()..];
                vhost = match value.find('&') {
                    Some(end) => value[..end].to_string(),
                    None => value.to_string(),
                };
            }
        }

        if vhost == host && is_dotted_quad(&host) {
            vhost = DEFAULT_VHOST.to_string();
        }

        let port = match parsed.port() {
            Some(port) => i32::from(port),
            None => scheme_default_port(&scheme).unwrap_or(-1),
        };

        let mut descriptor = UrlDescriptor {
            url: raw_url.clone(),
            raw_url,
            scheme: scheme.clone(),
            host,
            port,
            vhost,
            app,
            stream,
            domain: None,
            query: QueryParams::new(),
        };

        if let Some(query) = parsed.query() {
            descriptor.fill_query(query)?;
        }

        if descriptor.port == -1 && (scheme == "webrtc" || scheme == "rtc") {
            descriptor.port = if descriptor.query.get("schema") == Some("https") {
                443
            } else {
                1985
            };
        }

        debug!(
            "Parsed locator {}: scheme={} host={} port={} vhost={} app={} stream={}",
            descriptor.raw_url,
            descriptor.scheme,
            descriptor.host,
            descriptor.port,
            descriptor.vhost,
            descriptor.app,
            descriptor.stream
        );

        Ok(descriptor)
    }

    /// Apply `key=value` pairs, values taken verbatim.
    ///
    /// `query` comes from `Url::query()` and is already percent-encoded
    /// (spaces, quotes, `<>`). Values keep that encoding and are never decoded.
    fn fill_query(&mut self, query: &str) -> Result<(), SignalingError> {
        for segment in query.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            match key {
                "url" => self.url = value.to_string(),
                "schema" => self.scheme = value.to_string(),
                "server" => self.host = value.to_string(),
                "port" => {
                    self.port = value.parse().map_err(|_| {
                        SignalingError::MalformedUrl(format!("invalid port query value: {}", value))
                    })?;
                }
                "vhost" => self.vhost = value.to_string(),
                "app" => self.app = value.to_string(),
                "stream" => self.stream = value.to_string(),
                "domain" => self.domain = Some(value.to_string()),
                _ => {}
            }
            self.query.insert(key, value);
        }

        if let Some(ref domain) = self.domain {
            self.vhost = domain.clone();
        }

        Ok(())
    }
}

/// Parse a locator string into a [`UrlDescriptor`]
pub fn parse(raw: &str) -> Result<UrlDescriptor, SignalingError> {
    UrlDescriptor::parse(raw)
}

/// Parse a locator and derive its signaling endpoint in one step
pub fn prepare(raw: &str, defaults: &EndpointDefaults) -> Result<SignalingEndpoint, SignalingError> {
    let descriptor = UrlDescriptor::parse(raw)?;
    Ok(SignalingEndpoint::build(&descriptor, &defaults.path, &defaults.schema))
}

/// Split `/a/b/c` into (`a/b`, `c`)
fn split_path(path: &str) -> (String, String) {
    let last = path.rfind('/').unwrap_or(0);
    let app = if last > 0 { &path[1..last] } else { "" };
    let stream = &path[last + 1..];
    (app.to_string(), stream.to_string())
}

fn is_dotted_quad(host: &str) -> bool {
    static DOTTED_QUAD: OnceLock<Option<Regex>> = OnceLock::new();
    DOTTED_QUAD
        .get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)\.(\d+)$").ok())
        .as_ref()
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

fn scheme_default_port(scheme: &str) -> Option<i32> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "rtmp" => Some(1935),
        _ => None,
    }
}
