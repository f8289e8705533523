//! One outbound REST call: URL, headers, body encoding and the rate-limit
//! route it belongs to.

use std::fmt;

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde_json::Value;

use crate::config::RestOptions;
use crate::error::RestError;
use crate::rest::transport::PreparedRequest;
use crate::types::FileContent;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call options for [`RequestHandler::request`](crate::rest::RequestHandler::request).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Attach the bot token. Interaction webhook calls are authorized by the
    /// token in their path and turn this off.
    pub auth: bool,
    pub body: Option<Value>,
    pub files: Vec<FileContent>,
    pub query: Vec<(String, String)>,
    /// Audit log reason, sent as `X-Audit-Log-Reason`.
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Send each top-level body field as its own multipart part instead of
    /// a single `payload_json` part.
    pub form_data: bool,
    /// Queue ahead of requests already waiting on the same bucket.
    pub jump_queue: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            auth: true,
            body: None,
            files: Vec::new(),
            query: Vec::new(),
            reason: None,
            headers: Vec::new(),
            form_data: false,
            jump_queue: false,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unauthenticated() -> Self {
        Self {
            auth: false,
            ..Self::default()
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn files(mut self, files: Vec<FileContent>) -> Self {
        self.files = files;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Route derivation
// ---------------------------------------------------------------------------

static SNOWFLAKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{16,19}$").unwrap());
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{150,300}$").unwrap());
static MAJOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(?:channels|guilds|webhooks)/(\d{16,19})").unwrap());

const MESSAGE_ROUTE: &str = "/channels/:id/messages/:id";
const OLD_MESSAGE_MS: u64 = 14 * 24 * 60 * 60 * 1000;
const NEW_MESSAGE_MS: u64 = 10 * 1000;

fn strip_query(path: &str) -> &str {
    path.split_once('?').map(|(p, _)| p).unwrap_or(path)
}

/// Rate-limit route for `path`, with ids and interaction tokens masked.
///
/// `now_ms` decides the age tag of message deletions.
pub fn route_for(method: HttpMethod, path: &str, now_ms: u64) -> String {
    let path = strip_query(path);
    let mut segments = Vec::new();
    let mut last_id = None;

    for segment in path.split('/').skip(1) {
        if segment == "reactions" {
            segments.push("reactions");
            segments.push(":id");
            break;
        }
        if SNOWFLAKE.is_match(segment) {
            last_id = Some(segment);
            segments.push(":id");
        } else if TOKEN.is_match(segment) {
            segments.push(":token");
        } else {
            segments.push(segment);
        }
    }

    let mut route = format!("/{}", segments.join("/"));
    if method == HttpMethod::Delete && route == MESSAGE_ROUTE {
        let sent_at = last_id.and_then(util::snowflake_timestamp_ms);
        if let Some(sent_at) = sent_at {
            let age = now_ms.saturating_sub(sent_at);
            if age >= OLD_MESSAGE_MS {
                route.push_str(";old");
            } else if age <= NEW_MESSAGE_MS {
                route.push_str(";new");
            }
        }
    }
    route
}

/// First channel, guild or webhook id in `path`, or `global`.
pub fn major_parameter(path: &str) -> String {
    MAJOR
        .captures(strip_query(path))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "global".to_string())
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub options: RequestOptions,
    route: String,
    major_parameter: String,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>, options: RequestOptions) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        let route = route_for(method, &path, util::now_unix_ms());
        let major_parameter = major_parameter(&path);
        Self {
            method,
            path,
            options,
            route,
            major_parameter,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn major_parameter(&self) -> &str {
        &self.major_parameter
    }

    /// `METHOD:route`, the key learned bucket hashes are stored under.
    pub fn request_id(&self) -> String {
        format!("{}:{}", self.method, self.route)
    }

    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        if !self.options.query.is_empty() {
            let query = self
                .options
                .query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, QUERY),
                        utf8_percent_encode(v, QUERY)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }
        url
    }

    /// Encode the request for a [`Transport`](crate::rest::Transport).
    /// `authorization` is the full header value, scheme included.
    pub fn prepare(
        &self,
        options: &RestOptions,
        authorization: Option<&str>,
    ) -> Result<PreparedRequest, RestError> {
        let mut headers = vec![
            ("User-Agent".to_string(), options.user_agent.clone()),
            ("Accept-Encoding".to_string(), "gzip,deflate".to_string()),
        ];
        if self.options.auth {
            if let Some(value) = authorization {
                headers.push(("Authorization".to_string(), value.to_string()));
            }
        }
        if let Some(reason) = &self.options.reason {
            headers.push((
                "X-Audit-Log-Reason".to_string(),
                utf8_percent_encode(reason, QUERY).to_string(),
            ));
        }

        let body = if !self.options.files.is_empty() {
            let boundary = format!("SlashBoundary{:016x}", rand::random::<u64>());
            let bytes = build_multipart(
                &boundary,
                self.options.body.as_ref(),
                &self.options.files,
                self.options.form_data,
            )?;
            headers.push((
                "Content-Type".to_string(),
                format!("multipart/form-data; boundary={}", boundary),
            ));
            Some(bytes)
        } else if let Some(body) = &self.options.body {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
            Some(serde_json::to_vec(body)?)
        } else {
            None
        };

        headers.extend(self.options.headers.iter().cloned());

        Ok(PreparedRequest {
            method: self.method,
            url: self.url(&options.base_url),
            headers,
            body,
        })
    }
}

/// Build a multipart/form-data body as raw bytes.
///
/// Files become `files[n]` parts. The JSON body is either one
/// `payload_json` part or, with `form_data`, one part per top-level field.
fn build_multipart(
    boundary: &str,
    body: Option<&Value>,
    files: &[FileContent],
    form_data: bool,
) -> Result<Vec<u8>, RestError> {
    let mut buf: Vec<u8> = Vec::new();

    let text_part = |buf: &mut Vec<u8>, name: &str, content_type: Option<&str>, data: &[u8]| {
        buf.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        buf.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes(),
        );
        if let Some(content_type) = content_type {
            buf.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.extend_from_slice(b"\r\n");
    };

    match body {
        Some(Value::Object(fields)) if form_data => {
            for (name, value) in fields {
                match value {
                    Value::String(text) => text_part(&mut buf, name, None, text.as_bytes()),
                    other => {
                        let json = serde_json::to_vec(other)?;
                        text_part(&mut buf, name, Some("application/json"), &json);
                    }
                }
            }
        }
        Some(value) => {
            let json = serde_json::to_vec(value)?;
            text_part(&mut buf, "payload_json", Some("application/json"), &json);
        }
        None => {}
    }

    for (index, file) in files.iter().enumerate() {
        buf.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        buf.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files[{}]\"; filename=\"{}\"\r\n",
                index,
                file.name.replace('"', "%22")
            )
            .as_bytes(),
        );
        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        buf.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        buf.extend_from_slice(&file.data);
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    Ok(buf)
}
