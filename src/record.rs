use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use uuid::Uuid;

/// Headers whose values never reach a sink.
const REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "grpcgateway-authorization",
    "cookie",
    "grpcgateway-cookie",
    "set-cookie",
    "proxy-authorization",
];

const REDACTED_VALUE: &str = "[REDACTED]";

/// A record the pipeline can buffer, store, count and prune.
///
/// The pipeline only looks at the tenant key and the timestamp; everything
/// else is sink-specific payload.
pub trait LogRecord: Clone + Debug + Send + Sync + 'static {
    fn instance_id(&self) -> &str;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Applied once by the service before the record fans out to the sinks.
    fn normalize(self) -> Self {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Grpc,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grpc" => Some(Protocol::Grpc),
            "http" => Some(Protocol::Http),
            _ => None,
        }
    }
}

pub type Headers = BTreeMap<String, Vec<String>>;

/// One authenticated API call, captured by the request interceptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogRecord {
    pub log_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub request_url: String,
    pub response_status: u32,
    pub request_headers: Headers,
    pub response_headers: Headers,
    pub instance_id: String,
    pub project_id: String,
    pub requested_domain: String,
    pub requested_host: String,
}

impl AccessLogRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        protocol: Protocol,
        instance_id: impl Into<String>,
        request_url: impl Into<String>,
    ) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            timestamp,
            protocol,
            request_url: request_url.into(),
            response_status: 0,
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            instance_id: instance_id.into(),
            project_id: String::new(),
            requested_domain: String::new(),
            requested_host: String::new(),
        }
    }

    pub fn with_status(mut self, status: u32) -> Self {
        self.response_status = status;
        self
    }

    pub fn with_request_headers(mut self, headers: Headers) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn with_response_headers(mut self, headers: Headers) -> Self {
        self.response_headers = headers;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_requested(mut self, domain: impl Into<String>, host: impl Into<String>) -> Self {
        self.requested_domain = domain.into();
        self.requested_host = host.into();
        self
    }
}

impl LogRecord for AccessLogRecord {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn normalize(mut self) -> Self {
        self.request_headers = redact_headers(self.request_headers);
        self.response_headers = redact_headers(self.response_headers);
        self
    }
}

/// Lower-case header names, merge duplicates and mask credentials.
fn redact_headers(headers: Headers) -> Headers {
    let mut normalized = Headers::new();
    for (name, values) in headers {
        let name = name.to_ascii_lowercase();
        if REDACTED_HEADERS.contains(&name.as_str()) {
            normalized.insert(name, vec![REDACTED_VALUE.to_string()]);
        } else {
            normalized.entry(name).or_default().extend(values);
        }
    }
    normalized
}
