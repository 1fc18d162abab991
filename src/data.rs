//! Data models for requests, outcomes and client configuration

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Default HitBTC v2 WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://api.hitbtc.com/api/2/ws";

/// JSON-RPC parameter object
pub type Params = Map<String, Value>;

/// Correlation id carried by a request and echoed back in its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    Str(String),
}

impl RequestId {
    /// Read an id out of a decoded `id` field. Anything but an integer or a string is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Int),
            Value::String(s) => Some(RequestId::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Int(id) => write!(f, "{}", id),
            RequestId::Str(id) => write!(f, "{:?}", id),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Int(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::Str(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::Str(id)
    }
}

/// A request that was transmitted and still waits for its response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Params,
    #[serde(skip)]
    pub submitted_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(id: RequestId, method: &str, params: Params) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
            submitted_at: Utc::now(),
        }
    }

    /// Encode as the outbound JSON-RPC frame `{"method", "params", "id"}`
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&JsonRpcRequest {
            method: &self.method,
            params: &self.params,
            id: &self.id,
        })
    }

    /// Time spent waiting for a response
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request[{}]: {} {}",
            self.id,
            self.method,
            Value::Object(self.params.clone())
        )
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    method: &'a str,
    params: &'a Params,
    id: &'a RequestId,
}

/// Error object of a failed JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {}!",
            self.code,
            self.message,
            self.description.as_deref().unwrap_or("")
        )
    }
}

/// Classified event delivered to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `("Response", "Success", (request, response))`
    ResponseSuccess {
        request: PendingRequest,
        response: Value,
    },
    /// `("Response", "Failure", (request, response))`
    ResponseFailure {
        request: PendingRequest,
        error: RpcError,
        response: Value,
    },
    /// `(method, symbol, params)` with `symbol` removed from `params`
    StreamEvent {
        method: String,
        symbol: String,
        params: Params,
    },
    /// Unclassified text frame, only produced in raw mode
    Raw(String),
}

impl Outcome {
    /// First element of the consumer-visible triple: `"Response"` or the stream method
    pub fn category(&self) -> &str {
        match self {
            Outcome::ResponseSuccess { .. } | Outcome::ResponseFailure { .. } => "Response",
            Outcome::StreamEvent { method, .. } => method,
            Outcome::Raw(_) => "Raw",
        }
    }

    /// `"Success"` / `"Failure"` for responses
    pub fn status(&self) -> Option<&'static str> {
        match self {
            Outcome::ResponseSuccess { .. } => Some("Success"),
            Outcome::ResponseFailure { .. } => Some("Failure"),
            _ => None,
        }
    }

    /// Originating request for responses
    pub fn request(&self) -> Option<&PendingRequest> {
        match self {
            Outcome::ResponseSuccess { request, .. } | Outcome::ResponseFailure { request, .. } => {
                Some(request)
            }
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        self.status().is_some()
    }
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    /// Reconnect when no frame arrives for this long. A ping goes out after
    /// half of it without data.
    pub connection_timeout: Duration,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    /// Capacity of the outcome queue
    pub queue_capacity: usize,
    /// Deliver text frames verbatim, no classification or request bookkeeping
    pub raw: bool,
    /// Compute and report outcomes but never queue them
    pub suppress_delivery: bool,
    /// Do not echo reports to stdout
    pub silent: bool,
    /// Evict pending requests older than this; `None` keeps them forever
    pub request_ttl: Option<Duration>,
    /// Bound for `disconnect()` waiting on the connection worker
    pub join_timeout: Duration,
    /// Replay login and subscriptions after every re-open
    pub resubscribe_on_reconnect: bool,
    /// Span every log line of this client is recorded under
    pub log_span: Option<tracing::Span>,
}

impl ClientConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidUrl("URL cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::InvalidUrl(format!(
                "{} is not a WebSocket URL",
                self.url
            )));
        }

        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "must be greater than 0".to_string(),
            });
        }

        let durations = [
            ("connection_timeout", self.connection_timeout),
            ("reconnect_interval", self.reconnect_interval),
            ("ping_interval", self.ping_interval),
            ("pong_timeout", self.pong_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if matches!(self.request_ttl, Some(ttl) if ttl.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "request_ttl",
                reason: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }

    /// The configured span, or a fresh one naming the endpoint
    pub fn span(&self) -> tracing::Span {
        self.log_span
            .clone()
            .unwrap_or_else(|| tracing::info_span!("hitbtc_ws", url = %self.url))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            connection_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(120),
            pong_timeout: Duration::from_secs(30),
            queue_capacity: 100,
            raw: false,
            suppress_delivery: false,
            silent: false,
            request_ttl: Some(Duration::from_secs(300)),
            join_timeout: Duration::from_secs(1),
            resubscribe_on_reconnect: false,
            log_span: None,
        }
    }
}
