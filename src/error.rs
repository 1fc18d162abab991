//! Error types for the HitBTC WebSocket client

use crate::data::RequestId;
use thiserror::Error;
use std::fmt;

/// Main error type for the client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Queue error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Connection-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Failed to establish connection: {0}")]
    EstablishmentFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Cannot send payload - connection not established")]
    NotConnected,

    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Connection worker already running")]
    AlreadyStarted,
}

/// Errors raised while decoding or classifying an inbound frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),
}

/// Request correlation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    #[error("No pending request with id {0}")]
    UnknownRequestId(RequestId),
}

/// Login errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Must give API key and secret to login to API")]
    MissingCredentials,

    #[error("Invalid API secret: {0}")]
    InvalidSecret(String),
}

/// Consumer-side queue errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Queue is empty")]
    Empty,

    #[error("Queue is full")]
    Full,

    #[error("Timed out waiting for an outcome")]
    Timeout,

    #[error("Queue closed")]
    Closed,
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorSeverity {
    Low,      // Nothing lost that was asked for
    Medium,   // Recoverable errors, dropped frames
    High,     // Errors that affect a caller's request
    Critical, // The client cannot operate
}

impl ErrorSeverity {
    pub fn from_error(error: &ClientError) -> Self {
        match error {
            ClientError::Configuration(_) => ErrorSeverity::Critical,
            ClientError::Auth(_) => ErrorSeverity::High,
            ClientError::Connection(conn_err) => match conn_err {
                ConnectionError::NotConnected => ErrorSeverity::Medium,
                ConnectionError::Timeout(_) => ErrorSeverity::Medium,
                ConnectionError::AlreadyStarted => ErrorSeverity::Low,
                _ => ErrorSeverity::High,
            },
            ClientError::Message(_) => ErrorSeverity::Medium,
            ClientError::Registry(RegistryError::UnknownRequestId(_)) => ErrorSeverity::Medium,
            ClientError::Registry(RegistryError::DuplicateRequestId(_)) => ErrorSeverity::High,
            ClientError::Sink(_) => ErrorSeverity::Low,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// Error reporter for locally recovered anomalies
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log `error` at the level matching its severity, with the offending frame when given
    pub fn report(error: &ClientError, frame: Option<&str>) -> ErrorSeverity {
        let severity = ErrorSeverity::from_error(error);
        let frame = frame.unwrap_or("-");

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                tracing::error!(%severity, "{} | frame: {}", error, frame);
            }
            ErrorSeverity::Medium => {
                tracing::warn!(%severity, "{} | frame: {}", error, frame);
            }
            ErrorSeverity::Low => {
                tracing::debug!(%severity, "{} | frame: {}", error, frame);
            }
        }

        severity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        let unknown = ClientError::from(RegistryError::UnknownRequestId(RequestId::Int(999)));
        assert_eq!(ErrorSeverity::from_error(&unknown), ErrorSeverity::Medium);

        let malformed = ClientError::from(MessageError::Malformed("no method".into()));
        assert_eq!(ErrorSeverity::from_error(&malformed), ErrorSeverity::Medium);

        let creds = ClientError::from(AuthError::MissingCredentials);
        assert_eq!(ErrorSeverity::from_error(&creds), ErrorSeverity::High);
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::from(ConnectionError::NotConnected);
        assert_eq!(
            err.to_string(),
            "Connection error: Cannot send payload - connection not established"
        );

        let err = RegistryError::DuplicateRequestId(RequestId::Str("abc".into()));
        assert_eq!(err.to_string(), "Request id \"abc\" is already pending");
    }
}
