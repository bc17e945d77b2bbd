//! Error types for wms-extract
//!
//! This module defines the error hierarchy for the whole extractor.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Errors fall into the kinds reported by [`Error::kind`]; the transport
//! layer only ever retries the ones [`Error::is_retryable`] accepts.

use thiserror::Error;

/// The main error type for wms-extract
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("OAuth2 error: {message}")]
    OAuth2 { message: String },

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Circuit breaker is open, retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    // ============================================================================
    // Discovery / Schema Errors
    // ============================================================================
    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    #[error("Entity '{entity}' not found in catalog")]
    EntityNotFound { entity: String },

    #[error("Schema generation failed for '{entity}': {message}")]
    SchemaGeneration { entity: String, message: String },

    #[error("Record rejected: {message}")]
    Validation { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Run Control
    // ============================================================================
    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Entity '{entity}': {source}")]
    Entity {
        entity: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a schema generation error
    pub fn schema(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaGeneration {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a record validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Attach the entity this error belongs to
    pub fn for_entity(self, entity: impl Into<String>) -> Self {
        match self {
            already @ Self::Entity { .. } => already,
            other => Self::Entity {
                entity: entity.into(),
                source: Box::new(other),
            },
        }
    }

    /// The entity this error is attributed to, if any
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::Entity { entity, .. }
            | Self::EntityNotFound { entity }
            | Self::SchemaGeneration { entity, .. } => Some(entity),
            _ => None,
        }
    }

    /// The error with any entity wrapper removed
    pub fn root(&self) -> &Error {
        match self {
            Self::Entity { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::RateLimited { .. } | Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether this failure says something about upstream health
    ///
    /// Requests the upstream rejected as malformed or unauthorised do not
    /// count towards opening the circuit.
    pub fn counts_against_circuit(&self) -> bool {
        match self.root() {
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Http(_) | Error::RateLimited { .. } | Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Stable machine-readable kind used in structured error output
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Error::Config { .. }
            | Error::MissingConfigField { .. }
            | Error::InvalidConfigValue { .. }
            | Error::YamlParse(_)
            | Error::EntityNotFound { .. } => "configuration",
            Error::Auth { .. } | Error::OAuth2 { .. } | Error::InvalidUrl(_) => "fatal_transport",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::Discovery { .. } => "discovery",
            Error::SchemaGeneration { .. } => "schema_generation",
            Error::Validation { .. } => "validation",
            Error::State { .. } => "state",
            Error::Io(_) => "io",
            Error::Cancelled => "cancelled",
            Error::Decode { .. } | Error::JsonParse(_) => "fatal_transport",
            e if e.is_retryable() => "transient_transport",
            Error::Http(_) | Error::HttpStatus { .. } => "fatal_transport",
            _ => "other",
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(
        status,
        408 | 429 | 500 | 502 | 503 | 504 | 520 | 521 | 522 | 523 | 524
    )
}

/// Result type alias for wms-extract
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::missing_field("base_url");
        assert_eq!(err.to_string(), "Missing required config field: base_url");

        let err = Error::http_status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");
    }

    #[test_case(429, true ; "too many requests")]
    #[test_case(500, true ; "internal error")]
    #[test_case(503, true ; "unavailable")]
    #[test_case(400, false ; "bad request")]
    #[test_case(401, false ; "unauthorized")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(404, false ; "not found")]
    fn test_status_retryability(status: u16, expected: bool) {
        assert_eq!(Error::http_status(status, "").is_retryable(), expected);
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::RateLimited {
            retry_after_seconds: 60
        }
        .is_retryable());
        assert!(Error::Timeout { timeout_ms: 1000 }.is_retryable());
        assert!(!Error::config("test").is_retryable());
        assert!(!Error::CircuitOpen { retry_in_ms: 10 }.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::http_status(503, "").kind(), "transient_transport");
        assert_eq!(Error::http_status(404, "").kind(), "fatal_transport");
        assert_eq!(Error::CircuitOpen { retry_in_ms: 1 }.kind(), "circuit_open");
        assert_eq!(Error::discovery("x").kind(), "discovery");
        assert_eq!(Error::config("x").kind(), "configuration");
        assert_eq!(Error::validation("x").kind(), "validation");
    }

    #[test]
    fn test_entity_wrapping() {
        let err = Error::http_status(500, "boom").for_entity("item");
        assert_eq!(err.entity(), Some("item"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transient_transport");
        assert!(err.to_string().starts_with("Entity 'item'"));

        // Wrapping twice keeps the first entity
        let err = err.for_entity("order");
        assert_eq!(err.entity(), Some("item"));
    }

    #[test]
    fn test_circuit_accounting() {
        assert!(Error::http_status(502, "").counts_against_circuit());
        assert!(Error::http_status(429, "").counts_against_circuit());
        assert!(!Error::http_status(404, "").counts_against_circuit());
        assert!(!Error::http_status(401, "").counts_against_circuit());
    }
}
