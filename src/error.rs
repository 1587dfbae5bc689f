//! Error types for the Thames Water to InfluxDB2 forwarder.
//!
//! This module defines typed errors for the different components of the
//! application. The split mirrors the propagation policy of an aggregation
//! run: authentication errors abort the whole run, while per-day usage
//! errors and storage lookup timeouts are absorbed so the run can make
//! partial progress.

use std::fmt;
use thiserror::Error;

/// Result type alias using our custom error types.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type that encompasses all application errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// Portal login failures (fatal for the run)
    #[error("authentication error")]
    Auth(#[from] AuthError),

    /// Usage fetch and payload parsing errors
    #[error("usage error")]
    Usage(#[from] UsageError),

    /// InfluxDB storage errors
    #[error("storage error")]
    Storage(#[from] StorageError),

    /// Generic errors that don't fit other categories
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable parsing failed
    #[error("failed to parse environment variables: {0}")]
    EnvParse(String),

    /// Configuration value is invalid
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// The login step at which an authentication attempt failed.
///
/// The portal login is a linear sequence of HTTP exchanges; each variant
/// names one of them. Any failure is terminal for the attempt, so an
/// `AuthError` always pins down exactly how far the sequence got.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuthStep {
    Authorize,
    SelfAssert,
    Confirm,
    TokenExchange,
    Refresh,
    ExtractIdToken,
    PortalLogin,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthStep::Authorize => write!(f, "authorize"),
            AuthStep::SelfAssert => write!(f, "self-assert"),
            AuthStep::Confirm => write!(f, "confirm"),
            AuthStep::TokenExchange => write!(f, "token-exchange"),
            AuthStep::Refresh => write!(f, "refresh"),
            AuthStep::ExtractIdToken => write!(f, "extract-id-token"),
            AuthStep::PortalLogin => write!(f, "portal-login"),
        }
    }
}

/// A failed login attempt, naming the step that failed and why.
///
/// Network-level failures and protocol-level failures (missing cookie,
/// missing token, error fragment) are reported uniformly; the cause string
/// distinguishes them. Callers may retry the whole login sequence with
/// fresh PKCE material, never an individual step.
#[derive(Error, Debug)]
#[error("login failed at step '{step}': {cause}")]
pub struct AuthError {
    pub step: AuthStep,
    pub cause: String,
}

impl AuthError {
    /// Creates an auth error for the given step.
    pub fn new(step: AuthStep, cause: impl fmt::Display) -> Self {
        Self {
            step,
            cause: cause.to_string(),
        }
    }
}

/// Meter usage fetch and parsing errors.
#[derive(Error, Debug)]
pub enum UsageError {
    /// Lazy authentication on first use failed
    #[error("authentication failed")]
    Auth(#[from] AuthError),

    /// HTTP request failed before a status was obtained
    #[error("usage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Usage endpoint returned a non-2xx status
    #[error("usage request failed with status {status}")]
    Api { status: u16 },

    /// Response body could not be decoded as the expected JSON payload
    #[error("failed to decode usage payload: {0}")]
    Decode(String),

    /// A field of the payload has an unexpected shape
    #[error("failed to parse {field}: {message}")]
    Parse { field: String, message: String },
}

impl UsageError {
    /// Creates a parse error for a payload field.
    pub fn parse(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            field: field.into(),
            message: message.to_string(),
        }
    }
}

/// InfluxDB storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// InfluxDB client error
    #[error("InfluxDB error: {0}")]
    Client(#[from] influxdb2::RequestError),

    /// Prior aggregation state was unreachable in time
    #[error("statistics lookup timed out after {seconds} seconds")]
    LookupTimeout { seconds: u64 },

    /// A statistic point could not be converted to a data point
    #[error("invalid data point: {0}")]
    InvalidDataPoint(String),
}

impl ConfigError {
    /// Creates a new environment parse error.
    pub fn env_parse(err: impl fmt::Display) -> Self {
        Self::EnvParse(err.to_string())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod auth_error {
        use super::*;

        #[test]
        fn test_step_names() {
            let err = AuthError::new(AuthStep::Authorize, "transaction cookie missing");
            assert_eq!(
                err.to_string(),
                "login failed at step 'authorize': transaction cookie missing"
            );

            let err = AuthError::new(AuthStep::ExtractIdToken, "marker absent");
            assert_eq!(
                err.to_string(),
                "login failed at step 'extract-id-token': marker absent"
            );
        }

        #[test]
        fn test_step_is_preserved() {
            let err = AuthError::new(AuthStep::Confirm, "no code");
            assert_eq!(err.step, AuthStep::Confirm);
        }
    }

    mod usage_error {
        use super::*;

        #[test]
        fn test_api_status() {
            let err = UsageError::Api { status: 502 };
            assert_eq!(err.to_string(), "usage request failed with status 502");
        }

        #[test]
        fn test_parse() {
            let err = UsageError::parse("Label", "expected HH:MM, got 'abc'");
            assert_eq!(
                err.to_string(),
                "failed to parse Label: expected HH:MM, got 'abc'"
            );
        }

        #[test]
        fn test_auth_conversion() {
            let auth = AuthError::new(AuthStep::SelfAssert, "status 403");
            let err: UsageError = auth.into();
            assert!(matches!(err, UsageError::Auth(_)));
        }
    }

    mod storage_error {
        use super::*;

        #[test]
        fn test_lookup_timeout() {
            let err = StorageError::LookupTimeout { seconds: 5 };
            assert_eq!(
                err.to_string(),
                "statistics lookup timed out after 5 seconds"
            );
        }

        #[test]
        fn test_invalid_data_point() {
            let err = StorageError::InvalidDataPoint("missing field".to_string());
            assert_eq!(err.to_string(), "invalid data point: missing field");
        }
    }

    mod config_error {
        use super::*;

        #[test]
        fn test_env_parse_error() {
            let err = ConfigError::env_parse("invalid format");
            assert_eq!(
                err.to_string(),
                "failed to parse environment variables: invalid format"
            );
        }

        #[test]
        fn test_invalid_error() {
            let err = ConfigError::invalid("liter_cost", "out of range");
            assert_eq!(
                err.to_string(),
                "invalid configuration value for liter_cost: out of range"
            );
        }
    }

    mod error_conversion {
        use super::*;

        #[test]
        fn test_auth_error_conversion() {
            let auth = AuthError::new(AuthStep::PortalLogin, "status 500");
            let err: Error = auth.into();
            assert!(matches!(err, Error::Auth(_)));
        }

        #[test]
        fn test_anyhow_conversion() {
            let err = Error::Config(ConfigError::invalid("fetch_hours", "24 is out of range"));
            let anyhow_err: anyhow::Error = err.into();
            assert!(anyhow_err.to_string().contains("configuration error"));
        }
    }
}
