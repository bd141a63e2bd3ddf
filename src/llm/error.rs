//! Error taxonomy for routing and provider invocation

use crate::neo4j::models::PrivacyLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::profiles::TaskKind;

/// No provider satisfies the capability and privacy constraints
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    #[error("no eligible provider for task '{task}' at privacy level '{level}'")]
    NoEligibleProvider { task: TaskKind, level: PrivacyLevel },
}

/// Invalid provider table
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("provider '{0}' is configured more than once")]
    DuplicateProvider(String),
}

/// Failure reported by a backend for a single request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("{0}")]
    Failed(String),
}

/// Failure of an invocation after retries have been applied
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("provider '{provider}' rate limited the request")]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },

    #[error("provider '{provider}' failed: {message}")]
    Failed { provider: String, message: String },

    /// The response could not be parsed into the task's schema
    #[error("provider '{provider}' returned an invalid response: {reason}")]
    SchemaValidation {
        provider: String,
        reason: String,
        raw: String,
    },
}

impl ProviderError {
    /// Transient failures that the invocation layer retries
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RateLimited { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::ProviderTimeout,
            Self::RateLimited { .. } => ErrorKind::ProviderRateLimited,
            Self::Failed { .. } => ErrorKind::ProviderError,
            Self::SchemaValidation { .. } => ErrorKind::SchemaValidationFailed,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Failed { provider, .. }
            | Self::SchemaValidation { provider, .. } => provider,
        }
    }

    /// Lift a backend failure into the provider taxonomy
    pub fn from_backend(provider: &str, timeout_ms: u64, err: BackendError) -> Self {
        match err {
            BackendError::Timeout => Self::Timeout {
                provider: provider.to_string(),
                timeout_ms,
            },
            BackendError::RateLimited { retry_after_ms } => Self::RateLimited {
                provider: provider.to_string(),
                retry_after_ms,
            },
            BackendError::Failed(message) => Self::Failed {
                provider: provider.to_string(),
                message,
            },
        }
    }
}

/// Flat error classification used in reports and API responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoEligibleProvider,
    ProviderTimeout,
    ProviderRateLimited,
    ProviderError,
    SchemaValidationFailed,
    Storage,
    PrivacyViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoEligibleProvider => "no_eligible_provider",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderRateLimited => "provider_rate_limited",
            Self::ProviderError => "provider_error",
            Self::SchemaValidationFailed => "schema_validation_failed",
            Self::Storage => "storage",
            Self::PrivacyViolation => "privacy_violation",
        };
        write!(f, "{}", s)
    }
}

impl From<&RoutingError> for ErrorKind {
    fn from(_: &RoutingError) -> Self {
        Self::NoEligibleProvider
    }
}
