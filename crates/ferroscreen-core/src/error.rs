use thiserror::Error;

use crate::batch::FetchError;
use crate::directory::DirectoryError;
use crate::upstream::UpstreamError;

/// Malformed caller input. Surfaced as a client error and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be a non-empty array")]
    EmptyList { field: &'static str },

    #[error("{field} must be a JSON object")]
    NotAnObject { field: &'static str },

    #[error("{field} cannot be empty")]
    EmptyValue { field: &'static str },

    #[error(
        "no metrics requested: provide metricsList or metricsFilter, \
         or fsMetricsList or fsMetricsFilter"
    )]
    NoMetricsRequested,

    #[error("fsDate is required when financial statement metrics are requested")]
    MissingFsDate,
}

/// Top-level error for the screening operations.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl ScreenError {
    /// Upstream text that can be handed to the caller verbatim.
    ///
    /// Only present when the upstream API itself rejected the request; transport
    /// failures and local errors return `None`.
    pub fn forwardable_message(&self) -> Option<&str> {
        match self {
            Self::Upstream(error) => error.upstream_message(),
            Self::Fetch(error) => error.upstream_message(),
            Self::Directory(DirectoryError::Upstream(error)) => error.upstream_message(),
            _ => None,
        }
    }

    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpError;

    #[test]
    fn rejected_upstream_message_is_forwardable() {
        let error = ScreenError::from(UpstreamError::Rejected {
            status: 400,
            message: String::from("stockCodes is invalid"),
        });

        assert_eq!(error.forwardable_message(), Some("stockCodes is invalid"));
        assert!(!error.is_client_error());
    }

    #[test]
    fn transport_failures_are_not_forwardable() {
        let error = ScreenError::from(UpstreamError::Transport {
            attempts: 5,
            source: HttpError::new("connection failed"),
        });

        assert_eq!(error.forwardable_message(), None);
    }

    #[test]
    fn validation_errors_are_client_errors() {
        let error = ScreenError::from(ValidationError::MissingFsDate);

        assert!(error.is_client_error());
        assert!(error.to_string().contains("fsDate"));
    }
}
