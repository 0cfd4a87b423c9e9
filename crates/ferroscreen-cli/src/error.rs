use ferroscreen_core::{CacheError, ConfigError, FilterConfigError, ScreenError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no API token: pass --token or set FERROSCREEN_TOKEN")]
    MissingToken,

    #[error("invalid request file: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Screen(#[from] ScreenError),

    #[error(transparent)]
    FilterConfig(#[from] FilterConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::MissingToken | Self::InvalidRequest(_) => 2,
            Self::Screen(error) if error.is_client_error() => 2,
            Self::Screen(error) if error.forwardable_message().is_some() => 3,
            Self::Screen(_) => 6,
            Self::FilterConfig(FilterConfigError::InvalidField { .. }) => 2,
            Self::Serialization(_) => 4,
            Self::FilterConfig(_) | Self::Cache(_) | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroscreen_core::{UpstreamError, ValidationError};

    #[test]
    fn upstream_rejections_have_their_own_exit_code() {
        let rejected = CliError::from(ScreenError::from(UpstreamError::Rejected {
            status: 400,
            message: String::from("token is invalid"),
        }));
        let rate_limited =
            CliError::from(ScreenError::from(UpstreamError::RateLimited { attempts: 5 }));
        let invalid = CliError::from(ScreenError::from(ValidationError::MissingFsDate));

        assert_eq!(rejected.exit_code(), 3);
        assert_eq!(rate_limited.exit_code(), 6);
        assert_eq!(invalid.exit_code(), 2);
        assert_eq!(CliError::MissingToken.exit_code(), 2);
    }
}
