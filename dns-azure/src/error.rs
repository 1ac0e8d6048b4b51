use thiserror::Error;

use crate::dns_zone_client::ApiError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad zone mapping, malformed resource id or missing authentication method.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to create dns client: {0:#}")]
    Client(anyhow::Error),
    #[error("invalid TXT value {0:?}")]
    InvalidValue(String),
    #[error(
        "failed to {action} TXT record {record} for domain {domain}, \
         max retries due to concurrent access exceeded after {attempts} attempts: {source}"
    )]
    RetryExhausted {
        action: &'static str,
        domain: String,
        record: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },
    #[error("failed to {action} TXT record {record} for domain {domain}: {source}")]
    Permanent {
        action: &'static str,
        domain: String,
        record: String,
        #[source]
        source: ApiError,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
