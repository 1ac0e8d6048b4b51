//! Azure DNS authenticator for ACME dns-01 challenges.
//!
//! The authenticator publishes validation values as TXT records in Azure DNS
//! zones and withdraws them again once the CA has checked them. A single TXT
//! record set may be shared by several concurrent challenges (a wildcard and
//! its base domain both validate at `_acme-challenge.<domain>`), so every
//! change is a read-modify-write guarded by the record set's etag and retried
//! on conflict.
//!
//! ```rust,no_run
//! use certbot_dns_azure::{Authenticator, AzureConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AzureConfig::load("azure.ini")?;
//! let authenticator = Authenticator::from_config(&config)?;
//! authenticator
//!     .perform("example.com", "_acme-challenge.example.com", "token")
//!     .await?;
//! authenticator
//!     .cleanup("example.com", "_acme-challenge.example.com", "token")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use authenticator::Authenticator;
pub use config::{AzureConfig, CONFIG_TEMPLATE, KEY_PREFIX};
pub use credential::{Credential, CredentialOptions, Secret, TokenProvider};
pub use dns_zone_client::{
    ApiError, AzureDnsClient, DnsZoneApi, DnsZoneClient, Precondition, RecordSetRef,
    TxtRecordSet,
};
pub use environment::{AzureEnvironment, Endpoints, AZURE_ENVIRONMENT_VAR};
pub use error::{Error, Result};
pub use reconciler::{RecordReconciler, RetryPolicy, DEFAULT_TTL, PLACEHOLDER_VALUE};
pub use resource_id::ResourceId;
pub use zone_resolver::{ResolvedTarget, ZoneMapping};

mod authenticator;
mod config;
mod credential;
mod dns_zone_client;
mod environment;
mod error;
mod reconciler;
mod resource_id;
mod zone_resolver;

#[cfg(test)]
mod testing;
