use tracing::info;

use crate::{
    config::AzureConfig,
    credential::TokenProvider,
    dns_zone_client::{AzureDnsClient, DnsZoneApi, DnsZoneClient},
    error::{Error, Result},
    reconciler::RecordReconciler,
    zone_resolver::{ResolvedTarget, ZoneMapping},
};

/// Fulfills dns-01 challenges for the configured zones.
#[derive(Debug)]
pub struct Authenticator<C = DnsZoneClient> {
    zones: ZoneMapping,
    reconciler: RecordReconciler<C>,
}

impl Authenticator {
    /// Authenticator talking to Azure DNS with the configured credential.
    pub fn from_config(config: &AzureConfig) -> Result<Self> {
        let endpoints = config.environment.endpoints();
        let credential = config.credentials.select();
        info!(
            "using {} credentials against {}",
            credential.kind(),
            config.environment
        );
        let tokens = TokenProvider::new(credential, endpoints).map_err(Error::Client)?;
        let client = AzureDnsClient::new(endpoints, tokens).map_err(Error::Client)?;
        Ok(Self::new(
            config.zones.clone(),
            RecordReconciler::new(DnsZoneClient::Azure(client)),
        ))
    }
}

impl<C> Authenticator<C> {
    pub fn new(zones: ZoneMapping, reconciler: RecordReconciler<C>) -> Self {
        Self { zones, reconciler }
    }

    pub fn reconciler(&self) -> &RecordReconciler<C> {
        &self.reconciler
    }
}

impl<C: DnsZoneApi> Authenticator<C> {
    /// Publish `validation` at `validation_name`, the challenge record for `domain`.
    pub async fn perform(
        &self,
        domain: &str,
        validation_name: &str,
        validation: &str,
    ) -> Result<ResolvedTarget> {
        let target = self.zones.resolve(domain, validation_name)?;
        info!(
            "adding TXT record {} in zone {} for {domain}",
            target.relative_record_name, target.zone
        );
        self.reconciler.add_value(&target, validation).await?;
        Ok(target)
    }

    /// Withdraw a value published by [`Authenticator::perform`].
    pub async fn cleanup(
        &self,
        domain: &str,
        validation_name: &str,
        validation: &str,
    ) -> Result<ResolvedTarget> {
        let target = self.zones.resolve(domain, validation_name)?;
        info!(
            "removing TXT record {} in zone {} for {domain}",
            target.relative_record_name, target.zone
        );
        self.reconciler.remove_value(&target, validation).await?;
        Ok(target)
    }
}
