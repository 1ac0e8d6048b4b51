//! Azure resource id parsing.
//!
//! A resource id is a `/`-separated list of key/value pairs, e.g.
//! `/subscriptions/S/resourceGroups/RG/providers/Microsoft.Network/dnsZones/example.com`.

use crate::error::{Error, Result};

pub const SUBSCRIPTIONS: &str = "subscriptions";
pub const RESOURCE_GROUPS: &str = "resourceGroups";
pub const DNS_ZONES: &str = "dnsZones";
pub const TXT: &str = "TXT";

/// A parsed resource id. Keys are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pairs: Vec<(String, String)>,
}

impl ResourceId {
    pub fn parse(resource_id: &str) -> Result<Self> {
        let invalid = || Error::config(format!("invalid resource id: {resource_id}"));

        let trimmed = resource_id.strip_prefix('/').unwrap_or(resource_id);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if !trimmed.contains('/') {
            return Err(invalid());
        }
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() % 2 != 0 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        let pairs = parts
            .chunks_exact(2)
            .map(|kv| (kv[0].to_string(), kv[1].to_string()))
            .collect();
        Ok(Self { pairs })
    }

    /// Value of the last pair whose key matches `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.get(SUBSCRIPTIONS)
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.get(RESOURCE_GROUPS)
    }

    /// Zone the record should be written to instead of the matched domain.
    pub fn dns_zone(&self) -> Option<&str> {
        self.get(DNS_ZONES)
    }

    /// Explicit TXT record name, for records with record-scoped access.
    pub fn txt_record(&self) -> Option<&str> {
        self.get(TXT)
    }
}
