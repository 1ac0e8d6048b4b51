use std::{collections::BTreeSet, fmt};

use enum_dispatch::enum_dispatch;
use thiserror::Error;

pub use azure::AzureDnsClient;

mod azure;

/// Identifies one TXT record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordSetRef<'a> {
    pub subscription_id: &'a str,
    pub resource_group: &'a str,
    pub zone: &'a str,
    /// Record name relative to the zone, `@` for the apex.
    pub name: &'a str,
}

impl fmt::Display for RecordSetRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/TXT/{}", self.resource_group, self.zone, self.name)
    }
}

/// Current state of a TXT record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtRecordSet {
    pub values: BTreeSet<String>,
    /// Concurrency token, absent when the record does not exist.
    pub etag: Option<String>,
}

/// Write precondition derived from the read a write is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The record must still carry this etag (`If-Match`).
    Matches(String),
    /// The record must not exist (`If-None-Match: *`).
    Absent,
    /// Unconditional, for records read without an etag.
    Any,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("record set not found")]
    NotFound,
    #[error("precondition failed: {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait DnsZoneApi {
    /// Read a TXT record set. Fails with [`ApiError::NotFound`] if it doesn't exist.
    async fn get_txt(&self, record: &RecordSetRef<'_>) -> Result<TxtRecordSet, ApiError>;

    /// Create or replace a TXT record set, one TXT record per value.
    async fn put_txt(
        &self,
        record: &RecordSetRef<'_>,
        ttl: u32,
        values: &BTreeSet<String>,
        precondition: Precondition,
    ) -> Result<(), ApiError>;

    /// Delete a TXT record set.
    async fn delete_txt(
        &self,
        record: &RecordSetRef<'_>,
        precondition: Precondition,
    ) -> Result<(), ApiError>;
}

/// A DNS zone client.
#[derive(Debug)]
#[enum_dispatch(DnsZoneApi)]
pub enum DnsZoneClient {
    Azure(AzureDnsClient),
}
