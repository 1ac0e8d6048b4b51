//! Read-modify-write of TXT record sets shared by uncoordinated writers.
//!
//! Every change is computed from a fresh read and written back conditionally on
//! the etag of that read. A rejected write means somebody else changed the
//! record in between; the whole read-modify-write is then retried after a
//! random delay.

use std::{collections::BTreeSet, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    dns_zone_client::{ApiError, DnsZoneApi, Precondition, RecordSetRef},
    error::{Error, Result},
    zone_resolver::ResolvedTarget,
};

/// Value that keeps a non-deletable record alive while it holds no challenge.
/// ACME challenge values are base64url digests and can never equal it.
pub const PLACEHOLDER_VALUE: &str = "-";

/// TTL of the record sets written, in seconds.
pub const DEFAULT_TTL: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[builder(default = 10)]
    pub max_retries: u32,
    #[builder(default = Duration::from_secs(1))]
    pub min_backoff: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    fn backoff(&self) -> Duration {
        let low = self.min_backoff.min(self.max_backoff).as_millis() as u64;
        let high = self.max_backoff.max(self.min_backoff).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Add,
    Remove,
}

impl Action {
    fn verb(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove/empty",
        }
    }
}

#[derive(Debug)]
pub struct RecordReconciler<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C> RecordReconciler<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

fn record_ref(target: &ResolvedTarget) -> RecordSetRef<'_> {
    RecordSetRef {
        subscription_id: &target.subscription_id,
        resource_group: &target.resource_group,
        zone: &target.zone,
        name: &target.relative_record_name,
    }
}

impl<C: DnsZoneApi> RecordReconciler<C> {
    /// Make sure `value` is one of the values of the target record.
    pub async fn add_value(&self, target: &ResolvedTarget, value: &str) -> Result<()> {
        self.reconcile(Action::Add, target, value).await
    }

    /// Make sure `value` is no longer one of the values of the target record.
    ///
    /// A record left without values is deleted, or reset to
    /// [`PLACEHOLDER_VALUE`] if the target is not deletable.
    pub async fn remove_value(&self, target: &ResolvedTarget, value: &str) -> Result<()> {
        self.reconcile(Action::Remove, target, value).await
    }

    async fn reconcile(&self, action: Action, target: &ResolvedTarget, value: &str) -> Result<()> {
        if value == PLACEHOLDER_VALUE {
            return Err(Error::InvalidValue(value.to_string()));
        }
        let record = record_ref(target);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match action {
                Action::Add => self.try_add(&record, value).await,
                Action::Remove => self.try_remove(&record, target.deletable, value).await,
            };
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if !matches!(err, ApiError::Conflict(_)) {
                return Err(Error::Permanent {
                    action: action.verb(),
                    domain: target.domain.clone(),
                    record: target.record_display(),
                    source: err,
                });
            }
            if attempts > self.retry.max_retries {
                return Err(Error::RetryExhausted {
                    action: action.verb(),
                    domain: target.domain.clone(),
                    record: target.record_display(),
                    attempts,
                    source: err,
                });
            }
            let delay = self.retry.backoff();
            warn!(
                "concurrent access to record {}, sleeping {delay:?}, retry attempt: {attempts}",
                target.record_display()
            );
            sleep(delay).await;
        }
    }

    /// Current values and the precondition a write based on them must carry.
    async fn read(
        &self,
        record: &RecordSetRef<'_>,
    ) -> Result<Option<(BTreeSet<String>, Precondition)>, ApiError> {
        match self.client.get_txt(record).await {
            Ok(set) => {
                let precondition = match set.etag {
                    Some(etag) => Precondition::Matches(etag),
                    None => Precondition::Any,
                };
                Ok(Some((set.values, precondition)))
            }
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn try_add(&self, record: &RecordSetRef<'_>, value: &str) -> Result<(), ApiError> {
        let (current, precondition) = self
            .read(record)
            .await?
            .unwrap_or((BTreeSet::new(), Precondition::Absent));

        let mut desired = current.clone();
        desired.remove(PLACEHOLDER_VALUE);
        desired.insert(value.to_string());
        if desired == current {
            debug!("TXT record {record} already holds the value");
            return Ok(());
        }
        self.client
            .put_txt(record, DEFAULT_TTL, &desired, precondition)
            .await
    }

    async fn try_remove(
        &self,
        record: &RecordSetRef<'_>,
        deletable: bool,
        value: &str,
    ) -> Result<(), ApiError> {
        let Some((mut remaining, precondition)) = self.read(record).await? else {
            debug!("TXT record {record} does not exist, nothing to remove");
            return Ok(());
        };
        if !remaining.remove(value) {
            debug!("TXT record {record} does not hold the value, nothing to remove");
            return Ok(());
        }
        remaining.remove(PLACEHOLDER_VALUE);
        if !remaining.is_empty() {
            return self
                .client
                .put_txt(record, DEFAULT_TTL, &remaining, precondition)
                .await;
        }
        if !deletable {
            debug!("blanking TXT record {record}");
            let placeholder = BTreeSet::from([PLACEHOLDER_VALUE.to_string()]);
            return self
                .client
                .put_txt(record, DEFAULT_TTL, &placeholder, precondition)
                .await;
        }
        match self.client.delete_txt(record, precondition).await {
            // Somebody else removed it already.
            Err(ApiError::NotFound) => Ok(()),
            result => result,
        }
    }
}
