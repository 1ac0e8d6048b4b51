//! In-memory record store honoring etag preconditions.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::{Arc, Mutex},
};

use tracing::subscriber::DefaultGuard;

use crate::dns_zone_client::{ApiError, DnsZoneApi, Precondition, RecordSetRef, TxtRecordSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Get(String),
    Put(String, BTreeSet<String>),
    Delete(String),
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, (BTreeSet<String>, u64)>,
    next_etag: u64,
    forced_conflicts: u32,
    fail_writes: bool,
    vanish_on_delete: bool,
    calls: Vec<Call>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn insert(&self, key: &str, values: &[&str]) {
        let mut state = self.state();
        state.next_etag += 1;
        let etag = state.next_etag;
        state.records.insert(
            key.to_string(),
            (values.iter().map(|v| v.to_string()).collect(), etag),
        );
    }

    pub(crate) fn values(&self, key: &str) -> Option<BTreeSet<String>> {
        self.state().records.get(key).map(|(v, _)| v.clone())
    }

    /// Reject the next `n` writes with a conflict.
    pub(crate) fn force_conflicts(&self, n: u32) {
        self.state().forced_conflicts = n;
    }

    /// Fail every write with a non-retryable error.
    pub(crate) fn fail_writes(&self) {
        self.state().fail_writes = true;
    }

    /// Report deletes as not found, as if another writer got there first.
    pub(crate) fn vanish_on_delete(&self) {
        self.state().vanish_on_delete = true;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub(crate) fn puts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Put(..)))
            .count()
    }

    pub(crate) fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete(..)))
            .count()
    }
}

fn check(
    current: Option<&(BTreeSet<String>, u64)>,
    precondition: &Precondition,
) -> Result<(), ApiError> {
    let ok = match (precondition, current) {
        (Precondition::Any, _) => true,
        (Precondition::Absent, current) => current.is_none(),
        (Precondition::Matches(etag), Some((_, current))) => *etag == current.to_string(),
        (Precondition::Matches(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ApiError::Conflict("etag mismatch".into()))
    }
}

impl State {
    fn write_guard(&mut self) -> Result<(), ApiError> {
        if self.forced_conflicts > 0 {
            self.forced_conflicts -= 1;
            return Err(ApiError::Conflict("forced conflict".into()));
        }
        if self.fail_writes {
            return Err(anyhow::anyhow!("azure dns api returned 403 Forbidden").into());
        }
        Ok(())
    }
}

impl DnsZoneApi for FakeStore {
    async fn get_txt(&self, record: &RecordSetRef<'_>) -> Result<TxtRecordSet, ApiError> {
        let key = record.to_string();
        let result = {
            let mut state = self.state();
            state.calls.push(Call::Get(key.clone()));
            match state.records.get(&key) {
                Some((values, etag)) => Ok(TxtRecordSet {
                    values: values.clone(),
                    etag: Some(etag.to_string()),
                }),
                None => Err(ApiError::NotFound),
            }
        };
        // Let concurrent writers read the same state before anyone writes.
        tokio::task::yield_now().await;
        result
    }

    async fn put_txt(
        &self,
        record: &RecordSetRef<'_>,
        _ttl: u32,
        values: &BTreeSet<String>,
        precondition: Precondition,
    ) -> Result<(), ApiError> {
        let key = record.to_string();
        let mut state = self.state();
        state.calls.push(Call::Put(key.clone(), values.clone()));
        state.write_guard()?;
        check(state.records.get(&key), &precondition)?;
        state.next_etag += 1;
        let etag = state.next_etag;
        state.records.insert(key, (values.clone(), etag));
        Ok(())
    }

    async fn delete_txt(
        &self,
        record: &RecordSetRef<'_>,
        precondition: Precondition,
    ) -> Result<(), ApiError> {
        let key = record.to_string();
        let mut state = self.state();
        state.calls.push(Call::Delete(key.clone()));
        state.write_guard()?;
        if state.vanish_on_delete {
            state.records.remove(&key);
            return Err(ApiError::NotFound);
        }
        if !state.records.contains_key(&key) {
            return Err(ApiError::NotFound);
        }
        check(state.records.get(&key), &precondition)?;
        state.records.remove(&key);
        Ok(())
    }
}

/// Collects the formatted log output of the current thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub(crate) fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
