//! Storage for bucket and quota records.
//!
//! [`BucketStore`] is the seam to the persistence engine. It is designed to
//! support both in-memory and distributed backends: every record carries a
//! `version`, and updates are conditional on the version the caller read.

use crate::error::LimitError;
use crate::quota::limit::{QuotaId, QuotaLimit};
use crate::rate_limit::bucket::{BucketId, RateLimitBucket};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Abstract storage interface for versioned limit records.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a bucket by id.
    async fn get_bucket(&self, id: &BucketId) -> Result<Option<RateLimitBucket>, Self::Error>;

    /// Insert a bucket if no record exists under its id.
    ///
    /// Returns `Ok(false)` if another writer created it first.
    async fn create_bucket(&self, bucket: RateLimitBucket) -> Result<bool, Self::Error>;

    /// Replace a bucket if the stored version still equals `expected_version`.
    ///
    /// Returns `Ok(true)` if the update succeeded, `Ok(false)` if a race was detected (retry needed).
    async fn update_bucket(
        &self,
        bucket: RateLimitBucket,
        expected_version: u64,
    ) -> Result<bool, Self::Error>;

    /// Fetch a quota by id.
    async fn get_quota(&self, id: &QuotaId) -> Result<Option<QuotaLimit>, Self::Error>;

    /// Insert a quota if no record exists under its id.
    async fn create_quota(&self, quota: QuotaLimit) -> Result<bool, Self::Error>;

    /// Replace a quota if the stored version still equals `expected_version`.
    async fn update_quota(&self, quota: QuotaLimit, expected_version: u64)
        -> Result<bool, Self::Error>;
}

#[async_trait]
impl<S> BucketStore for Arc<S>
where
    S: BucketStore + ?Sized,
{
    type Error = S::Error;

    async fn get_bucket(&self, id: &BucketId) -> Result<Option<RateLimitBucket>, Self::Error> {
        (**self).get_bucket(id).await
    }

    async fn create_bucket(&self, bucket: RateLimitBucket) -> Result<bool, Self::Error> {
        (**self).create_bucket(bucket).await
    }

    async fn update_bucket(
        &self,
        bucket: RateLimitBucket,
        expected_version: u64,
    ) -> Result<bool, Self::Error> {
        (**self).update_bucket(bucket, expected_version).await
    }

    async fn get_quota(&self, id: &QuotaId) -> Result<Option<QuotaLimit>, Self::Error> {
        (**self).get_quota(id).await
    }

    async fn create_quota(&self, quota: QuotaLimit) -> Result<bool, Self::Error> {
        (**self).create_quota(quota).await
    }

    async fn update_quota(
        &self,
        quota: QuotaLimit,
        expected_version: u64,
    ) -> Result<bool, Self::Error> {
        (**self).update_quota(quota, expected_version).await
    }
}

/// Errors from [`InMemoryStore`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    /// The store was switched offline with [`InMemoryStore::set_available`].
    #[error("in-memory store is offline")]
    Unavailable,
}

/// Simple in-memory record store.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    buckets: Arc<Mutex<HashMap<BucketId, RateLimitBucket>>>,
    quotas: Arc<Mutex<HashMap<QuotaId, QuotaLimit>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            buckets: Arc::default(),
            quotas: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store offline (every call fails) or bring it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().expect("bucket map poisoned").len()
    }

    pub fn quota_count(&self) -> usize {
        self.quotas.lock().expect("quota map poisoned").len()
    }

    fn online(&self) -> Result<(), MemoryStoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(MemoryStoreError::Unavailable)
        }
    }
}

fn insert_absent<K, V>(map: &Mutex<HashMap<K, V>>, key: K, value: V) -> bool
where
    K: std::hash::Hash + Eq,
{
    let mut guard = map.lock().expect("record map poisoned");
    if guard.contains_key(&key) {
        return false;
    }
    guard.insert(key, value);
    true
}

fn replace_if_version<K, V>(
    map: &Mutex<HashMap<K, V>>,
    key: K,
    value: V,
    expected_version: u64,
    version_of: impl Fn(&V) -> u64,
) -> bool
where
    K: std::hash::Hash + Eq,
{
    let mut guard = map.lock().expect("record map poisoned");
    match guard.get(&key) {
        Some(current) if version_of(current) == expected_version => {
            guard.insert(key, value);
            true
        }
        _ => false,
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    type Error = MemoryStoreError;

    async fn get_bucket(&self, id: &BucketId) -> Result<Option<RateLimitBucket>, Self::Error> {
        self.online()?;
        Ok(self.buckets.lock().expect("bucket map poisoned").get(id).cloned())
    }

    async fn create_bucket(&self, bucket: RateLimitBucket) -> Result<bool, Self::Error> {
        self.online()?;
        Ok(insert_absent(&self.buckets, bucket.id.clone(), bucket))
    }

    async fn update_bucket(
        &self,
        bucket: RateLimitBucket,
        expected_version: u64,
    ) -> Result<bool, Self::Error> {
        self.online()?;
        Ok(replace_if_version(&self.buckets, bucket.id.clone(), bucket, expected_version, |b| {
            b.version
        }))
    }

    async fn get_quota(&self, id: &QuotaId) -> Result<Option<QuotaLimit>, Self::Error> {
        self.online()?;
        Ok(self.quotas.lock().expect("quota map poisoned").get(id).cloned())
    }

    async fn create_quota(&self, quota: QuotaLimit) -> Result<bool, Self::Error> {
        self.online()?;
        Ok(insert_absent(&self.quotas, quota.id.clone(), quota))
    }

    async fn update_quota(
        &self,
        quota: QuotaLimit,
        expected_version: u64,
    ) -> Result<bool, Self::Error> {
        self.online()?;
        Ok(replace_if_version(&self.quotas, quota.id.clone(), quota, expected_version, |q| {
            q.version
        }))
    }
}

/// Result of one read-compute-write attempt.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    /// The write landed (or no write was needed).
    Done(T),
    /// The conditional write lost a race; read again.
    Conflict,
}

/// Run `attempt` until it lands, at most `max_attempts` times.
///
/// Conflicts are retried immediately; any other error is returned as is.
/// Running out of attempts becomes `StoreUnavailable`.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    target: &str,
    max_attempts: usize,
    mut attempt: F,
) -> Result<T, LimitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, LimitError>>,
{
    let max_attempts = max_attempts.max(1);
    for n in 1..=max_attempts {
        match attempt().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict => {
                debug!(target: "quotaguard::store", record = %target, attempt = n, "conditional write lost race");
            }
        }
    }
    warn!(target: "quotaguard::store", record = %target, attempts = max_attempts, "conflict retries exhausted");
    Err(LimitError::conflicts_exhausted(target, max_attempts))
}
