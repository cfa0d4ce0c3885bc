//! Registry mapping client keys to their token buckets.
//!
//! Buckets are created lazily on first sight and live for the life of the registry.
//! Lookups take a shared read lock; creation takes the write lock for the whole
//! check-then-insert, so racing first requests for one key all observe a single bucket.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::clock::Clock;
use crate::key::ClientKey;
use crate::rate_limit::bucket::{Bucket, BucketPolicy};
use tracing::info;

/// In-memory key -> bucket map backed by an RwLock.
#[derive(Debug)]
pub struct BucketRegistry {
    policy: BucketPolicy,
    clock: Arc<dyn Clock>,
    inner: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl BucketRegistry {
    /// Create an empty registry; every bucket it creates uses `policy`.
    pub fn new(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock, inner: RwLock::new(HashMap::new()) }
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Clock used to seed new buckets and drive refills.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the bucket for `key`, creating a full one if absent.
    pub fn get(&self, key: &ClientKey) -> Arc<Bucket> {
        if let Some(bucket) = self.lookup(key) {
            return bucket;
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have inserted between our read and write locks.
        let bucket = map.entry(key.as_str().to_owned()).or_insert_with(|| {
            info!(target: "tollgate::registry", key = %key, capacity = self.policy.capacity(), "bucket created");
            Arc::new(Bucket::new(self.policy, self.clock.now_millis()))
        });
        Arc::clone(bucket)
    }

    /// Existing bucket for `key`, without creating one.
    pub fn lookup(&self, key: &ClientKey) -> Option<Arc<Bucket>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key.as_str()).cloned()
    }

    /// Refill `key`'s bucket to capacity. Returns `false` if the key has no bucket yet,
    /// which already means a full budget.
    pub fn reset(&self, key: &ClientKey) -> bool {
        match self.lookup(key) {
            Some(bucket) => {
                bucket.reset(self.clock.now_millis());
                info!(target: "tollgate::registry", key = %key, "bucket reset");
                true
            }
            None => false,
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot `(key, tokens)` pairs sorted by key. Token counts do not include
    /// refills pending since each bucket's last request.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, u64)> =
            map.iter().map(|(k, b)| (k.clone(), b.tokens())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    fn registry(capacity: u64) -> BucketRegistry {
        let policy = BucketPolicy::new(capacity, Duration::from_secs(60)).unwrap();
        BucketRegistry::new(policy, Arc::new(ManualClock::new()))
    }

    fn key(s: &str) -> ClientKey {
        ClientKey::new(s).unwrap()
    }

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn get_returns_same_instance_per_key() {
        let registry = registry(3);
        let a = registry.get(&key("10.0.0.1"));
        let b = registry.get(&key("10.0.0.1"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let other = registry.get(&key("10.0.0.2"));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn new_buckets_start_full() {
        let registry = registry(4);
        assert_eq!(registry.get(&key("k")).tokens(), 4);
    }

    #[test]
    fn concurrent_first_access_creates_one_bucket() {
        let registry = Arc::new(registry(5));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get(&key("racer")))
            })
            .collect();
        let buckets: Vec<Arc<Bucket>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(buckets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reset_refills_known_keys_only() {
        let registry = registry(2);
        assert!(!registry.reset(&key("unknown")));
        assert!(registry.is_empty());

        let bucket = registry.get(&key("k"));
        assert!(bucket.try_consume(0).is_allowed());
        assert!(bucket.try_consume(0).is_allowed());
        assert!(registry.reset(&key("k")));
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = registry(2);
        registry.get(&key("b"));
        registry.get(&key("a")).try_consume(0);
        assert_eq!(registry.snapshot(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn logs_bucket_creation_once() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = registry(1);
        registry.get(&key("10.1.1.1"));
        registry.get(&key("10.1.1.1"));

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("bucket created").count(), 1);
        assert!(logs.contains("tollgate::registry"));
    }
}
