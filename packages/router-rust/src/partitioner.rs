//! Key-based partitioner: hash a key, pick a lane, submit.
//!
//! A [`Partitioner`] owns a fixed table of [`Partition`] lanes built at
//! construction. Typed callers obtain a [`TypedPartitioner<T>`] by supplying a
//! key provider for `T`; every typed front shares the same untyped routing
//! core, so hashing and selection exist exactly once.

use std::future::Future;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use keyroute_core::{partition_for_key, HashGenerator, PartitionerProbe};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::config::PartitionerConfig;
use crate::error::{PartitionError, Result};
use crate::partition::{Completion, Partition};

// ---------------------------------------------------------------------------
// PartitionKeyProvider
// ---------------------------------------------------------------------------

/// Extracts the routing key from a work item.
///
/// Must be pure and deterministic for the lifetime of the typed front that
/// uses it. Returning `None` (or an empty key) rejects the item with
/// `PartitionError::InvalidKey`.
pub trait PartitionKeyProvider<T>: Send + Sync {
    fn partition_key(&self, item: &T) -> Option<Vec<u8>>;
}

impl<T, F> PartitionKeyProvider<T> for F
where
    F: Fn(&T) -> Option<Vec<u8>> + Send + Sync,
{
    fn partition_key(&self, item: &T) -> Option<Vec<u8>> {
        self(item)
    }
}

// ---------------------------------------------------------------------------
// Partitioner
// ---------------------------------------------------------------------------

struct PartitionerInner {
    id: String,
    partition_count: NonZeroU32,
    partitions: Box<[Partition]>,
    hash: Arc<dyn HashGenerator>,
}

/// Routes keyed work to a fixed set of sequential lanes.
///
/// Cloning is cheap and yields a handle to the same lanes. Routing is a pure
/// function of the key and the fixed partition table, so it takes no locks.
///
/// Routing after [`shutdown`](Self::shutdown) is a caller error; it is
/// reported as `PartitionError::PartitionClosed`.
#[derive(Clone)]
pub struct Partitioner {
    inner: Arc<PartitionerInner>,
}

impl Partitioner {
    /// Create a partitioner with `partition_count` lanes.
    ///
    /// Lane workers are spawned on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::InvalidConfiguration` if `partition_count` is
    /// 0 or if called outside a tokio runtime.
    pub fn new<H>(partition_count: u32, hash: H) -> Result<Self>
    where
        H: HashGenerator + 'static,
    {
        Self::with_generator(partition_count, Arc::new(hash))
    }

    /// Create a partitioner from a [`PartitionerConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`Partitioner::new`].
    pub fn from_config(config: &PartitionerConfig) -> Result<Self> {
        config.validate()?;
        Self::with_generator(config.partition_count, config.hash_generator())
    }

    fn with_generator(partition_count: u32, hash: Arc<dyn HashGenerator>) -> Result<Self> {
        let count = NonZeroU32::new(partition_count).ok_or_else(|| {
            PartitionError::invalid_configuration("partition count must be at least 1")
        })?;
        let runtime = Handle::try_current().map_err(|_| {
            PartitionError::invalid_configuration("partitioner must be created inside a tokio runtime")
        })?;

        let id = Uuid::new_v4().simple().to_string();
        let partitions = (0..partition_count)
            .map(|index| Partition::spawn(index, &id, &runtime))
            .collect::<Box<[_]>>();

        info!(
            partitioner = %id,
            partition_count,
            hash = hash.name(),
            "partitioner started"
        );

        Ok(Self {
            inner: Arc::new(PartitionerInner {
                id,
                partition_count: count,
                partitions,
                hash,
            }),
        })
    }

    /// Opaque identity, generated once at construction.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn partition_count(&self) -> u32 {
        self.inner.partition_count.get()
    }

    /// The lane at `index`, if it exists.
    #[must_use]
    pub fn partition(&self, index: u32) -> Option<&Partition> {
        self.inner.partitions.get(index as usize)
    }

    /// Bind a key provider for items of type `T`.
    ///
    /// The provider is not validated eagerly; bad keys surface at send time.
    #[must_use]
    pub fn typed<T, P>(&self, key_provider: P) -> TypedPartitioner<T>
    where
        T: Send + 'static,
        P: PartitionKeyProvider<T> + 'static,
    {
        TypedPartitioner {
            partitioner: self.clone(),
            key_provider: Arc::new(key_provider),
            _item: PhantomData,
        }
    }

    /// The partition a key routes to.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::InvalidKey` if `key` is empty.
    pub fn partition_for(&self, key: &[u8]) -> Result<u32> {
        if key.is_empty() {
            return Err(PartitionError::InvalidKey);
        }
        Ok(partition_for_key(
            &*self.inner.hash,
            key,
            self.inner.partition_count,
        ))
    }

    /// Hash `key`, select its lane and submit the item there.
    ///
    /// The lane's completion (or submit error) is returned unchanged.
    pub(crate) fn route<T, F, Fut, R, E>(
        &self,
        key: &[u8],
        item: T,
        continuation: F,
    ) -> Result<Completion<R>>
    where
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let partition_id = self.partition_for(key)?;
        trace!(partitioner = %self.inner.id, partition = partition_id, "routing item");
        self.inner.partitions[partition_id as usize].submit(item, continuation)
    }

    /// Structured report of identity, partition count and every lane.
    #[must_use]
    pub fn probe(&self) -> PartitionerProbe {
        PartitionerProbe {
            id: self.inner.id.clone(),
            partition_count: self.partition_count(),
            hash: self.inner.hash.name().to_string(),
            partitions: self.inner.partitions.iter().map(Partition::probe).collect(),
        }
    }

    /// Drain and close every lane concurrently.
    ///
    /// Completes once all lanes have drained. Lanes that finish before
    /// `cancel` fires stay shut down; the rest keep draining in the background.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::ShutdownAborted` listing every lane that had
    /// not drained when `cancel` fired.
    pub async fn shutdown(&self, cancel: CancellationToken) -> Result<()> {
        info!(partitioner = %self.inner.id, "partitioner shutting down");

        let results = join_all(
            self.inner
                .partitions
                .iter()
                .map(|partition| partition.shutdown(cancel.clone())),
        )
        .await;

        let mut aborted = Vec::new();
        for result in results {
            match result {
                Ok(()) => {}
                Err(PartitionError::ShutdownAborted { partitions }) => aborted.extend(partitions),
                // Partition::shutdown only fails with ShutdownAborted today.
                Err(other) => return Err(other),
            }
        }

        if aborted.is_empty() {
            info!(partitioner = %self.inner.id, "partitioner stopped");
            Ok(())
        } else {
            warn!(
                partitioner = %self.inner.id,
                partitions = ?aborted,
                "partitioner shutdown aborted"
            );
            Err(PartitionError::ShutdownAborted {
                partitions: aborted,
            })
        }
    }

    /// [`shutdown`](Self::shutdown) with a deadline instead of a token.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::ShutdownAborted` if the deadline elapsed
    /// before every lane drained.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> Result<()> {
        let cancel = CancellationToken::new();
        let shutdown = self.shutdown(cancel.clone());
        tokio::pin!(shutdown);

        tokio::select! {
            result = &mut shutdown => return result,
            () = tokio::time::sleep(timeout) => cancel.cancel(),
        }
        shutdown.await
    }
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("id", &self.inner.id)
            .field("partition_count", &self.inner.partition_count)
            .field("hash", &self.inner.hash.name())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TypedPartitioner
// ---------------------------------------------------------------------------

/// Per-type front over a [`Partitioner`].
///
/// Owns no state or lifecycle of its own: probe and shutdown forward to the
/// owning partitioner.
pub struct TypedPartitioner<T> {
    partitioner: Partitioner,
    key_provider: Arc<dyn PartitionKeyProvider<T>>,
    _item: PhantomData<fn(T)>,
}

impl<T: Send + 'static> TypedPartitioner<T> {
    /// Extract the item's key and submit it to the selected lane.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::InvalidKey` if the provider yields no key or an
    /// empty one (no lane is touched), or `PartitionError::PartitionClosed`
    /// after shutdown.
    pub fn send<F, Fut, R, E>(&self, item: T, continuation: F) -> Result<Completion<R>>
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let key = self
            .key_provider
            .partition_key(&item)
            .filter(|key| !key.is_empty())
            .ok_or(PartitionError::InvalidKey)?;
        self.partitioner.route(&key, item, continuation)
    }

    #[must_use]
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    #[must_use]
    pub fn probe(&self) -> PartitionerProbe {
        self.partitioner.probe()
    }

    /// Forwards to [`Partitioner::shutdown`].
    ///
    /// # Errors
    ///
    /// See [`Partitioner::shutdown`].
    pub async fn shutdown(&self, cancel: CancellationToken) -> Result<()> {
        self.partitioner.shutdown(cancel).await
    }

    /// Forwards to [`Partitioner::shutdown_timeout`].
    ///
    /// # Errors
    ///
    /// See [`Partitioner::shutdown_timeout`].
    pub async fn shutdown_timeout(&self, timeout: Duration) -> Result<()> {
        self.partitioner.shutdown_timeout(timeout).await
    }
}

impl<T> Clone for TypedPartitioner<T> {
    fn clone(&self) -> Self {
        Self {
            partitioner: self.partitioner.clone(),
            key_provider: Arc::clone(&self.key_provider),
            _item: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedPartitioner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedPartitioner")
            .field("partitioner", &self.partitioner)
            .field("item", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use keyroute_core::{Fnv1aHashGenerator, PartitionState};
    use tokio::sync::{oneshot, Barrier};

    use super::*;

    /// Hash generator with fixed outputs for known keys.
    struct TableHash(HashMap<Vec<u8>, u32>);

    impl TableHash {
        fn new(entries: &[(&str, u32)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(k, h)| (k.as_bytes().to_vec(), *h))
                    .collect(),
            )
        }
    }

    impl HashGenerator for TableHash {
        fn hash(&self, key: &[u8]) -> u32 {
            self.0.get(key).copied().unwrap_or(0)
        }
    }

    #[derive(Debug)]
    struct Order {
        customer: String,
        seq: u32,
    }

    fn order(customer: &str, seq: u32) -> Order {
        Order {
            customer: customer.to_string(),
            seq,
        }
    }

    fn by_customer(order: &Order) -> Option<Vec<u8>> {
        Some(order.customer.as_bytes().to_vec())
    }

    #[test]
    fn construction_outside_runtime_is_rejected() {
        let result = Partitioner::new(2, Fnv1aHashGenerator);
        assert!(matches!(
            result,
            Err(PartitionError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn zero_partitions_is_invalid_configuration() {
        let result = Partitioner::new(0, Fnv1aHashGenerator);
        assert!(matches!(
            result,
            Err(PartitionError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn single_partition_routes_every_key_to_zero() {
        let partitioner = Partitioner::new(1, Fnv1aHashGenerator).unwrap();
        for key in ["a", "b", "customer-1", "\u{1f600}"] {
            assert_eq!(partitioner.partition_for(key.as_bytes()).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn selection_is_hash_mod_count() {
        let partitioner = Partitioner::new(4, TableHash::new(&[("A", 10), ("B", 11)])).unwrap();
        assert_eq!(partitioner.partition_for(b"A").unwrap(), 2);
        assert_eq!(partitioner.partition_for(b"B").unwrap(), 3);
    }

    #[tokio::test]
    async fn selection_is_deterministic() {
        let partitioner = Partitioner::new(7, Fnv1aHashGenerator).unwrap();
        for i in 0..100 {
            let key = format!("entity-{i}");
            let first = partitioner.partition_for(key.as_bytes()).unwrap();
            for _ in 0..3 {
                assert_eq!(partitioner.partition_for(key.as_bytes()).unwrap(), first);
            }
            assert!(first < 7);
        }
    }

    #[tokio::test]
    async fn empty_key_is_invalid() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        assert!(matches!(
            partitioner.partition_for(b""),
            Err(PartitionError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn typed_send_rejects_absent_and_empty_keys() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        let front = partitioner.typed(|name: &String| {
            if name == "none" {
                None
            } else {
                Some(name.as_bytes().to_vec())
            }
        });

        for bad in ["none", ""] {
            let result = front.send(bad.to_string(), |_| async { Ok::<_, anyhow::Error>(()) });
            assert!(matches!(result, Err(PartitionError::InvalidKey)));
        }

        // Rejected items never reach a lane.
        assert!(partitioner.probe().partitions.iter().all(|p| p.is_idle()
            && p.completed == 0
            && p.faulted == 0));

        let ok = front
            .send("x".to_string(), |_| async { Ok::<_, anyhow::Error>(()) })
            .unwrap();
        ok.await.unwrap();
    }

    #[tokio::test]
    async fn same_key_items_run_in_submission_order_on_one_lane() {
        let partitioner = Partitioner::new(4, TableHash::new(&[("A", 10), ("B", 11)])).unwrap();
        let front = partitioner.typed(by_customer);
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut completions = Vec::new();
        for (customer, seq) in [("A", 1), ("A", 2), ("B", 1)] {
            let log = Arc::clone(&log);
            let completion = front
                .send(order(customer, seq), move |o| async move {
                    log.lock().push((o.customer.clone(), o.seq));
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();
            completions.push(completion);
        }

        let lanes: Vec<u32> = completions.iter().map(Completion::partition).collect();
        assert_eq!(lanes, vec![2, 2, 3]);

        for completion in completions {
            completion.await.unwrap();
        }

        let log = log.lock();
        let a_items: Vec<u32> = log
            .iter()
            .filter(|(c, _)| c == "A")
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(a_items, vec![1, 2]);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn later_item_starts_after_earlier_finishes() {
        let partitioner = Partitioner::new(3, Fnv1aHashGenerator).unwrap();
        let front = partitioner.typed(by_customer);
        let active = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));

        let mut completions = Vec::new();
        for seq in 0..10 {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            completions.push(
                front
                    .send(order("same", seq), move |_| async move {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    })
                    .unwrap(),
            );
        }
        for completion in completions {
            completion.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn different_lanes_run_concurrently() {
        let partitioner = Partitioner::new(2, TableHash::new(&[("A", 0), ("B", 1)])).unwrap();
        let front = partitioner.typed(by_customer);
        // Both continuations must be running at once to pass the barrier.
        let barrier = Arc::new(Barrier::new(2));

        let completions: Vec<_> = ["A", "B"]
            .into_iter()
            .map(|customer| {
                let barrier = Arc::clone(&barrier);
                front
                    .send(order(customer, 0), move |_| async move {
                        barrier.wait().await;
                        Ok::<_, anyhow::Error>(())
                    })
                    .unwrap()
            })
            .collect();

        let all = join_all(completions);
        let results = tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("lanes were serialized against each other");
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn probe_of_fresh_partitioner() {
        let partitioner = Partitioner::new(3, Fnv1aHashGenerator).unwrap();
        let probe = partitioner.probe();

        assert_eq!(probe.id, partitioner.id());
        assert_eq!(probe.id.len(), 32);
        assert_eq!(probe.partition_count, 3);
        assert_eq!(probe.hash, "fnv1a");
        assert_eq!(probe.partitions.len(), 3);
        for (i, p) in probe.partitions.iter().enumerate() {
            assert_eq!(p.index as usize, i);
            assert!(p.is_idle());
            assert_eq!(p.state, PartitionState::Running);
        }
    }

    #[tokio::test]
    async fn partition_lookup_by_index() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        assert_eq!(partitioner.partition(1).map(Partition::index), Some(1));
        assert!(partitioner.partition(2).is_none());
    }

    #[tokio::test]
    async fn typed_front_forwards_probe() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        let front = partitioner.typed(by_customer);
        assert_eq!(front.probe(), partitioner.probe());
    }

    #[tokio::test]
    async fn distinct_partitioners_have_distinct_ids() {
        let a = Partitioner::new(1, Fnv1aHashGenerator).unwrap();
        let b = Partitioner::new(1, Fnv1aHashGenerator).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn from_config_uses_configured_hash() {
        let config = PartitionerConfig {
            partition_count: 5,
            hash_algorithm: keyroute_core::HashAlgorithm::Murmur3,
            ..PartitionerConfig::default()
        };
        let partitioner = Partitioner::from_config(&config).unwrap();
        assert_eq!(partitioner.partition_count(), 5);
        assert_eq!(partitioner.probe().hash, "murmur3");
        assert_eq!(
            partitioner.partition_for(b"hello").unwrap(),
            keyroute_core::murmur3_hash(b"hello", 0) % 5
        );
    }

    #[tokio::test]
    async fn shutdown_drains_every_lane() {
        let partitioner = Partitioner::new(4, Fnv1aHashGenerator).unwrap();
        let front = partitioner.typed(by_customer);
        let ran = Arc::new(AtomicU32::new(0));

        for i in 0..40 {
            let ran = Arc::clone(&ran);
            // Completions are dropped on purpose: shutdown alone must drain.
            drop(
                front
                    .send(order(&format!("c-{i}"), i), move |_| async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    })
                    .unwrap(),
            );
        }

        front.shutdown(CancellationToken::new()).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 40);
        assert!(partitioner
            .probe()
            .partitions
            .iter()
            .all(|p| p.state == PartitionState::Stopped));

        let late = front.send(order("late", 0), |_| async { Ok::<_, anyhow::Error>(()) });
        assert!(matches!(late, Err(PartitionError::PartitionClosed { .. })));
    }

    #[tokio::test]
    async fn cancelled_shutdown_reports_only_busy_lanes() {
        let partitioner = Partitioner::new(2, TableHash::new(&[("busy", 1), ("idle", 0)])).unwrap();
        let front = partitioner.typed(by_customer);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocked = front
            .send(order("busy", 0), move |_| async move {
                let _ = release_rx.await;
                Ok::<_, anyhow::Error>(())
            })
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = partitioner.shutdown(cancel).await.unwrap_err();
        match err {
            PartitionError::ShutdownAborted { partitions } => assert_eq!(partitions, vec![1]),
            other => panic!("expected ShutdownAborted, got {other:?}"),
        }

        release_tx.send(()).unwrap();
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_lanes_concurrently() {
        let partitioner = Partitioner::new(2, TableHash::new(&[("busy", 0)])).unwrap();
        let front = partitioner.typed(by_customer);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocked = front
            .send(order("busy", 0), move |_| async move {
                let _ = release_rx.await;
                Ok::<_, anyhow::Error>(())
            })
            .unwrap();

        let shutdown = tokio::spawn({
            let partitioner = partitioner.clone();
            async move { partitioner.shutdown(CancellationToken::new()).await }
        });

        // Lane 1 must stop while lane 0 is still held by its first item.
        let idle_lane = partitioner.partition(1).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while idle_lane.state() != PartitionState::Stopped {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("idle lane waited behind the busy one");
        assert_eq!(
            partitioner.partition(0).unwrap().state(),
            PartitionState::Draining
        );
        assert!(!shutdown.is_finished());

        release_tx.send(()).unwrap();
        blocked.await.unwrap();
        shutdown.await.unwrap().unwrap();
        assert_eq!(
            partitioner.partition(0).unwrap().state(),
            PartitionState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_timeout_aborts_stuck_lane() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        let front = partitioner.typed(by_customer);
        let (_hold, never) = oneshot::channel::<()>();

        let _stuck = front
            .send(order("stuck", 0), move |_| async move {
                let _ = never.await;
                Ok::<_, anyhow::Error>(())
            })
            .unwrap();

        let err = front
            .shutdown_timeout(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PartitionError::ShutdownAborted { ref partitions } if partitions.len() == 1));
    }

    #[tokio::test]
    async fn shutdown_timeout_succeeds_when_lanes_drain() {
        let partitioner = Partitioner::new(2, Fnv1aHashGenerator).unwrap();
        partitioner
            .shutdown_timeout(Duration::from_secs(5))
            .await
            .unwrap();
    }
}
