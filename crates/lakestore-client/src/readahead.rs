//! Shared read-ahead machinery.
//!
//! A process-wide manager owns a fixed pool of 16 reusable 4 MiB slabs, a
//! free stack, and three disjoint record lists: `queue` (waiting for a
//! worker), `in_progress` (a worker is reading), and `completed` (data
//! available). Eight long-lived worker tasks drain the queue. One mutex
//! covers the free stack and all three lists; waiting for a specific buffer
//! happens on a per-record one-shot latch so the global lock is never held
//! across an await.
//!
//! A slab travels with its record: free stack, then the queued record, then
//! the worker (moved out for the duration of the remote read), then the
//! completed record, and back to the free stack on eviction. Completed
//! buffers double as a small cache until their space is needed; eviction
//! prefers fully-consumed buffers, then partially-consumed ones, then
//! anything older than three seconds.
//!
//! Records hold their stream through a weak reference, so a closed stream
//! never keeps a slab alive: the worker completes the read, nothing ever
//! asks for the data, and eviction reclaims the slab.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::sync::Notify;
use tracing::trace;

use lakestore_core::Result;

/// Number of slabs in the process-wide pool.
pub const NUM_BUFFERS: usize = 16;
/// Slab size; also the unit of read-ahead.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;
/// Worker tasks servicing the queue.
pub const NUM_WORKERS: usize = 8;

/// Unconsumed completed buffers younger than this are not evicted.
const EVICTION_AGE: Duration = Duration::from_secs(3);

/// One-shot completion signal. `wait` returns immediately once `release`
/// has been called, no matter the ordering.
pub(crate) struct CompletionLatch {
    done: AtomicBool,
    notify: Notify,
}

impl CompletionLatch {
    pub(crate) fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register before checking, so a release between the check and the
        // await cannot be missed
        notified.as_mut().enable();
        if self.done.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    pub(crate) fn release(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// The read half of a stream, as seen by the prefetcher's workers.
#[async_trait]
pub trait RemoteReader: Send + Sync {
    /// Unique id of the owning stream, used to match records to streams.
    fn source_id(&self) -> u64;

    /// Reads up to `length` bytes at `position` into `dst`, returning the
    /// byte count. Speculative reads use the no-retry policy and report a
    /// server that rejects them by returning 0.
    async fn read_remote(
        &self,
        position: u64,
        dst: &mut [u8],
        length: usize,
        speculative: bool,
    ) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadBufferStatus {
    /// Sitting in the queue, untouched.
    NotAvailable,
    /// A worker is reading into it.
    Reading,
    /// Data available; record is in the completed list.
    Available,
    /// The read finished but failed.
    Failed,
}

struct ReadBuffer {
    id: u64,
    source: Weak<dyn RemoteReader>,
    source_id: u64,
    offset: u64,
    requested_length: usize,
    /// Filled length; set when the read completes.
    length: usize,
    status: ReadBufferStatus,
    /// The slab. Absent only while a worker holds it.
    data: Option<Vec<u8>>,
    latch: Arc<CompletionLatch>,
    birthday: Option<Instant>,
    first_byte_consumed: bool,
    last_byte_consumed: bool,
    any_byte_consumed: bool,
}

struct WorkItem {
    id: u64,
    source: Weak<dyn RemoteReader>,
    offset: u64,
    requested_length: usize,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    free: Vec<Vec<u8>>,
    queue: VecDeque<ReadBuffer>,
    in_progress: Vec<ReadBuffer>,
    completed: Vec<ReadBuffer>,
}

/// Snapshot of pool occupancy. The four counts always sum to the pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAheadStats {
    pub free: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
}

static GLOBAL: OnceCell<Arc<ReadBufferManager>> = OnceCell::new();

/// The shared prefetcher.
pub struct ReadBufferManager {
    inner: Mutex<Inner>,
    work_available: Notify,
    next_record_id: AtomicU64,
    block_size: usize,
}

impl ReadBufferManager {
    /// The process-wide manager, with the contract defaults. Workers are
    /// spawned on first use; call from within a tokio runtime.
    pub fn global() -> &'static Arc<ReadBufferManager> {
        GLOBAL.get_or_init(|| {
            let manager = Arc::new(ReadBufferManager::with_config(NUM_BUFFERS, BLOCK_SIZE));
            manager.start_workers(NUM_WORKERS);
            manager
        })
    }

    /// A dedicated manager with explicit pool dimensions. The global
    /// instance uses the contract defaults; tests size their own.
    pub fn with_config(num_buffers: usize, block_size: usize) -> Self {
        let mut inner = Inner::default();
        for _ in 0..num_buffers {
            inner.free.push(vec![0u8; block_size]);
        }
        Self {
            inner: Mutex::new(inner),
            work_available: Notify::new(),
            next_record_id: AtomicU64::new(0),
            block_size,
        }
    }

    /// Spawns the worker pool. Workers are gated on a single startup latch
    /// released here, after construction is complete.
    pub fn start_workers(self: &Arc<Self>, count: usize) {
        let unleash = Arc::new(CompletionLatch::new());
        for worker in 0..count {
            let manager = Arc::clone(self);
            let gate = Arc::clone(&unleash);
            tokio::spawn(async move {
                gate.wait().await;
                trace!(worker, "read-ahead worker started");
                loop {
                    let item = manager.next_work_item().await;
                    manager.run_item(item).await;
                }
            });
        }
        unleash.release();
    }

    /// Queues a read-ahead for `(source, offset)`. Does nothing when an
    /// overlapping record already exists in any list, or when no slab is
    /// free and nothing can be evicted.
    pub fn queue_readahead(&self, source: &Arc<dyn RemoteReader>, offset: u64, length: usize) {
        let source_id = source.source_id();
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if Self::overlaps_any(&inner, source_id, offset) {
                return;
            }
            let data = match inner.free.pop() {
                Some(data) => data,
                None => match Self::try_evict(&mut inner) {
                    Some(data) => data,
                    None => return, // no space; skip the read-ahead
                },
            };
            let record = ReadBuffer {
                id: self.next_record_id.fetch_add(1, Ordering::Relaxed),
                source: Arc::downgrade(source),
                source_id,
                offset,
                requested_length: length.min(self.block_size),
                length: 0,
                status: ReadBufferStatus::NotAvailable,
                data: Some(data),
                latch: Arc::new(CompletionLatch::new()),
                birthday: None,
                first_byte_consumed: false,
                last_byte_consumed: false,
                any_byte_consumed: false,
            };
            trace!(source_id, offset, length, "queued read-ahead");
            inner.queue.push_back(record);
        }
        self.work_available.notify_waiters();
    }

    /// Serves `position` from the cache if possible, returning the bytes
    /// copied into `dst`, or 0 on a miss.
    ///
    /// A matching record still sitting in the queue is cancelled instead:
    /// the caller's own read will be faster than waiting for a worker. A
    /// matching in-progress record is awaited on its latch.
    pub async fn get_block(&self, source_id: u64, position: u64, dst: &mut [u8]) -> usize {
        let waiting_on = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            self.cancel_queued(&mut inner, source_id, position);
            Self::find_overlap(inner.in_progress.iter(), source_id, position)
                .map(|record| Arc::clone(&record.latch))
        };

        if let Some(latch) = waiting_on {
            latch.wait().await;
        }

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = inner.completed.iter_mut().find(|record| {
            record.source_id == source_id
                && position >= record.offset
                && position < record.offset + record.length as u64
        });
        let Some(record) = record else { return 0 };
        let Some(data) = record.data.as_ref() else { return 0 };

        let cursor = (position - record.offset) as usize;
        let to_copy = dst.len().min(record.length - cursor);
        dst[..to_copy].copy_from_slice(&data[cursor..cursor + to_copy]);
        if cursor == 0 {
            record.first_byte_consumed = true;
        }
        if cursor + to_copy == record.length {
            record.last_byte_consumed = true;
        }
        record.any_byte_consumed = true;
        trace!(source_id, position, to_copy, "read-ahead cache hit");
        to_copy
    }

    pub fn stats(&self) -> ReadAheadStats {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ReadAheadStats {
            free: inner.free.len(),
            queued: inner.queue.len(),
            in_progress: inner.in_progress.len(),
            completed: inner.completed.len(),
        }
    }

    /// Blocks until a queued record is available, moves it to in-progress,
    /// and hands its slab to the calling worker.
    async fn next_work_item(&self) -> WorkItem {
        loop {
            let notified = self.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(mut record) = inner.queue.pop_front() {
                    record.status = ReadBufferStatus::Reading;
                    let data = record.data.take().unwrap_or_default();
                    let item = WorkItem {
                        id: record.id,
                        source: record.source.clone(),
                        offset: record.offset,
                        requested_length: record.requested_length,
                        data,
                    };
                    inner.in_progress.push(record);
                    return item;
                }
            }
            notified.await;
        }
    }

    async fn run_item(&self, mut item: WorkItem) {
        let requested = item.requested_length.min(item.data.len());
        let outcome = match item.source.upgrade() {
            Some(source) => {
                source
                    .read_remote(item.offset, &mut item.data, requested, true)
                    .await
            }
            // owning stream is gone; complete as a no-op so the slab recycles
            None => Ok(0),
        };
        match outcome {
            Ok(bytes) => self.done_reading(item.id, ReadBufferStatus::Available, bytes, item.data),
            Err(err) => {
                trace!(offset = item.offset, %err, "read-ahead failed");
                self.done_reading(item.id, ReadBufferStatus::Failed, 0, item.data);
            }
        }
    }

    /// Posts a worker's result. Moves the record to completed when data
    /// arrived, otherwise recycles the slab. The latch is released outside
    /// the lock so woken waiters see published results without contending.
    fn done_reading(&self, record_id: u64, result: ReadBufferStatus, bytes: usize, data: Vec<u8>) {
        let latch = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let Some(index) = inner.in_progress.iter().position(|r| r.id == record_id) else {
                inner.free.push(data);
                return;
            };
            let mut record = inner.in_progress.remove(index);
            let latch = Arc::clone(&record.latch);
            if result == ReadBufferStatus::Available && bytes > 0 {
                record.status = ReadBufferStatus::Available;
                record.length = bytes;
                record.birthday = Some(Instant::now());
                record.data = Some(data);
                inner.completed.push(record);
            } else {
                record.status = ReadBufferStatus::Failed;
                inner.free.push(data);
            }
            latch
        };
        latch.release();
    }

    fn cancel_queued(&self, inner: &mut Inner, source_id: u64, position: u64) {
        let index = inner
            .queue
            .iter()
            .position(|record| Self::record_overlaps(record, source_id, position));
        if let Some(index) = index {
            if let Some(record) = inner.queue.remove(index) {
                trace!(source_id, position, "cancelled queued read-ahead");
                if let Some(data) = record.data {
                    inner.free.push(data);
                }
            }
        }
    }

    /// The overlap test deliberately accepts a record whose requested range
    /// covers the offset even while it is still being read; this doubles as
    /// the "already queued" check without distinguishing partial overlap
    /// from exact match.
    fn record_overlaps(record: &ReadBuffer, source_id: u64, offset: u64) -> bool {
        if record.source_id != source_id {
            return false;
        }
        if record.status == ReadBufferStatus::Available {
            offset >= record.offset && offset < record.offset + record.length as u64
        } else {
            offset >= record.offset && offset < record.offset + record.requested_length as u64
        }
    }

    fn find_overlap<'a>(
        records: impl Iterator<Item = &'a ReadBuffer>,
        source_id: u64,
        offset: u64,
    ) -> Option<&'a ReadBuffer> {
        records.into_iter().find(|record| Self::record_overlaps(record, source_id, offset))
    }

    fn overlaps_any(inner: &Inner, source_id: u64, offset: u64) -> bool {
        Self::find_overlap(inner.queue.iter(), source_id, offset).is_some()
            || Self::find_overlap(inner.in_progress.iter(), source_id, offset).is_some()
            || Self::find_overlap(inner.completed.iter(), source_id, offset).is_some()
    }

    /// Reclaims one completed buffer, in preference order: fully consumed,
    /// then any-byte consumed, then the oldest one provided it has been
    /// sitting for longer than the age threshold.
    fn try_evict(inner: &mut Inner) -> Option<Vec<u8>> {
        let index = inner
            .completed
            .iter()
            .position(|r| r.first_byte_consumed && r.last_byte_consumed)
            .or_else(|| inner.completed.iter().position(|r| r.any_byte_consumed))
            .or_else(|| {
                let oldest = inner
                    .completed
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, r)| r.birthday)?;
                let age = oldest.1.birthday.map(|b| b.elapsed())?;
                (age > EVICTION_AGE).then_some(oldest.0)
            })?;
        let record = inner.completed.remove(index);
        trace!(
            source_id = record.source_id,
            offset = record.offset,
            "evicted completed read-ahead buffer"
        );
        record.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Serves a deterministic byte pattern, optionally failing or stalling.
    struct PatternReader {
        id: u64,
        file_length: u64,
        fail: bool,
        delay: Option<Duration>,
    }

    impl PatternReader {
        fn new(id: u64, file_length: u64) -> Arc<dyn RemoteReader> {
            Arc::new(Self {
                id,
                file_length,
                fail: false,
                delay: None,
            })
        }
    }

    fn pattern_byte(position: u64) -> u8 {
        (position % 251) as u8
    }

    #[async_trait]
    impl RemoteReader for PatternReader {
        fn source_id(&self) -> u64 {
            self.id
        }

        async fn read_remote(
            &self,
            position: u64,
            dst: &mut [u8],
            length: usize,
            _speculative: bool,
        ) -> Result<usize> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(lakestore_core::StoreError::InvalidInput("boom".to_string()));
            }
            if position >= self.file_length {
                return Ok(0);
            }
            let n = length
                .min(dst.len())
                .min((self.file_length - position) as usize);
            for (i, byte) in dst[..n].iter_mut().enumerate() {
                *byte = pattern_byte(position + i as u64);
            }
            Ok(n)
        }
    }

    fn pool_total(stats: ReadAheadStats) -> usize {
        stats.free + stats.queued + stats.in_progress + stats.completed
    }

    async fn drain_until_idle(manager: &Arc<ReadBufferManager>) {
        for _ in 0..200 {
            let stats = manager.stats();
            if stats.queued == 0 && stats.in_progress == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("manager did not go idle");
    }

    #[tokio::test]
    async fn test_readahead_completes_and_serves_hit() {
        let manager = Arc::new(ReadBufferManager::with_config(4, 1024));
        manager.start_workers(2);
        let reader = PatternReader::new(1, 4096);

        manager.queue_readahead(&reader, 0, 1024);
        drain_until_idle(&manager).await;

        let mut dst = vec![0u8; 100];
        let n = manager.get_block(1, 0, &mut dst).await;
        assert_eq!(n, 100);
        assert!(dst.iter().enumerate().all(|(i, &b)| b == pattern_byte(i as u64)));
        assert_eq!(pool_total(manager.stats()), 4);
    }

    #[tokio::test]
    async fn test_miss_returns_zero() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        manager.start_workers(1);
        let mut dst = vec![0u8; 10];
        assert_eq!(manager.get_block(42, 0, &mut dst).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_queue_is_ignored() {
        let manager = Arc::new(ReadBufferManager::with_config(4, 256));
        // no workers: records stay queued
        let reader = PatternReader::new(1, 4096);
        manager.queue_readahead(&reader, 0, 256);
        manager.queue_readahead(&reader, 0, 256);
        manager.queue_readahead(&reader, 100, 256); // overlaps requested range
        let stats = manager.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.free, 3);
    }

    #[tokio::test]
    async fn test_queued_record_cancelled_by_get_block() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        // no workers: the record cannot start, so get_block must reclaim it
        let reader = PatternReader::new(7, 4096);
        manager.queue_readahead(&reader, 0, 256);
        assert_eq!(manager.stats().queued, 1);

        let mut dst = vec![0u8; 16];
        let n = manager.get_block(7, 0, &mut dst).await;
        assert_eq!(n, 0);
        let stats = manager.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.free, 2);
    }

    #[tokio::test]
    async fn test_failed_read_recycles_slab() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        manager.start_workers(1);
        let reader: Arc<dyn RemoteReader> = Arc::new(PatternReader {
            id: 3,
            file_length: 4096,
            fail: true,
            delay: None,
        });
        manager.queue_readahead(&reader, 0, 256);
        drain_until_idle(&manager).await;

        let stats = manager.stats();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.free, 2);
    }

    #[tokio::test]
    async fn test_get_block_waits_for_in_progress_read() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        manager.start_workers(1);
        let reader: Arc<dyn RemoteReader> = Arc::new(PatternReader {
            id: 9,
            file_length: 4096,
            fail: false,
            delay: Some(Duration::from_millis(50)),
        });
        manager.queue_readahead(&reader, 0, 256);
        // give the worker a moment to pick it up
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut dst = vec![0u8; 32];
        let n = manager.get_block(9, 0, &mut dst).await;
        assert_eq!(n, 32);
        assert_eq!(dst[0], pattern_byte(0));
    }

    #[tokio::test]
    async fn test_consumed_buffers_evicted_first() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        manager.start_workers(1);
        let reader = PatternReader::new(5, 10_000);

        manager.queue_readahead(&reader, 0, 256);
        manager.queue_readahead(&reader, 256, 256);
        drain_until_idle(&manager).await;
        assert_eq!(manager.stats().completed, 2);

        // consume the first buffer fully: first and last byte flags set
        let mut dst = vec![0u8; 256];
        assert_eq!(manager.get_block(5, 0, &mut dst).await, 256);

        // pool exhausted; queueing evicts the consumed buffer
        manager.queue_readahead(&reader, 512, 256);
        drain_until_idle(&manager).await;
        let stats = manager.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(pool_total(stats), 2);

        // offset 0 was evicted; 256 survives
        let mut probe = vec![0u8; 1];
        assert_eq!(manager.get_block(5, 0, &mut probe).await, 0);
        assert_eq!(manager.get_block(5, 256, &mut probe).await, 1);
    }

    #[tokio::test]
    async fn test_unconsumed_fresh_buffers_not_evicted() {
        let manager = Arc::new(ReadBufferManager::with_config(1, 256));
        manager.start_workers(1);
        let reader = PatternReader::new(6, 10_000);

        manager.queue_readahead(&reader, 0, 256);
        drain_until_idle(&manager).await;
        assert_eq!(manager.stats().completed, 1);

        // nothing consumed and the buffer is fresh: the new request is dropped
        manager.queue_readahead(&reader, 256, 256);
        let stats = manager.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_closed_stream_read_recycles() {
        let manager = Arc::new(ReadBufferManager::with_config(2, 256));
        {
            let reader = PatternReader::new(8, 4096);
            manager.queue_readahead(&reader, 0, 256);
            // reader dropped here, before any worker exists
        }
        manager.start_workers(1);
        drain_until_idle(&manager).await;
        let stats = manager.stats();
        assert_eq!(stats.free, 2);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_completion_latch_release_before_wait() {
        let latch = CompletionLatch::new();
        latch.release();
        latch.wait().await; // must not hang
    }

    #[tokio::test]
    async fn test_pool_invariant_under_load() {
        let manager = Arc::new(ReadBufferManager::with_config(4, 128));
        manager.start_workers(2);
        let reader = PatternReader::new(11, 1 << 20);
        for round in 0..20u64 {
            manager.queue_readahead(&reader, round * 128, 128);
            assert_eq!(pool_total(manager.stats()), 4);
        }
        drain_until_idle(&manager).await;
        assert_eq!(pool_total(manager.stats()), 4);
    }
}
