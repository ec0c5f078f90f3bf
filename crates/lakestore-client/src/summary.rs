//! Parallel directory aggregation for content summaries.
//!
//! A one-shot traversal: a fixed pool of workers drains a shared queue of
//! directories, enumerating each one page by page. Files found along the way
//! feed atomic counters; subdirectories go back on the queue. The traversal
//! is done exactly when the queue is empty and no worker is mid-directory,
//! which is what [`ProcessingQueue`] tracks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::trace;

use lakestore_core::error::Result;
use lakestore_core::models::{ContentSummary, DirectoryEntry, DirectoryEntryType};
use lakestore_core::protocol;
use lakestore_core::request::{RequestContext, RequestOptions};

const NUM_WORKERS: usize = 16;
const ENUMERATION_PAGE_SIZE: u32 = 16_000;

struct QueueInner<T> {
    queue: VecDeque<T>,
    /// Workers currently processing a popped item.
    processors: usize,
}

/// Work queue with a termination condition: `poll` hands out items, blocking
/// while the queue is empty, and returns `None` only once the queue is empty
/// *and* no worker is processing an item (a worker mid-directory may still
/// enqueue more). Workers signal completion of each item with `unregister`;
/// the worker that finishes the last item wakes everyone so they can exit.
pub(crate) struct ProcessingQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
}

impl<T> ProcessingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                processors: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn add(&self, item: T) {
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.queue.push_back(item);
        }
        self.notify.notify_waiters();
    }

    pub(crate) async fn poll(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(item) = inner.queue.pop_front() {
                    inner.processors += 1;
                    return Some(item);
                }
                if inner.processors == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub(crate) fn unregister(&self) {
        let done = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.processors = inner.processors.saturating_sub(1);
            inner.processors == 0 && inner.queue.is_empty()
        };
        if done {
            self.notify.notify_waiters();
        }
    }
}

/// One-shot aggregator; do not reuse across calls.
pub(crate) struct ContentSummaryProcessor {
    ctx: Arc<RequestContext>,
    queue: ProcessingQueue<DirectoryEntry>,
    file_count: AtomicU64,
    directory_count: AtomicU64,
    total_bytes: AtomicU64,
}

impl ContentSummaryProcessor {
    pub(crate) async fn run(ctx: Arc<RequestContext>, path: &str) -> Result<ContentSummary> {
        let mut opts = RequestOptions::new(ctx.make_exponential_policy());
        let root = protocol::get_file_status(&ctx, path, None, &mut opts).await?;

        let processor = Arc::new(Self {
            ctx,
            queue: ProcessingQueue::new(),
            file_count: AtomicU64::new(0),
            directory_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        });

        if root.entry_type == DirectoryEntryType::File {
            processor.tally_file(&root);
        } else {
            processor.directory_count.fetch_add(1, Ordering::Relaxed);
            processor.queue.add(root);

            let mut workers = Vec::with_capacity(NUM_WORKERS);
            for _ in 0..NUM_WORKERS {
                let processor = Arc::clone(&processor);
                workers.push(tokio::spawn(async move { processor.worker().await }));
            }
            let mut first_error = None;
            for worker in workers {
                match worker.await {
                    Ok(Err(err)) if first_error.is_none() => first_error = Some(err),
                    _ => {}
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let total = processor.total_bytes.load(Ordering::Relaxed);
        Ok(ContentSummary {
            length: total,
            file_count: processor.file_count.load(Ordering::Relaxed),
            directory_count: processor.directory_count.load(Ordering::Relaxed),
            // this store reports storage equal to the byte total
            space_consumed: total,
        })
    }

    async fn worker(&self) -> Result<()> {
        while let Some(entry) = self.queue.poll().await {
            let result = if entry.entry_type == DirectoryEntryType::Directory {
                self.enumerate_directory_tree(&entry.full_path).await
            } else {
                Ok(())
            };
            // unregister before propagating, so the other workers can reach
            // the termination condition and exit
            self.queue.unregister();
            result?;
        }
        Ok(())
    }

    /// Enumerates one directory sequentially, in pages, queueing any
    /// subdirectories. Parallelism is across directories, never within one.
    async fn enumerate_directory_tree(&self, path: &str) -> Result<()> {
        let mut start_after: Option<String> = None;
        loop {
            let mut opts = RequestOptions::new(self.ctx.make_exponential_policy())
                .with_timeout(self.ctx.default_timeout * 2);
            let page = protocol::list_status(
                &self.ctx,
                path,
                start_after.as_deref(),
                None,
                Some(ENUMERATION_PAGE_SIZE),
                None,
                &mut opts,
            )
            .await?;
            if page.entries.is_empty() {
                break;
            }
            let page_len = page.entries.len();
            for entry in page.entries {
                start_after = Some(entry.name.clone());
                match entry.entry_type {
                    DirectoryEntryType::Directory => {
                        self.directory_count.fetch_add(1, Ordering::Relaxed);
                        self.queue.add(entry);
                    }
                    DirectoryEntryType::File => self.tally_file(&entry),
                }
            }
            if page_len < ENUMERATION_PAGE_SIZE as usize {
                break;
            }
        }
        trace!(path, "directory enumerated");
        Ok(())
    }

    fn tally_file(&self, entry: &DirectoryEntry) {
        self.file_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(entry.length, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_poll_returns_item_and_tracks_processor() {
        let queue = ProcessingQueue::new();
        queue.add(1u32);
        assert_eq!(queue.poll().await, Some(1));
        // the item is out but still being processed: termination not reached
        queue.add(2);
        assert_eq!(queue.poll().await, Some(2));
        queue.unregister();
        queue.unregister();
        assert_eq!(queue.poll().await, None);
    }

    #[tokio::test]
    async fn test_empty_queue_with_no_processors_terminates() {
        let queue: ProcessingQueue<u32> = ProcessingQueue::new();
        assert_eq!(queue.poll().await, None);
    }

    #[tokio::test]
    async fn test_poll_blocks_until_processor_finishes() {
        let queue = Arc::new(ProcessingQueue::new());
        queue.add(1u32);
        assert_eq!(queue.poll().await, Some(1));

        // a second consumer must block: the first might still enqueue more
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.poll().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // the processor enqueues a child and finishes
        queue.add(2);
        queue.unregister();
        let got = waiter.await.unwrap();
        assert_eq!(got, Some(2));
        queue.unregister();
        assert_eq!(queue.poll().await, None);
    }

    #[tokio::test]
    async fn test_last_processor_wakes_all_waiters() {
        let queue: Arc<ProcessingQueue<u32>> = Arc::new(ProcessingQueue::new());
        queue.add(1);
        assert_eq!(queue.poll().await, Some(1));

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            waiters.push(tokio::spawn(async move { queue.poll().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.unregister(); // last processor, nothing queued: all exit

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_workers_drain_recursive_workload() {
        // simulate a traversal: each item below 8 enqueues two children
        let queue: Arc<ProcessingQueue<u64>> = Arc::new(ProcessingQueue::new());
        let seen = Arc::new(AtomicU64::new(0));
        queue.add(1);

        let mut workers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let seen = Arc::clone(&seen);
            workers.push(tokio::spawn(async move {
                while let Some(value) = queue.poll().await {
                    seen.fetch_add(1, Ordering::Relaxed);
                    if value < 8 {
                        queue.add(value * 2);
                        queue.add(value * 2 + 1);
                    }
                    queue.unregister();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        // complete binary tree with values 1..16
        assert_eq!(seen.load(Ordering::Relaxed), 15);
    }
}
