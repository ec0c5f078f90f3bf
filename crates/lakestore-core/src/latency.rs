//! Client-perceived latency reporting.
//!
//! Every finished attempt records a compact line into a process-wide bounded
//! queue. The next outgoing request drains up to three of the oldest lines
//! into the `x-ms-adl-client-latency` header. This is opportunistic
//! telemetry: writes never block (overflow is silently dropped) and ordering
//! between reader and writer is best-effort.
//!
//! Line schema, comma-separated:
//! `client_request_id.retry,latency_ms,error,operation,bytes,client_instance_id`
//! (the error field is empty on success). Lines on a single header are
//! joined with semicolons.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;
use once_cell::sync::OnceCell;

/// Request header the drained entries ride on.
pub const CLIENT_LATENCY_HEADER: &str = "x-ms-adl-client-latency";

const CAPACITY: usize = 256;
const MAX_PER_HEADER: usize = 3;

static GLOBAL: OnceCell<LatencyTracker> = OnceCell::new();

pub struct LatencyTracker {
    queue: ArrayQueue<String>,
    disabled: AtomicBool,
}

impl LatencyTracker {
    fn new() -> Self {
        Self {
            queue: ArrayQueue::new(CAPACITY),
            disabled: AtomicBool::new(false),
        }
    }

    /// Startup hook. Constructs the process-wide tracker; calling it again
    /// is a no-op.
    pub fn init() -> &'static LatencyTracker {
        GLOBAL.get_or_init(LatencyTracker::new)
    }

    /// The process-wide tracker.
    pub fn global() -> &'static LatencyTracker {
        Self::init()
    }

    /// Permanently disables reporting and purges queued entries. One-way.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
        while self.queue.pop().is_some() {}
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn record_success(
        &self,
        client_request_id: &str,
        retry: u32,
        latency_ms: u64,
        operation: &str,
        bytes: u64,
        client_instance_id: u64,
    ) {
        self.record(client_request_id, retry, latency_ms, "", operation, bytes, client_instance_id);
    }

    pub fn record_error(
        &self,
        client_request_id: &str,
        retry: u32,
        latency_ms: u64,
        error: &str,
        operation: &str,
        bytes: u64,
        client_instance_id: u64,
    ) {
        self.record(client_request_id, retry, latency_ms, error, operation, bytes, client_instance_id);
    }

    fn record(
        &self,
        client_request_id: &str,
        retry: u32,
        latency_ms: u64,
        error: &str,
        operation: &str,
        bytes: u64,
        client_instance_id: u64,
    ) {
        if self.is_disabled() {
            return;
        }
        let line = format!(
            "{client_request_id}.{retry},{latency_ms},{error},{operation},{bytes},{client_instance_id}"
        );
        // full queue: drop the new entry
        let _ = self.queue.push(line);
    }

    /// Drains up to three entries into a header value. Returns `None` when
    /// nothing is queued or reporting is disabled.
    pub fn drain(&self) -> Option<String> {
        if self.is_disabled() {
            return None;
        }
        let mut out = String::new();
        for _ in 0..MAX_PER_HEADER {
            match self.queue.pop() {
                Some(entry) => {
                    if !out.is_empty() {
                        out.push(';');
                    }
                    out.push_str(&entry);
                }
                None => break,
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
