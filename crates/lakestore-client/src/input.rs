//! Buffered file reader.
//!
//! One stream per open file, used by exactly one caller. The stream reads
//! from the server in bulk (default 4 MiB) and satisfies reads from its
//! buffer. The file length is a snapshot taken at open time; appends by
//! other writers are not reflected.
//!
//! Sequential reads queue look-ahead requests with the shared
//! [`ReadBufferManager`](crate::readahead::ReadBufferManager); positioned
//! reads always go to the server and never disturb the sequential cursors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use lakestore_core::error::{RemoteCallError, Result, StoreError};
use lakestore_core::models::{DirectoryEntry, DirectoryEntryType};
use lakestore_core::protocol;
use lakestore_core::request::{RequestContext, RequestOptions};
use lakestore_core::retry::NoRetryPolicy;

use crate::readahead::{ReadBufferManager, RemoteReader, BLOCK_SIZE};

/// Look-ahead requests queued per fill when the client expresses no
/// preference.
const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Short-read retry bound when slurping a whole small file.
const MAX_SLURP_ATTEMPTS: u32 = 10;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn closed_stream(call: &str) -> StoreError {
    StoreError::InvalidInput(format!("attempting to call {call} on a closed stream"))
}

/// The remote-read half of an input stream, shared with the prefetcher.
///
/// The prefetcher holds this only weakly, so dropping the stream releases
/// the file even while read-aheads are in flight.
pub(crate) struct StreamSource {
    id: u64,
    path: String,
    session_id: String,
    file_length: u64,
    ctx: Arc<RequestContext>,
    /// Client-wide kill switch, flipped when the server rejects
    /// speculative reads.
    read_aheads_disabled: Arc<AtomicBool>,
}

impl StreamSource {
    fn transport_failure(&self, detail: String) -> StoreError {
        StoreError::Remote(Box::new(RemoteCallError {
            operation: "OPEN",
            path: self.path.clone(),
            http_status: 0,
            http_message: None,
            server_request_id: None,
            remote_exception: None,
            transport_error: Some(detail),
            num_retries: 0,
            last_call_latency_ms: 0,
            response_content_length: 0,
            exception_history: None,
        }))
    }
}

#[async_trait]
impl RemoteReader for StreamSource {
    fn source_id(&self) -> u64 {
        self.id
    }

    async fn read_remote(
        &self,
        position: u64,
        dst: &mut [u8],
        length: usize,
        speculative: bool,
    ) -> Result<usize> {
        if position >= self.file_length {
            return Ok(0); // at or past end of file
        }
        let want = length.min(dst.len());
        if want == 0 {
            return Ok(0);
        }

        let mut opts = if speculative {
            RequestOptions::new(NoRetryPolicy::new())
        } else {
            RequestOptions::new(self.ctx.make_exponential_policy())
        };
        let result = protocol::open(
            &self.ctx,
            &self.path,
            position,
            want as u64,
            Some(&self.session_id),
            speculative,
            &mut opts,
        )
        .await;

        let response = match result {
            Ok(response) => response,
            Err(StoreError::Remote(err))
                if speculative
                    && err.http_status == 400
                    && err.remote_exception_name() == Some("SpeculativeReadNotSupported") =>
            {
                debug!(path = %self.path, "server rejects speculative reads; disabling read-ahead for this client");
                self.read_aheads_disabled.store(true, Ordering::SeqCst);
                return Ok(0);
            }
            Err(err) => return Err(err),
        };

        if response.content_length == 0 && !response.chunked {
            return Ok(0); // got nothing
        }
        let mut body = response
            .body_stream
            .ok_or_else(|| self.transport_failure("open returned no body stream".to_string()))?;

        let mut total = 0usize;
        loop {
            match body.chunk().await {
                Ok(Some(chunk)) => {
                    if total < want {
                        let n = (want - total).min(chunk.len());
                        dst[total..total + n].copy_from_slice(&chunk[..n]);
                        total += n;
                    }
                    // any excess is drained and discarded so the connection
                    // can be reused
                }
                Ok(None) => break,
                Err(err) => {
                    return Err(self
                        .transport_failure(format!("error reading response stream: {err}")))
                }
            }
        }
        trace!(path = %self.path, position, total, "remote read");
        Ok(total)
    }
}

/// Buffered reader over one file. Not thread-safe; single caller only.
pub struct FileInputStream {
    source: Arc<StreamSource>,
    /// Snapshot of the entry at open time.
    entry: DirectoryEntry,
    block_size: usize,
    buffer: Option<Vec<u8>>,
    read_ahead_queue_depth: usize,
    /// File offset of the next server fetch.
    file_cursor: u64,
    /// Index of the next byte to deliver from the buffer.
    buffer_cursor: usize,
    /// End of valid bytes in the buffer.
    limit: usize,
    closed: bool,
}

impl FileInputStream {
    pub(crate) fn new(
        path: String,
        entry: DirectoryEntry,
        ctx: Arc<RequestContext>,
        queue_depth: Option<usize>,
        read_aheads_disabled: Arc<AtomicBool>,
    ) -> Self {
        debug_assert_eq!(entry.entry_type, DirectoryEntryType::File);
        let source = Arc::new(StreamSource {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            path,
            session_id: Uuid::new_v4().to_string(),
            file_length: entry.length,
            ctx,
            read_aheads_disabled,
        });
        Self {
            source,
            entry,
            block_size: BLOCK_SIZE,
            buffer: None,
            read_ahead_queue_depth: queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            file_cursor: 0,
            buffer_cursor: 0,
            limit: 0,
            closed: false,
        }
    }

    /// Reads into `dst`, filling the internal buffer from the server when it
    /// is empty. Returns the bytes copied; 0 means end of file (or an empty
    /// `dst`).
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(closed_stream("read()"));
        }
        if dst.is_empty() {
            return Ok(0);
        }
        if self.buffer_cursor == self.limit && !self.fill().await? {
            return Ok(0); // end of file
        }
        let available = self.limit - self.buffer_cursor;
        let to_copy = dst.len().min(available);
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(0);
        };
        dst[..to_copy].copy_from_slice(&buffer[self.buffer_cursor..self.buffer_cursor + to_copy]);
        self.buffer_cursor += to_copy;
        Ok(to_copy)
    }

    /// Reads one byte; `None` at end of file.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(match self.read(&mut byte).await? {
            0 => None,
            _ => Some(byte[0]),
        })
    }

    /// Positioned read: fetches up to `dst.len()` bytes at `position`
    /// without touching the stream's cursors or buffer. Always goes to the
    /// server (or the shared read-ahead cache); returns 0 at or past end of
    /// file.
    pub async fn read_at(&mut self, position: u64, dst: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(closed_stream("read_at()"));
        }
        let length = dst.len();
        self.source.read_remote(position, dst, length, false).await
    }

    /// Fills the buffer from the current file cursor. Returns false at end
    /// of file.
    async fn fill(&mut self) -> Result<bool> {
        if self.buffer_cursor < self.limit {
            return Ok(true); // unread data still buffered
        }
        if self.file_cursor >= self.entry.length {
            return Ok(false);
        }
        if self.entry.length <= self.block_size as u64 {
            self.slurp_full_file().await?;
            return Ok(self.buffer_cursor < self.limit);
        }

        self.buffer_cursor = 0;
        self.limit = 0;
        let mut buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => vec![0u8; self.block_size],
        };
        let block_size = self.block_size;
        let n = self
            .read_internal(self.file_cursor, &mut buffer[..], block_size, false)
            .await?;
        self.buffer = Some(buffer);
        self.limit += n;
        self.file_cursor += n as u64;
        Ok(n > 0)
    }

    /// Reads the whole file into the buffer in one or more attempts. Used
    /// when the file fits in a single block.
    async fn slurp_full_file(&mut self) -> Result<()> {
        let file_length = self.entry.length as usize;
        let mut buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => {
                self.block_size = file_length;
                vec![0u8; file_length]
            }
        };
        // keep the logical position; the caller may have seeked before the
        // first read
        self.buffer_cursor = self.position() as usize;
        self.limit = 0;
        self.file_cursor = 0;

        let mut attempts = 0u32;
        while self.file_cursor < self.entry.length {
            let limit = self.limit;
            let want = buffer.len() - limit;
            let n = self
                .read_internal(self.file_cursor, &mut buffer[limit..], want, true)
                .await?;
            self.limit += n;
            self.file_cursor += n as u64;
            attempts += 1;
            if attempts >= MAX_SLURP_ATTEMPTS {
                self.buffer = Some(buffer);
                return Err(self.source.transport_failure(format!(
                    "too many attempts reading whole file {}",
                    self.source.path
                )));
            }
        }
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Reads with look-ahead: queues block-aligned prefetches from
    /// `position`, polls the shared cache, and falls back to its own
    /// synchronous read on a miss.
    async fn read_internal(
        &self,
        position: u64,
        dst: &mut [u8],
        length: usize,
        bypass_readahead: bool,
    ) -> Result<usize> {
        let prefetch_enabled = self.read_ahead_queue_depth > 0
            && !self.source.read_aheads_disabled.load(Ordering::SeqCst);
        if bypass_readahead || !prefetch_enabled {
            return self.source.read_remote(position, dst, length, false).await;
        }

        let manager = ReadBufferManager::global();
        let reader: Arc<dyn RemoteReader> = self.source.clone();
        let mut remaining = self.read_ahead_queue_depth;
        let mut next_offset = position;
        while remaining > 0 && next_offset < self.entry.length {
            let next_size = (self.block_size as u64).min(self.entry.length - next_offset);
            manager.queue_readahead(&reader, next_offset, next_size as usize);
            next_offset += next_size;
            remaining -= 1;
        }

        let want = length.min(dst.len());
        let received = manager
            .get_block(self.source.id, position, &mut dst[..want])
            .await;
        if received > 0 {
            return Ok(received);
        }
        // cache miss; do our own read
        self.source.read_remote(position, dst, length, false).await
    }

    /// Seeks to `position`. Positions inside the valid buffer window only
    /// move the buffer cursor; anything else invalidates the buffer.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if self.closed {
            return Err(closed_stream("seek()"));
        }
        if position > self.entry.length {
            return Err(StoreError::InvalidInput(format!(
                "cannot seek past end of file (length {}, requested {position})",
                self.entry.length
            )));
        }
        let window_start = self.file_cursor - self.limit as u64;
        if position >= window_start && position <= self.file_cursor {
            self.buffer_cursor = (position - window_start) as usize;
            return Ok(());
        }
        self.file_cursor = position;
        self.limit = 0;
        self.buffer_cursor = 0;
        Ok(())
    }

    /// Skips forward (or backward) by `n`, clamped to the file bounds.
    /// Returns the distance actually moved.
    pub fn skip(&mut self, n: i64) -> Result<i64> {
        if self.closed {
            return Err(closed_stream("skip()"));
        }
        let current = self.position() as i64;
        let target = (current + n).clamp(0, self.entry.length as i64);
        self.seek(target as u64)?;
        Ok(target - current)
    }

    /// Bytes deliverable without another server call.
    pub fn available(&self) -> Result<usize> {
        if self.closed {
            return Err(closed_stream("available()"));
        }
        Ok(self.limit - self.buffer_cursor)
    }

    /// Length of the file as of open time.
    pub fn length(&self) -> u64 {
        self.entry.length
    }

    /// Current logical position in the file.
    pub fn position(&self) -> u64 {
        self.file_cursor - self.limit as u64 + self.buffer_cursor as u64
    }

    /// Discards the buffer without changing the logical position.
    pub fn unbuffer(&mut self) {
        self.file_cursor = self.position();
        self.limit = 0;
        self.buffer_cursor = 0;
    }

    /// Resizes the internal buffer, discarding buffered data.
    pub fn set_buffer_size(&mut self, new_size: usize) -> Result<()> {
        if new_size == 0 {
            return Err(StoreError::InvalidInput(
                "buffer size cannot be zero".to_string(),
            ));
        }
        if new_size == self.block_size {
            return Ok(());
        }
        self.unbuffer();
        self.block_size = new_size;
        self.buffer = None;
        Ok(())
    }

    /// Look-ahead depth for this stream; 0 disables read-ahead.
    pub fn set_read_ahead_queue_depth(&mut self, depth: usize) {
        self.read_ahead_queue_depth = depth;
    }

    pub fn path(&self) -> &str {
        &self.source.path
    }

    /// Closes the stream. Further calls fail; buffered data is released.
    pub fn close(&mut self) {
        self.closed = true;
        self.buffer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lakestore_auth::{AccessTokenProvider, StaticTokenSource};

    fn test_entry(length: u64) -> DirectoryEntry {
        DirectoryEntry {
            name: "f".to_string(),
            full_path: "/f".to_string(),
            length,
            entry_type: DirectoryEntryType::File,
            owner: String::new(),
            group: String::new(),
            last_access_time: Utc::now(),
            last_modified_time: Utc::now(),
            permission: "644".to_string(),
            block_size: 268_435_456,
            replication_factor: 1,
            acl_bit: false,
            expiry_time: None,
        }
    }

    fn test_stream(length: u64) -> FileInputStream {
        let provider = Arc::new(AccessTokenProvider::new(StaticTokenSource::new("t")));
        let ctx = Arc::new(RequestContext::new("account.example.net", provider));
        FileInputStream::new(
            "/f".to_string(),
            test_entry(length),
            ctx,
            None,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_seek_past_eof_fails() {
        let mut stream = test_stream(100);
        assert!(stream.seek(101).is_err());
    }

    #[test]
    fn test_seek_to_exact_end_allowed() {
        let mut stream = test_stream(100);
        stream.seek(100).unwrap();
        assert_eq!(stream.position(), 100);
    }

    #[test]
    fn test_seek_moves_position() {
        let mut stream = test_stream(1000);
        stream.seek(42).unwrap();
        assert_eq!(stream.position(), 42);
        assert_eq!(stream.available().unwrap(), 0);
    }

    #[test]
    fn test_skip_clamps_to_bounds() {
        let mut stream = test_stream(100);
        assert_eq!(stream.skip(-5).unwrap(), 0);
        assert_eq!(stream.skip(60).unwrap(), 60);
        assert_eq!(stream.skip(60).unwrap(), 40);
        assert_eq!(stream.position(), 100);
        assert_eq!(stream.skip(-200).unwrap(), -100);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_seek_within_buffer_window_adjusts_cursor_only() {
        let mut stream = test_stream(1000);
        // simulate a filled buffer covering file range [0, 100)
        stream.buffer = Some(vec![0u8; 100]);
        stream.file_cursor = 100;
        stream.limit = 100;
        stream.buffer_cursor = 50;

        stream.seek(10).unwrap();
        assert_eq!(stream.buffer_cursor, 10);
        assert_eq!(stream.limit, 100); // buffer kept

        stream.seek(100).unwrap(); // exact upper edge still inside the window
        assert_eq!(stream.buffer_cursor, 100);
        assert_eq!(stream.limit, 100);

        stream.seek(101).unwrap(); // outside: invalidate
        assert_eq!(stream.limit, 0);
        assert_eq!(stream.file_cursor, 101);
    }

    #[test]
    fn test_unbuffer_keeps_logical_position() {
        let mut stream = test_stream(1000);
        stream.buffer = Some(vec![0u8; 100]);
        stream.file_cursor = 100;
        stream.limit = 100;
        stream.buffer_cursor = 30;

        stream.unbuffer();
        assert_eq!(stream.position(), 30);
        assert_eq!(stream.available().unwrap(), 0);
        assert_eq!(stream.file_cursor, 30);
    }

    #[test]
    fn test_set_buffer_size_validation() {
        let mut stream = test_stream(1000);
        assert!(stream.set_buffer_size(0).is_err());
        stream.set_buffer_size(20).unwrap();
        assert_eq!(stream.block_size, 20);
    }

    #[tokio::test]
    async fn test_closed_stream_rejects_calls() {
        let mut stream = test_stream(100);
        stream.close();
        assert!(stream.read(&mut [0u8; 4]).await.is_err());
        assert!(stream.read_at(0, &mut [0u8; 4]).await.is_err());
        assert!(stream.seek(0).is_err());
        assert!(stream.skip(1).is_err());
        assert!(stream.available().is_err());
    }

    #[tokio::test]
    async fn test_empty_destination_reads_zero() {
        let mut stream = test_stream(100);
        assert_eq!(stream.read(&mut []).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_at_past_eof_returns_zero() {
        let mut stream = test_stream(100);
        let mut dst = [0u8; 8];
        assert_eq!(stream.read_at(100, &mut dst).await.unwrap(), 0);
        assert_eq!(stream.read_at(500, &mut dst).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_on_empty_file_is_eof() {
        let mut stream = test_stream(0);
        let mut dst = [0u8; 8];
        assert_eq!(stream.read(&mut dst).await.unwrap(), 0);
    }
}
