//! Buffered file appender.
//!
//! Accumulates writes into a block-sized buffer (default 4 MiB) and ships
//! each block as one append at an explicit server offset. A client-generated
//! lease id doubles as the session id for every append from this stream;
//! closing releases the lease via a close-marked append.
//!
//! Appends are non-idempotent, so the first attempt of every flush runs
//! under the no-retry policy; only the stream's own re-issue uses
//! exponential backoff, and a retry that trips over its own earlier success
//! (HTTP 400 `BadOffsetException` after a retried attempt) is resolved with
//! a zero-length probe append at the expected offset.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};
use uuid::Uuid;

use lakestore_core::error::{Result, StoreError};
use lakestore_core::models::SyncFlag;
use lakestore_core::protocol;
use lakestore_core::request::{RequestContext, RequestOptions};
use lakestore_core::retry::NoRetryPolicy;

use crate::readahead::BLOCK_SIZE;

/// Buffered appender over one file. Not thread-safe; single caller only.
#[derive(Debug)]
pub struct FileOutputStream {
    path: String,
    ctx: Arc<RequestContext>,
    /// Client-generated; grants exclusive append access until released, and
    /// serves as the session id on every append.
    lease_id: String,
    block_size: usize,
    buffer: Vec<u8>,
    /// Server-acknowledged length; the offset of the next append.
    remote_cursor: u64,
    closed: bool,
    last_flush_updated_metadata: bool,
}

impl FileOutputStream {
    /// Stream over a file just created with `lease_id`.
    pub(crate) fn open_create(path: String, ctx: Arc<RequestContext>, lease_id: String) -> Self {
        Self {
            path,
            ctx,
            lease_id,
            block_size: BLOCK_SIZE,
            buffer: Vec::new(),
            remote_cursor: 0,
            closed: false,
            last_flush_updated_metadata: false,
        }
    }

    /// Stream appending to an existing file. Issues a zero-length
    /// metadata-sync append to settle the server-side length, then reads it.
    pub(crate) async fn open_append(path: String, ctx: Arc<RequestContext>) -> Result<Self> {
        let mut stream = Self::open_create(path, ctx, Uuid::new_v4().to_string());
        if !stream.zero_length_append(-1).await {
            return Err(StoreError::InvalidInput(format!(
                "error doing zero-length append for append stream for file {}",
                stream.path
            )));
        }
        let mut opts = RequestOptions::new(stream.ctx.make_exponential_policy());
        let entry =
            protocol::get_file_status(&stream.ctx, &stream.path, None, &mut opts).await?;
        stream.remote_cursor = entry.length;
        trace!(path = %stream.path, remote_cursor = stream.remote_cursor, "append stream attached");
        Ok(stream)
    }

    /// Buffers `data`, flushing full blocks as they accumulate. A write
    /// larger than one block is split at block boundaries so every segment
    /// aligns with the upload chunk; the record boundary of the final
    /// segment is preserved.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StoreError::InvalidInput(
                "attempting to write to a closed stream".to_string(),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        while data.len() > self.block_size {
            self.flush_with(SyncFlag::Data).await?;
            self.buffer.extend_from_slice(&data[..self.block_size]);
            data = &data[self.block_size..];
        }
        if data.len() > self.block_size - self.buffer.len() {
            self.flush_with(SyncFlag::Data).await?;
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Flushes buffered data and syncs the file metadata.
    pub async fn flush(&mut self) -> Result<()> {
        self.flush_with(SyncFlag::Metadata).await
    }

    async fn flush_with(&mut self, sync_flag: SyncFlag) -> Result<()> {
        if self.closed {
            return Ok(()); // some callers flush after close
        }
        if self.buffer.is_empty() {
            if sync_flag == SyncFlag::Data {
                return Ok(()); // nothing to ship
            }
            if sync_flag == SyncFlag::Metadata && self.last_flush_updated_metadata {
                return Ok(()); // metadata already current
            }
        }
        trace!(
            path = %self.path,
            bytes = self.buffer.len(),
            offset = self.remote_cursor,
            flag = sync_flag.as_str(),
            "flush"
        );

        let data = Bytes::copy_from_slice(&self.buffer);
        let mut opts = RequestOptions::new(NoRetryPolicy::new());
        let first = protocol::append(
            &self.ctx,
            &self.path,
            self.remote_cursor as i64,
            data.clone(),
            &self.lease_id,
            &self.lease_id,
            sync_flag,
            &mut opts,
        )
        .await;

        if first.is_err() {
            let mut retry_opts = RequestOptions::new(self.ctx.make_exponential_policy());
            let retried = protocol::append(
                &self.ctx,
                &self.path,
                self.remote_cursor as i64,
                data,
                &self.lease_id,
                &self.lease_id,
                sync_flag,
                &mut retry_opts,
            )
            .await;

            if let Err(retry_err) = retried {
                if let StoreError::Remote(details) = &retry_err {
                    let offset_confusion = details.num_retries > 0
                        && details.http_status == 400
                        && details.remote_exception_name() == Some("BadOffsetException");
                    if offset_confusion {
                        // an earlier attempt may have landed server-side; a
                        // zero-length append at the expected offset settles it
                        let expected = self.remote_cursor + self.buffer.len() as u64;
                        if self.zero_length_append(expected as i64).await {
                            debug!(
                                path = %self.path,
                                expected,
                                lease = %self.lease_id,
                                "zero-length append landed at expected offset; ignoring offset mismatch"
                            );
                            self.remote_cursor = expected;
                            self.buffer.clear();
                            self.last_flush_updated_metadata = false;
                            return Ok(());
                        }
                        debug!(
                            path = %self.path,
                            expected,
                            lease = %self.lease_id,
                            "append probe failed at expected offset; surfacing the error"
                        );
                    }
                }
                return Err(retry_err);
            }
        }

        self.remote_cursor += self.buffer.len() as u64;
        self.buffer.clear();
        self.last_flush_updated_metadata =
            matches!(sync_flag, SyncFlag::Metadata | SyncFlag::Close);
        Ok(())
    }

    /// Zero-length append at `offset` with the metadata-sync flag. Probes
    /// the server-side length; pass a negative offset to defer to the
    /// server's own cursor.
    async fn zero_length_append(&self, offset: i64) -> bool {
        let mut opts = RequestOptions::new(self.ctx.make_exponential_policy());
        protocol::append(
            &self.ctx,
            &self.path,
            offset,
            Bytes::new(),
            &self.lease_id,
            &self.lease_id,
            SyncFlag::Metadata,
            &mut opts,
        )
        .await
        .is_ok()
    }

    /// Resizes the write buffer, shipping current data first.
    pub async fn set_buffer_size(&mut self, new_size: usize) -> Result<()> {
        if new_size == 0 {
            return Err(StoreError::InvalidInput(
                "buffer size cannot be zero".to_string(),
            ));
        }
        if new_size == self.block_size {
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.flush_with(SyncFlag::Data).await?;
        }
        self.block_size = new_size;
        Ok(())
    }

    /// Flushes remaining data, syncs metadata, and releases the lease.
    /// Idempotent; later calls are silent no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_with(SyncFlag::Close).await?;
        self.closed = true;
        self.buffer = Vec::new();
        trace!(path = %self.path, lease = %self.lease_id, "stream closed");
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The lease (and session) id this stream appends under.
    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakestore_auth::{AccessTokenProvider, StaticTokenSource};

    fn test_stream() -> FileOutputStream {
        let provider = Arc::new(AccessTokenProvider::new(StaticTokenSource::new("t")));
        let ctx = Arc::new(RequestContext::new("account.example.net", provider));
        FileOutputStream::open_create("/f".to_string(), ctx, Uuid::new_v4().to_string())
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let mut stream = test_stream();
        stream.closed = true; // skip the close-marked append
        assert!(stream.write(b"abc").await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut stream = test_stream();
        stream.closed = true;
        stream.close().await.unwrap();
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_after_close_is_silent() {
        let mut stream = test_stream();
        stream.closed = true;
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_small_writes_accumulate_without_flushing() {
        let mut stream = test_stream();
        stream.write(b"hello ").await.unwrap();
        stream.write(b"world").await.unwrap();
        assert_eq!(stream.buffer, b"hello world");
        assert_eq!(stream.remote_cursor, 0);
    }

    #[tokio::test]
    async fn test_set_buffer_size_rejects_zero() {
        let mut stream = test_stream();
        assert!(stream.set_buffer_size(0).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_write_is_noop() {
        let mut stream = test_stream();
        stream.write(b"").await.unwrap();
        assert!(stream.buffer.is_empty());
    }
}
