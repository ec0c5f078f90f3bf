//! End-to-end read-path scenarios against the mock store.

#[cfg(test)]
mod tests {
    use crate::harness::MockServer;
    use lakestore_client::StoreOptions;

    /// Deterministic 742-byte sample text.
    fn sample_text() -> Vec<u8> {
        let mut text = Vec::new();
        while text.len() < 742 {
            text.extend_from_slice(
                b"the quick brown fox jumps over the lazy dog 0123456789 \
                  THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG. ",
            );
        }
        text.truncate(742);
        text
    }

    fn no_readahead() -> StoreOptions {
        MockServer::base_options().with_read_ahead_queue_depth(0)
    }

    #[tokio::test]
    async fn test_sequential_read_of_small_file() {
        let server = MockServer::start().await;
        let contents = sample_text();
        server.store.put_file("/sample.txt", &contents);

        let client = server.client_with(no_readahead());
        let mut stream = client.open("/sample.txt").await.unwrap();
        assert_eq!(stream.length(), 742);

        let mut read_back = Vec::new();
        let mut chunk = [0u8; 100];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(read_back, contents);
        // small file: a single slurp from offset 0
        let opens = server.store.recorded("OPEN");
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].params.get("offset").map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn test_seek_ladder_with_small_buffer() {
        let server = MockServer::start().await;
        let contents = sample_text();
        server.store.put_file("/sample.txt", &contents);

        let client = server.client_with(no_readahead());
        let mut stream = client.open("/sample.txt").await.unwrap();
        stream.set_buffer_size(20).unwrap();

        for &position in &[21u64, 0, 60, 61, 75, 62, 21, 45, 80, 23, 22, 99, 11, 3, 0] {
            stream.seek(position).unwrap();
            let byte = stream.read_byte().await.unwrap();
            assert_eq!(
                byte,
                Some(contents[position as usize]),
                "wrong byte at offset {position}"
            );
        }
    }

    #[tokio::test]
    async fn test_reads_near_end_of_file() {
        let server = MockServer::start().await;
        let contents: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        server.store.put_file("/kilobyte.bin", &contents);

        let client = server.client_with(no_readahead());
        let mut stream = client.open("/kilobyte.bin").await.unwrap();
        stream.seek(stream.length() - 2).unwrap();

        assert_eq!(stream.read_byte().await.unwrap(), Some(contents[1022]));
        assert_eq!(stream.read_byte().await.unwrap(), Some(contents[1023]));
        assert_eq!(stream.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_positioned_read_leaves_cursor_alone() {
        let server = MockServer::start().await;
        let contents: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        server.store.put_file("/positions.bin", &contents);

        let client = server.client_with(no_readahead());
        let mut stream = client.open("/positions.bin").await.unwrap();
        stream.seek(100).unwrap();

        let mut dst = [0u8; 16];
        let n = stream.read_at(200, &mut dst).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(&dst[..], &contents[200..216]);
        assert_eq!(stream.position(), 100);

        // the sequential read then picks up where seek left it
        assert_eq!(stream.read_byte().await.unwrap(), Some(contents[100]));
    }

    #[tokio::test]
    async fn test_buffered_read_fetches_in_blocks() {
        let server = MockServer::start().await;
        let contents: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        server.store.put_file("/blocks.bin", &contents);

        let client = server.client_with(no_readahead());
        let mut stream = client.open("/blocks.bin").await.unwrap();
        stream.set_buffer_size(128).unwrap();

        let mut read_back = Vec::new();
        let mut chunk = [0u8; 50];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(read_back, contents);
        // 300 bytes at a 128-byte block size: three server fetches
        assert_eq!(server.store.recorded("OPEN").len(), 3);
        assert_eq!(stream.available().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_with_readahead_enabled_returns_correct_data() {
        let server = MockServer::start().await;
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        server.store.put_file("/large.bin", &contents);

        // default options: read-ahead queues through the shared manager
        let client = server.client();
        let mut stream = client.open("/large.bin").await.unwrap();
        stream.set_buffer_size(8 * 1024).unwrap();

        let mut read_back = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(read_back, contents);
    }

    #[tokio::test]
    async fn test_open_rejects_directory() {
        let server = MockServer::start().await;
        server.store.add_directory("/some/dir");
        let client = server.client();
        assert!(client.open("/some/dir").await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let server = MockServer::start().await;
        let client = server.client();
        assert!(client.open("/absent.txt").await.is_err());
    }
}
