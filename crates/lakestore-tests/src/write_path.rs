//! End-to-end write-path scenarios: chunking, retry behavior, and
//! offset-mismatch recovery.
