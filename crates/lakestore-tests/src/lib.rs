//! Integration tests for the lakestore client.
//!
//! Every scenario runs the real client stack (facade, streams, request
//! engine, retry policies) against an in-process mock store served by
//! [`harness::MockServer`] over plain HTTP.

pub mod harness;

mod acl_and_summary;
mod operations;
mod read_path;
mod write_path;

pub use harness::{Injection, MockServer, MockStore, RequestRecord};
