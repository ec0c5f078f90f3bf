//! Query-string assembly and percent-encoding.
//!
//! Encoding follows RFC 3986: unreserved characters pass through, everything
//! else becomes `%XX`. Space is never encoded as `+`, and path encoding keeps
//! `/` separators intact.

use std::collections::BTreeMap;

use crate::operation::Operation;

/// API version advertised on every request.
pub const API_VERSION: &str = "2018-09-01";

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn encode_into(out: &mut String, input: &str, keep_slash: bool) {
    for &b in input.as_bytes() {
        if is_unreserved(b) || (keep_slash && b == b'/') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
}

/// Percent-encodes one query name or value.
pub fn encode_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    encode_into(&mut out, input, false);
    out
}

/// Percent-encodes a path, preserving `/` segment separators.
pub fn encode_path(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    encode_into(&mut out, input, true);
    out
}

/// Builder for an operation's query string: `op=` first, then the params in
/// sorted order, then `api-version=`.
#[derive(Debug, Default)]
pub struct QueryParams {
    op: Option<Operation>,
    params: BTreeMap<String, String>,
}

impl QueryParams {
    pub fn new(op: Operation) -> Self {
        Self {
            op: Some(op),
            params: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn add_opt(&mut self, name: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.add(name, value);
        }
        self
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let mut separator = "";
        if let Some(op) = self.op {
            out.push_str("op=");
            out.push_str(op.name());
            separator = "&";
        }
        for (name, value) in &self.params {
            out.push_str(separator);
            encode_into(&mut out, name, false);
            out.push('=');
            encode_into(&mut out, value, false);
            separator = "&";
        }
        out.push_str(separator);
        out.push_str("api-version=");
        out.push_str(API_VERSION);
        out
    }
}
