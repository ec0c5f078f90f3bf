//! Error taxonomy for store operations.
//!
//! Failures fall into three kinds: caller bugs (`InvalidInput`), token
//! acquisition failures (`Auth`), and everything that happened while talking
//! to the store (`Remote`). A [`RemoteCallError`] carries the full context of
//! the failed call: HTTP status (0 when the failure never got an HTTP
//! response), the server request id, the server's structured exception
//! envelope, the retry count and the latency of the last attempt.

use thiserror::Error;

use lakestore_auth::AuthError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failure: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Remote(Box<RemoteCallError>),

    /// Remote failure surfaced as a typed I/O error. Produced instead of
    /// `Remote` when the client enables `throw_remote_exceptions` and the
    /// server's exception class denotes a recognized I/O condition.
    #[error(transparent)]
    RemoteIo(std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The server's structured error envelope.
#[derive(Debug, Clone)]
pub struct RemoteException {
    /// Short exception name, e.g. `BadOffsetException`.
    pub name: String,
    pub message: String,
    /// Exception class name reported for WebHDFS compatibility. Stored
    /// verbatim; only ever interpreted to pick an error kind.
    pub java_class_name: String,
}

/// Everything known about a failed store call.
#[derive(Debug)]
pub struct RemoteCallError {
    /// The operation that failed, by wire name.
    pub operation: &'static str,
    /// The path the operation was invoked on.
    pub path: String,
    /// HTTP status of the last attempt; 0 if the failure was transport-only.
    pub http_status: u16,
    /// Reason phrase of the last HTTP response, when one was received.
    pub http_message: Option<String>,
    /// Server request id from the last attempt, when received.
    pub server_request_id: Option<String>,
    /// The server's exception envelope, when the error body carried one.
    pub remote_exception: Option<RemoteException>,
    /// Transport-level failure description, when no HTTP response arrived.
    pub transport_error: Option<String>,
    /// Number of retries performed before giving up.
    pub num_retries: u32,
    /// Latency of the last attempt, in milliseconds.
    pub last_call_latency_ms: u64,
    /// Content-Length of the error response body.
    pub response_content_length: u64,
    /// Compact descriptions of every failed attempt, comma-separated.
    pub exception_history: Option<String>,
}

impl RemoteCallError {
    pub fn remote_exception_name(&self) -> Option<&str> {
        self.remote_exception.as_ref().map(|e| e.name.as_str())
    }
}

impl std::fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation {} on {} failed", self.operation, self.path)?;
        if let Some(te) = &self.transport_error {
            write!(f, " with transport error: {te}")?;
        } else if self.http_status > 0 {
            write!(f, " with HTTP {}", self.http_status)?;
            if let Some(re) = &self.remote_exception {
                write!(f, " ({}: {})", re.name, re.message)?;
            }
        }
        write!(f, " after {} tries", self.num_retries + 1)?;
        if let Some(history) = &self.exception_history {
            write!(f, " [{history}]")?;
        }
        if let Some(id) = &self.server_request_id {
            write!(f, " [ServerRequestId:{id}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteCallError {}

impl From<RemoteCallError> for StoreError {
    fn from(err: RemoteCallError) -> Self {
        StoreError::Remote(Box::new(err))
    }
}

/// Maps a remote exception class name to the I/O error kind it denotes, when
/// it denotes one at all.
fn io_kind_for_class(class_name: &str) -> Option<std::io::ErrorKind> {
    let short = class_name.rsplit('.').next().unwrap_or(class_name);
    match short {
        "FileNotFoundException" => Some(std::io::ErrorKind::NotFound),
        "FileAlreadyExistsException" => Some(std::io::ErrorKind::AlreadyExists),
        "AccessControlException" => Some(std::io::ErrorKind::PermissionDenied),
        "IOException" | "RemoteException" => Some(std::io::ErrorKind::Other),
        _ => None,
    }
}

/// Converts a call failure into the error the caller sees, honoring the
/// client's `throw_remote_exceptions` setting.
pub fn surface_error(err: RemoteCallError, throw_remote_exceptions: bool) -> StoreError {
    if throw_remote_exceptions {
        if let Some(re) = &err.remote_exception {
            if !re.java_class_name.is_empty() {
                let kind =
                    io_kind_for_class(&re.java_class_name).unwrap_or(std::io::ErrorKind::Other);
                let suffix = err
                    .server_request_id
                    .as_deref()
                    .map(|id| format!(" [ServerRequestId:{id}]"))
                    .unwrap_or_default();
                return StoreError::RemoteIo(std::io::Error::new(
                    kind,
                    format!("{}{}", re.message, suffix),
                ));
            }
        }
    }
    StoreError::Remote(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error(class_name: &str) -> RemoteCallError {
        RemoteCallError {
            operation: "GETFILESTATUS",
            path: "/a/b".to_string(),
            http_status: 404,
            http_message: Some("Not Found".to_string()),
            server_request_id: Some("req-1".to_string()),
            remote_exception: Some(RemoteException {
                name: "FileNotFoundException".to_string(),
                message: "File /a/b does not exist".to_string(),
                java_class_name: class_name.to_string(),
            }),
            transport_error: None,
            num_retries: 2,
            last_call_latency_ms: 17,
            response_content_length: 120,
            exception_history: Some("HTTP404(FileNotFoundException)".to_string()),
        }
    }

    #[test]
    fn test_display_includes_status_and_request_id() {
        let msg = sample_error("java.io.FileNotFoundException").to_string();
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("after 3 tries"));
        assert!(msg.contains("[ServerRequestId:req-1]"));
    }

    #[test]
    fn test_surface_as_remote_by_default() {
        let err = surface_error(sample_error("java.io.FileNotFoundException"), false);
        assert!(matches!(err, StoreError::Remote(_)));
    }

    #[test]
    fn test_surface_as_typed_io_when_enabled() {
        let err = surface_error(sample_error("java.io.FileNotFoundException"), true);
        match err {
            StoreError::RemoteIo(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected RemoteIo, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_class_surfaces_generic_io() {
        let err = surface_error(sample_error("org.example.SomethingElse"), true);
        match err {
            StoreError::RemoteIo(io) => assert_eq!(io.kind(), std::io::ErrorKind::Other),
            other => panic!("expected RemoteIo, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_only_display() {
        let err = RemoteCallError {
            operation: "OPEN",
            path: "/x".to_string(),
            http_status: 0,
            http_message: None,
            server_request_id: None,
            remote_exception: None,
            transport_error: Some("connection reset".to_string()),
            num_retries: 0,
            last_call_latency_ms: 3,
            response_content_length: 0,
            exception_history: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("transport error: connection reset"));
        assert!(msg.contains("after 1 tries"));
    }
}
