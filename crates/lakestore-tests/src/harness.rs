//! In-process mock store server.
//!
//! Speaks just enough of the store's REST surface to exercise the client
//! end-to-end over plain HTTP: an in-memory file map, scripted directory
//! listings, and an injection queue for scripted failures (optionally
//! applying an append before failing it, to reproduce retry-induced offset
//! confusion).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;

use lakestore_auth::{AccessTokenProvider, StaticTokenSource};
use lakestore_client::{StoreClient, StoreOptions};

/// One scripted failure, consumed when the next request for `op` arrives.
#[derive(Debug, Clone)]
pub struct Injection {
    pub op: String,
    pub status: u16,
    /// Remote exception name for the error envelope, when any.
    pub exception: Option<String>,
    /// For APPEND: apply the body server-side before failing, simulating a
    /// response lost on the wire.
    pub apply_before_failing: bool,
}

impl Injection {
    pub fn status(op: &str, status: u16) -> Self {
        Self {
            op: op.to_string(),
            status,
            exception: None,
            apply_before_failing: false,
        }
    }

    pub fn remote(op: &str, status: u16, exception: &str) -> Self {
        Self {
            exception: Some(exception.to_string()),
            ..Self::status(op, status)
        }
    }

    pub fn lost_append_response() -> Self {
        Self {
            apply_before_failing: true,
            ..Self::status("APPEND", 500)
        }
    }
}

/// What the server saw for one request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub op: String,
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub body_len: usize,
    pub client_request_id: Option<String>,
    pub latency_header: Option<String>,
}

#[derive(Default)]
pub struct MockStore {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub directories: Mutex<HashSet<String>>,
    /// Scripted LISTSTATUS payloads, keyed by directory path.
    pub listings: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    /// Entries served by GETACLSTATUS.
    pub acl_entries: Mutex<Vec<String>>,
    injections: Mutex<VecDeque<Injection>>,
    pub requests: Mutex<Vec<RequestRecord>>,
    pub deny_access: AtomicBool,
    /// Server-side cap on listing page length, to force client paging.
    pub listing_page_cap: AtomicUsize,
    request_counter: AtomicU64,
}

impl MockStore {
    fn new() -> Self {
        let store = Self::default();
        store.listing_page_cap.store(usize::MAX, Ordering::SeqCst);
        store
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn add_directory(&self, path: &str) {
        self.directories.lock().unwrap().insert(path.to_string());
    }

    pub fn add_listing(&self, path: &str, entries: Vec<serde_json::Value>) {
        self.add_directory(path);
        self.listings
            .lock()
            .unwrap()
            .insert(path.to_string(), entries);
    }

    pub fn inject(&self, injection: Injection) {
        self.injections.lock().unwrap().push_back(injection);
    }

    pub fn recorded(&self, op: &str) -> Vec<RequestRecord> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.op == op)
            .cloned()
            .collect()
    }

    fn take_injection(&self, op: &str) -> Option<Injection> {
        let mut injections = self.injections.lock().unwrap();
        if injections.front().is_some_and(|i| i.op == op) {
            injections.pop_front()
        } else {
            None
        }
    }

    fn respond(&self, status: StatusCode, body: Vec<u8>) -> Response {
        let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed);
        Response::builder()
            .status(status)
            .header("x-ms-request-id", format!("srv-{request_id}"))
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    fn remote_exception(&self, status: StatusCode, name: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "RemoteException": {
                "exception": name,
                "message": message,
                "javaClassName": format!("org.example.store.{name}"),
            }
        });
        self.respond(status, body.to_string().into_bytes())
    }

    fn file_status_json(&self, path: &str) -> Option<serde_json::Value> {
        if let Some(contents) = self.files.lock().unwrap().get(path) {
            return Some(serde_json::json!({
                "length": contents.len(),
                "pathSuffix": "",
                "type": "FILE",
                "blockSize": 268435456u64,
                "accessTime": 1506543800000u64,
                "modificationTime": 1506543900000u64,
                "replication": 1,
                "permission": "644",
                "owner": "test-owner",
                "group": "test-group",
            }));
        }
        let is_dir = path == "/"
            || self.directories.lock().unwrap().contains(path)
            || self.listings.lock().unwrap().contains_key(path);
        is_dir.then(|| {
            serde_json::json!({
                "length": 0,
                "pathSuffix": "",
                "type": "DIRECTORY",
                "blockSize": 0,
                "accessTime": 1506543800000u64,
                "modificationTime": 1506543900000u64,
                "replication": 0,
                "permission": "755",
                "owner": "test-owner",
                "group": "test-group",
            })
        })
    }

    fn dispatch(&self, record: RequestRecord, body: Bytes) -> Response {
        if let Some(injection) = self.take_injection(&record.op) {
            if injection.apply_before_failing && record.op == "APPEND" {
                let mut files = self.files.lock().unwrap();
                files.entry(record.path.clone()).or_default().extend_from_slice(&body);
            }
            let status = StatusCode::from_u16(injection.status).unwrap();
            return match injection.exception {
                Some(name) => self.remote_exception(status, &name, "injected failure"),
                None => self.respond(status, Vec::new()),
            };
        }

        let path = record.path.clone();
        let params = record.params.clone();
        match record.op.as_str() {
            "CREATE" => {
                let overwrite = params.get("overwrite").map(String::as_str) == Some("true");
                let mut files = self.files.lock().unwrap();
                if files.contains_key(&path) && !overwrite {
                    drop(files);
                    return self.remote_exception(
                        StatusCode::FORBIDDEN,
                        "FileAlreadyExistsException",
                        "file already exists",
                    );
                }
                files.insert(path, body.to_vec());
                self.respond(StatusCode::CREATED, Vec::new())
            }
            "APPEND" => {
                let mut files = self.files.lock().unwrap();
                let current_len = match files.get(&path) {
                    Some(contents) => contents.len() as u64,
                    None => {
                        drop(files);
                        return self.remote_exception(
                            StatusCode::NOT_FOUND,
                            "FileNotFoundException",
                            "file does not exist",
                        );
                    }
                };
                let offset = params.get("offset").and_then(|v| v.parse::<u64>().ok());
                if offset.is_some_and(|offset| offset != current_len) {
                    drop(files);
                    return self.remote_exception(
                        StatusCode::BAD_REQUEST,
                        "BadOffsetException",
                        "append offset does not match stream length",
                    );
                }
                let contents = files.entry(path).or_default();
                contents.extend_from_slice(&body);
                let committed = contents.len();
                drop(files);
                let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed);
                Response::builder()
                    .status(StatusCode::OK)
                    .header("x-ms-request-id", format!("srv-{request_id}"))
                    .header("x-ms-committed-block-offset", committed.to_string())
                    .body(axum::body::Body::empty())
                    .unwrap()
            }
            "OPEN" => {
                let contents = match self.file(&path) {
                    Some(contents) => contents,
                    None => {
                        return self.remote_exception(
                            StatusCode::NOT_FOUND,
                            "FileNotFoundException",
                            "file does not exist",
                        );
                    }
                };
                let offset = params
                    .get("offset")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let length = params
                    .get("length")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(usize::MAX);
                let start = offset.min(contents.len());
                let end = start.saturating_add(length).min(contents.len());
                self.respond(StatusCode::OK, contents[start..end].to_vec())
            }
            "GETFILESTATUS" => match self.file_status_json(&path) {
                Some(status) => {
                    let body = serde_json::json!({ "FileStatus": status });
                    self.respond(StatusCode::OK, body.to_string().into_bytes())
                }
                None => self.remote_exception(
                    StatusCode::NOT_FOUND,
                    "FileNotFoundException",
                    "path does not exist",
                ),
            },
            "LISTSTATUS" => {
                let listings = self.listings.lock().unwrap();
                let mut entries: Vec<serde_json::Value> =
                    listings.get(&path).cloned().unwrap_or_default();
                drop(listings);
                if let Some(after) = params.get("listAfter") {
                    entries.retain(|e| {
                        e.get("pathSuffix").and_then(|v| v.as_str()).unwrap_or("") > after.as_str()
                    });
                }
                let mut cap = self.listing_page_cap.load(Ordering::SeqCst);
                if let Some(size) = params.get("listSize").and_then(|v| v.parse::<usize>().ok()) {
                    cap = cap.min(size);
                }
                let truncated = entries.len() > cap;
                entries.truncate(cap);
                let mut statuses = serde_json::json!({ "FileStatus": entries });
                if truncated {
                    // newer API versions hand back a continuation token
                    let last = statuses["FileStatus"]
                        .as_array()
                        .and_then(|list| list.last())
                        .and_then(|e| e.get("pathSuffix"))
                        .cloned()
                        .unwrap_or_default();
                    statuses["continuationToken"] = last;
                }
                let body = serde_json::json!({ "FileStatuses": statuses });
                self.respond(StatusCode::OK, body.to_string().into_bytes())
            }
            "MKDIRS" => {
                self.add_directory(&path);
                self.respond(StatusCode::OK, br#"{"boolean":true}"#.to_vec())
            }
            "DELETE" => {
                let removed = self.files.lock().unwrap().remove(&path).is_some()
                    || self.directories.lock().unwrap().remove(&path);
                let body = format!("{{\"boolean\":{removed}}}");
                self.respond(StatusCode::OK, body.into_bytes())
            }
            "RENAME" => {
                let destination = params.get("destination").cloned().unwrap_or_default();
                let mut files = self.files.lock().unwrap();
                let moved = match files.remove(&path) {
                    Some(contents) => {
                        files.insert(destination, contents);
                        true
                    }
                    None => false,
                };
                let body = format!("{{\"boolean\":{moved}}}");
                self.respond(StatusCode::OK, body.into_bytes())
            }
            "GETACLSTATUS" => {
                let entries = self.acl_entries.lock().unwrap().clone();
                let body = serde_json::json!({
                    "AclStatus": {
                        "entries": entries,
                        "owner": "test-owner",
                        "group": "test-group",
                        "permission": "755",
                        "stickyBit": false,
                    }
                });
                self.respond(StatusCode::OK, body.to_string().into_bytes())
            }
            "CHECKACCESS" => {
                if self.deny_access.load(Ordering::SeqCst) {
                    self.remote_exception(
                        StatusCode::FORBIDDEN,
                        "AccessControlException",
                        "permission denied",
                    )
                } else {
                    self.respond(StatusCode::OK, Vec::new())
                }
            }
            // mutations the tests only assert were received
            "SETACL" | "MODIFYACLENTRIES" | "REMOVEACLENTRIES" | "REMOVEDEFAULTACL"
            | "REMOVEACL" | "SETOWNER" | "SETPERMISSION" | "SETTIMES" | "SETEXPIRY" | "CONCAT"
            | "MSCONCAT" | "CONCURRENTAPPEND" => self.respond(StatusCode::OK, Vec::new()),
            _ => self.respond(StatusCode::NOT_IMPLEMENTED, Vec::new()),
        }
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((percent_decode(name), percent_decode(value)))
        })
        .collect()
}

async fn handle(State(store): State<Arc<MockStore>>, request: Request) -> Response {
    let method = request.method().to_string();
    let uri = request.uri().clone();
    let client_request_id = request
        .headers()
        .get("x-ms-client-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let latency_header = request
        .headers()
        .get("x-ms-adl-client-latency")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();

    let raw_path = uri.path();
    let path = percent_decode(
        raw_path
            .strip_prefix("/webhdfs/v1")
            .or_else(|| raw_path.strip_prefix("/WebHdfsExt"))
            .unwrap_or(raw_path),
    );
    let params = parse_query(uri.query().unwrap_or(""));
    let record = RequestRecord {
        op: params.get("op").cloned().unwrap_or_default(),
        method,
        path,
        params,
        body_len: body.len(),
        client_request_id,
        latency_header,
    };
    store.requests.lock().unwrap().push(record.clone());
    store.dispatch(record, body)
}

/// A running mock store bound to an ephemeral local port.
pub struct MockServer {
    pub store: Arc<MockStore>,
    pub authority: String,
}

impl MockServer {
    pub async fn start() -> Self {
        let store = Arc::new(MockStore::new());
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&store));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let authority = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { store, authority }
    }

    /// Options every test client starts from: plain http, short timeout,
    /// fast retries.
    pub fn base_options() -> StoreOptions {
        StoreOptions::new()
            .with_insecure_transport()
            .with_default_timeout(Duration::from_secs(10))
            .with_exponential_backoff(4, Duration::from_millis(20), 2)
    }

    pub fn client(&self) -> StoreClient {
        self.client_with(Self::base_options())
    }

    pub fn client_with(&self, options: StoreOptions) -> StoreClient {
        let provider = AccessTokenProvider::new(StaticTokenSource::new("test-token"));
        StoreClient::with_options(self.authority.clone(), provider, options)
            .expect("mock client")
    }
}
