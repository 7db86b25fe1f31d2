// Firebase Realtime Database client over the REST + streaming API

use super::sse::{SseParser, StreamEvent};
use super::{DocumentStore, Listener, ListenerId, Snapshot, SnapshotEvent, StoreError};
use crate::path::StorePath;
use crate::tree;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hosted realtime database reached over HTTPS
///
/// Writes are plain REST calls bounded by the request timeout. Each listener
/// gets its own event-stream request read on a background thread; `off()`
/// stops delivery at once and the thread exits on its next wake-up (the server
/// sends a keep-alive every 30 seconds).
pub struct RtdbStore {
    base: Url,
    auth: Option<String>,
    client: Client,
    stream_client: Client,
    streams: Mutex<HashMap<ListenerId, Arc<AtomicBool>>>,
    next_id: AtomicU64,
    version: Arc<AtomicU64>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl RtdbStore {
    pub fn connect(url: &str, auth: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let base = Url::parse(url).map_err(|e| StoreError::InvalidPath(format!("{}: {}", url, e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidPath(format!("{}: not a base URL", url)));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        // Streams stay open indefinitely
        let stream_client = Client::builder()
            .timeout(None)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        info!(url = %base, "Connected realtime database client");
        Ok(Self {
            base,
            auth,
            client,
            stream_client,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            version: Arc::new(AtomicU64::new(0)),
        })
    }

    /// REST URL for a path: `{base}/{segments}.json[?auth=...]`
    pub fn url_for(&self, path: &StorePath) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidPath(format!("{}: not a base URL", self.base)))?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                Some((last, init)) => {
                    segments.extend(init);
                    segments.push(&format!("{}.json", last));
                }
                None => {
                    segments.push(".json");
                }
            }
        }
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<ListenerId, Arc<AtomicBool>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

impl Drop for RtdbStore {
    fn drop(&mut self) {
        for active in self.streams().values() {
            active.store(false, Ordering::Release);
        }
    }
}

impl DocumentStore for RtdbStore {
    fn on_snapshot(&self, path: &StorePath, listener: Listener) -> Result<ListenerId, StoreError> {
        let url = self.url_for(path)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let active = Arc::new(AtomicBool::new(true));

        let request = self.stream_client.get(url).header(ACCEPT, "text/event-stream");
        let stream = StreamState::new(path.clone(), Arc::clone(&self.version));
        let thread_active = Arc::clone(&active);

        thread::Builder::new()
            .name(format!("rtdb-stream-{}", id.0))
            .spawn(move || run_stream(request, stream, listener, thread_active))
            .map_err(|e| StoreError::Transport(format!("Failed to start stream thread: {}", e)))?;

        self.streams().insert(id, active);
        info!(listener = id.0, path = %path, "Opened realtime stream");
        Ok(id)
    }

    fn off(&self, id: ListenerId) {
        if let Some(active) = self.streams().remove(&id) {
            active.store(false, Ordering::Release);
            debug!(listener = id.0, "Closed realtime stream");
        }
    }

    fn get(&self, path: &StorePath) -> Result<Value, StoreError> {
        let response = self.execute(self.client.get(self.url_for(path)?))?;
        response
            .json::<Value>()
            .map_err(|e| StoreError::Transport(format!("invalid response body: {}", e)))
    }

    fn write_generated(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let response = self.execute(self.client.post(self.url_for(path)?).json(&value))?;
        let pushed: PushResponse = response
            .json()
            .map_err(|e| StoreError::Transport(format!("invalid push response: {}", e)))?;
        debug!(path = %path, key = %pushed.name, "write_generated");
        Ok(pushed.name)
    }

    fn write_exact(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.execute(self.client.put(self.url_for(path)?).json(&value))?;
        debug!(path = %path, "write_exact");
        Ok(())
    }

    fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        self.execute(self.client.delete(self.url_for(path)?))?;
        debug!(path = %path, "delete");
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Transport(err.to_string())
}

/// Map a non-2xx response to a store error
///
/// The database reports failures as `{"error": "..."}`.
pub fn error_for_status(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => StoreError::InvalidPath(message),
        _ => StoreError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Locally cached value of one streamed location
pub struct StreamState {
    path: StorePath,
    cache: Value,
    version: Arc<AtomicU64>,
}

impl StreamState {
    pub fn new(path: StorePath, version: Arc<AtomicU64>) -> Self {
        Self {
            path,
            cache: Value::Null,
            version,
        }
    }

    /// Fold one stream event into the cache
    ///
    /// Returns the snapshot to deliver, `None` for events that carry no data,
    /// or the error that ends the stream.
    pub fn apply(&mut self, event: StreamEvent) -> Result<Option<Snapshot>, StoreError> {
        match event {
            StreamEvent::Put(payload) => {
                tree::set_at(&mut self.cache, &relative_segments(&payload.path), payload.data);
            }
            StreamEvent::Patch(payload) => match payload.data {
                Value::Object(children) => {
                    tree::merge_at(&mut self.cache, &relative_segments(&payload.path), children);
                }
                other => {
                    return Err(StoreError::Transport(format!("patch with non-object data: {}", other)));
                }
            },
            StreamEvent::KeepAlive => return Ok(None),
            StreamEvent::Unknown(name) => {
                debug!(event = %name, "ignoring unknown stream event");
                return Ok(None);
            }
            StreamEvent::Cancel(reason) => {
                let reason = if reason.trim().is_empty() || reason.trim() == "null" {
                    "read cancelled by security rules".to_string()
                } else {
                    reason
                };
                return Err(StoreError::PermissionDenied(reason));
            }
            StreamEvent::AuthRevoked => {
                return Err(StoreError::PermissionDenied("auth token revoked".to_string()));
            }
        }

        Ok(Some(Snapshot {
            path: self.path.clone(),
            value: self.cache.clone(),
            version: self.version.fetch_add(1, Ordering::AcqRel) + 1,
        }))
    }
}

fn relative_segments(raw: &str) -> Vec<String> {
    raw.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn run_stream(request: RequestBuilder, mut stream: StreamState, mut listener: Listener, active: Arc<AtomicBool>) {
    let path = stream.path.clone();
    let outcome = read_stream(request, &mut stream, &mut listener, &active);

    if let Err(err) = outcome {
        if active.load(Ordering::Acquire) {
            warn!(path = %path, error = %err, "Realtime stream terminated");
            listener(SnapshotEvent::Error(err));
        }
    }
    debug!(path = %path, "stream thread exiting");
}

fn read_stream(
    request: RequestBuilder,
    stream: &mut StreamState,
    listener: &mut Listener,
    active: &AtomicBool,
) -> Result<(), StoreError> {
    let response = request.send().map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(error_for_status(status, &body));
    }

    let mut parser = SseParser::new();
    for line in BufReader::new(response).lines() {
        let line = line.map_err(|e| StoreError::Transport(format!("stream read failed: {}", e)))?;
        if !active.load(Ordering::Acquire) {
            return Ok(());
        }

        let Some(raw) = parser.feed_line(&line) else {
            continue;
        };
        let event = StreamEvent::decode(&raw)
            .map_err(|e| StoreError::Transport(format!("malformed {} event: {}", raw.event, e)))?;

        if let Some(snapshot) = stream.apply(event)? {
            if !active.load(Ordering::Acquire) {
                return Ok(());
            }
            listener(SnapshotEvent::Value(snapshot));
        }
    }

    Err(StoreError::Transport("stream closed by server".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sse::StreamPayload;
    use serde_json::json;

    fn store(auth: Option<&str>) -> RtdbStore {
        RtdbStore::connect(
            "https://life-tracker-demo.firebaseio.com/",
            auth.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn test_url_for_paths() {
        let store = store(None);
        assert_eq!(
            store.url_for(&path("todolist/")).unwrap().as_str(),
            "https://life-tracker-demo.firebaseio.com/todolist.json"
        );
        assert_eq!(
            store.url_for(&path("watertracker/2024-01-01")).unwrap().as_str(),
            "https://life-tracker-demo.firebaseio.com/watertracker/2024-01-01.json"
        );
        assert_eq!(
            store.url_for(&StorePath::root()).unwrap().as_str(),
            "https://life-tracker-demo.firebaseio.com/.json"
        );
    }

    #[test]
    fn test_url_for_escapes_and_adds_auth() {
        let store = store(Some("s3cr3t"));
        let url = store.url_for(&path("traveljournal/New York")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://life-tracker-demo.firebaseio.com/traveljournal/New%20York.json?auth=s3cr3t"
        );
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(matches!(
            RtdbStore::connect("not a url", None, Duration::from_secs(1)),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_error_for_status_mapping() {
        assert_eq!(
            error_for_status(StatusCode::UNAUTHORIZED, r#"{"error":"Permission denied"}"#),
            StoreError::PermissionDenied("Permission denied".to_string())
        );
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, r#"{"error":"Invalid path"}"#),
            StoreError::InvalidPath(_)
        ));
        assert_eq!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, "try later\n"),
            StoreError::Rejected {
                status: 503,
                message: "try later".to_string()
            }
        );
    }

    #[test]
    fn test_stream_state_put_and_patch() {
        let mut state = StreamState::new(path("todolist"), Arc::new(AtomicU64::new(0)));

        let initial = state
            .apply(StreamEvent::Put(StreamPayload {
                path: "/".to_string(),
                data: Value::Null,
            }))
            .unwrap()
            .unwrap();
        assert_eq!(initial.value, Value::Null);
        assert_eq!(initial.version, 1);

        state
            .apply(StreamEvent::Put(StreamPayload {
                path: "/k1".to_string(),
                data: json!({"name": "Run", "category": "Sport"}),
            }))
            .unwrap();
        let patched = state
            .apply(StreamEvent::Patch(StreamPayload {
                path: "/k1".to_string(),
                data: json!({"category": "Health"}),
            }))
            .unwrap()
            .unwrap();
        assert_eq!(patched.value, json!({"k1": {"name": "Run", "category": "Health"}}));

        let removed = state
            .apply(StreamEvent::Put(StreamPayload {
                path: "/k1".to_string(),
                data: Value::Null,
            }))
            .unwrap()
            .unwrap();
        assert_eq!(removed.value, Value::Null);
        assert_eq!(removed.version, 4);
    }

    #[test]
    fn test_stream_state_control_events() {
        let mut state = StreamState::new(path("booktracker"), Arc::new(AtomicU64::new(0)));
        assert_eq!(state.apply(StreamEvent::KeepAlive).unwrap(), None);
        assert_eq!(state.apply(StreamEvent::Unknown("rules_debug".to_string())).unwrap(), None);
        assert_eq!(
            state.apply(StreamEvent::Cancel("null".to_string())),
            Err(StoreError::PermissionDenied("read cancelled by security rules".to_string()))
        );
        assert!(matches!(
            state.apply(StreamEvent::AuthRevoked),
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(state
            .apply(StreamEvent::Patch(StreamPayload {
                path: "/".to_string(),
                data: json!(5),
            }))
            .is_err());
    }

    #[test]
    fn test_off_unknown_id_is_ignored() {
        let store = store(None);
        store.off(ListenerId(42));
    }
}
