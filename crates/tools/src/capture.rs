//! Long-lived event captures.
//!
//! A capture subscribes to a handful of CDP events on one session and keeps
//! the last `capacity` mapped entries. It lives until stopped or until the
//! session goes away (see [`crate::cleanup`]); the handles are kept so
//! stopping is exact. All methods of one capture share a single queue, so
//! entries are stored in wire order and a mapper sees e.g. a socket's
//! creation before its frames.

use cdp::{CdpClient, CdpEvent, SessionId, SubscriptionHandle};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::cleanup::SessionScoped;

/// Maps one event to a stored entry; `None` skips the event.
pub type EntryMapper = Arc<dyn Fn(&CdpEvent) -> Option<Value> + Send + Sync>;

/// Bounded ring of captured entries.
pub struct CaptureBuffer {
    entries: Mutex<VecDeque<Value>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, entry: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    /// Up to `limit` most recent entries passing `filter`, oldest first.
    pub fn recent(&self, limit: usize, filter: impl Fn(&Value) -> bool) -> Vec<Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut picked: Vec<Value> = entries
            .iter()
            .rev()
            .filter(|e| filter(e))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct ActiveCapture {
    handles: Vec<SubscriptionHandle>,
    buffer: Arc<CaptureBuffer>,
    started_at: SystemTime,
}

/// Captures of one kind (console, websocket, ...), keyed by session.
pub struct Captures {
    kind: &'static str,
    capacity: usize,
    active: DashMap<SessionId, ActiveCapture>,
}

impl Captures {
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            active: DashMap::new(),
        }
    }

    /// Subscribe `methods` on `session_id`. Returns `false` if a capture was
    /// already running there (it is left untouched).
    pub fn start(
        &self,
        client: &CdpClient,
        session_id: &str,
        methods: &[&str],
        mapper: EntryMapper,
    ) -> bool {
        if self.active.contains_key(session_id) {
            return false;
        }

        let buffer = Arc::new(CaptureBuffer::new(self.capacity));
        let sink = buffer.clone();
        let handles = client.on_many(
            methods,
            Some(session_id.to_string()),
            Arc::new(move |event: CdpEvent| {
                if let Some(entry) = mapper(&event) {
                    sink.push(entry);
                }
            }),
        );

        tracing::info!("Started {} capture on session {}", self.kind, session_id);
        self.active.insert(
            session_id.to_string(),
            ActiveCapture {
                handles,
                buffer,
                started_at: SystemTime::now(),
            },
        );
        true
    }

    /// Unsubscribe and drop the buffer. Returns how many entries it held, or
    /// `None` if nothing was running.
    pub fn stop(&self, client: &CdpClient, session_id: &str) -> Option<usize> {
        let (_, capture) = self.active.remove(session_id)?;
        for handle in &capture.handles {
            client.off(handle);
        }
        tracing::info!("Stopped {} capture on session {}", self.kind, session_id);
        Some(capture.buffer.len())
    }

    pub fn buffer(&self, session_id: &str) -> Option<Arc<CaptureBuffer>> {
        self.active.get(session_id).map(|c| c.buffer.clone())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Status block shared by every `*_start_capture` / `*_get_*` tool.
    pub fn status(&self, session_id: &str) -> Value {
        match self.active.get(session_id) {
            Some(capture) => json!({
                "capturing": true,
                "sessionId": session_id,
                "buffered": capture.buffer.len(),
                "dropped": capture.buffer.dropped(),
                "capacity": self.capacity,
                "startedAt": epoch_millis(capture.started_at),
            }),
            None => json!({ "capturing": false, "sessionId": session_id }),
        }
    }
}

impl SessionScoped for Captures {
    fn forget_session(&self, session_id: &str) {
        if self.active.remove(session_id).is_some() {
            tracing::info!("Dropped {} capture of closed session {}", self.kind, session_id);
        }
    }

    fn held_sessions(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }
}

pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
