// ── RPC socket transport ──
//
// Newline-delimited JSON over a unix socket. Outbound requests carry a
// monotonically increasing request id; the reader task matches inbound
// replies by id and hands anything with an event id to the event
// dispatcher. A request id is reserved in the correlation map before
// the bytes hit the wire, so a fast reply can never race its waiter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{oneshot, Mutex};

use bluetide_core::bus::EventKind;
use bluetide_core::{Error, Result};

/// Outbound request frame.
#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    command: &'a [String],
    request_id: u64,
}

/// Structured error a failed command carries.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WireError {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Error::MethodCall {
            name: err.name,
            description: err.description,
            metadata: err.metadata,
        }
    }
}

/// Any inbound line: either a command reply (`request_id` set) or an
/// event (`event_id` > 0).
#[derive(Debug, Deserialize)]
pub(crate) struct InboundFrame {
    #[serde(default)]
    pub request_id: u64,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub data: Option<serde_json::Value>,

    #[serde(default)]
    pub error: Option<WireError>,

    #[serde(default)]
    pub event_id: u8,

    #[serde(default)]
    pub event_action: Option<EventKind>,

    #[serde(default)]
    pub event: Option<serde_json::Value>,
}

impl InboundFrame {
    pub(crate) fn is_event(&self) -> bool {
        self.event_id > 0
    }
}

/// The reply handed to a request's waiter.
#[derive(Debug)]
pub(crate) enum ReplyOutcome {
    Ok(serde_json::Value),
    Err(Error),
}

/// Correlated request/response channel over the daemon socket.
pub(crate) struct RpcTransport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: DashMap<u64, oneshot::Sender<ReplyOutcome>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RpcTransport {
    pub(crate) fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a command and await its correlated reply.
    pub(crate) async fn execute(
        &self,
        tokens: &[String],
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if self.is_closed() {
            return Err(Error::SessionNotExist);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let frame = RequestFrame {
            command: tokens,
            request_id: id,
        };
        let mut line = serde_json::to_vec(&frame)
            .map_err(|err| Error::event_parse(format!("encode request: {err}")))?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                self.pending.remove(&id);
                return Err(Error::SessionStopped);
            };

            if let Err(err) = writer.write_all(&line).await {
                self.pending.remove(&id);
                return Err(Error::Io(err));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ReplyOutcome::Ok(value))) => Ok(value),
            Ok(Ok(ReplyOutcome::Err(err))) => Err(err),
            // Sender dropped: the reader tore the session down.
            Ok(Err(_)) => Err(Error::SessionStopped),
            Err(_) => {
                // Forget the waiter; a late reply for this id is
                // discarded by `complete`.
                self.pending.remove(&id);
                Err(Error::MethodTimeout)
            }
        }
    }

    /// Hand a command reply to its waiter. Unknown (late or abandoned)
    /// ids are discarded.
    pub(crate) fn complete(&self, frame: InboundFrame) {
        let Some((_, tx)) = self.pending.remove(&frame.request_id) else {
            tracing::debug!(request_id = frame.request_id, "discarding unmatched reply");
            return;
        };

        let outcome = match frame.status.as_str() {
            "ok" => ReplyOutcome::Ok(frame.data.unwrap_or(serde_json::Value::Null)),
            _ => ReplyOutcome::Err(
                frame
                    .error
                    .map(Error::from)
                    .unwrap_or_else(|| Error::method_call("unknown", "command failed")),
            ),
        };

        let _ = tx.send(outcome);
    }

    /// Tear the channel down: every in-flight waiter completes with
    /// `session-stopped`, later requests fail fast.
    pub(crate) async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        // Dropping the senders completes every pending receiver with a
        // channel-closed error, observed as `session-stopped`.
        self.pending.clear();
    }
}
