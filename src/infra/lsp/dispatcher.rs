//! Request Dispatcher
//!
//! Allocates request ids, keeps one completion slot per in-flight request and
//! resolves it when the reader task hands over the matching response. All
//! writes to the server go through the single writer lock held here.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex as AsyncMutex, Notify, oneshot};
use tokio::time::{Instant, timeout, timeout_at};

use super::framer::{BoxedWriter, FrameWriter};
use super::protocol::{Message, Notification, Request, RequestId, Response};
use crate::error::LspError;

type Completion = oneshot::Sender<Result<Value, LspError>>;

/// Bound for notifications and replies when none is given
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRequest {
    method: String,
    created_at: Instant,
    deadline: Instant,
    slot: Completion,
}

enum WriteError {
    /// Lock wait or frame write ran past the deadline
    Deadline,
    /// The writer was detached while waiting
    Detached,
    Failed(LspError),
}

pub struct Dispatcher {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    writer: AsyncMutex<Option<FrameWriter>>,
    write_timeout: Duration,
    /// Wakes writers stalled on a full pipe when the writer is detached
    detached: Notify,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    /// `write_timeout` bounds notifications, replies and closing stdin
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            writer: AsyncMutex::new(None),
            write_timeout,
            detached: Notify::new(),
        }
    }

    /// Route writes to a new server stdin
    pub async fn attach(&self, writer: BoxedWriter) {
        *self.writer.lock().await = Some(FrameWriter::new(writer));
    }

    /// Close and drop the current stdin; later writes fail with NotRunning.
    /// Writers blocked on a full pipe give up first.
    pub async fn detach(&self) {
        self.detached.notify_waiters();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match timeout(self.write_timeout, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Closing server stdin: {}", e),
                Err(_) => tracing::debug!("Closing server stdin timed out"),
            }
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Send a request and wait for its response, the deadline, or teardown.
    ///
    /// The deadline covers waiting for the writer, writing the frame and
    /// waiting for the response. The id is allocated under the writer lock,
    /// so ids reach the wire in strictly increasing order. A timed-out
    /// request is forgotten locally; nothing is sent to the server.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, LspError> {
        let deadline = Instant::now() + timeout;
        let detached = self.detached.notified();
        tokio::pin!(detached);

        let mut guard = match self.lock_writer(deadline, detached.as_mut()).await {
            Ok(guard) => guard,
            Err(WriteError::Deadline) => {
                tracing::warn!("LSP request {} gave up waiting for the writer", method);
                return Err(timed_out(method, None, timeout));
            }
            Err(_) => return Err(LspError::closed(method)),
        };
        if guard.is_none() {
            return Err(LspError::NotRunning);
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending_map().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                deadline,
                slot: tx,
            },
        );

        tracing::debug!("LSP request {}: {}", id, method);
        let message = Message::Request(Request::new(id, method, params));
        let written = write_frame(&mut guard, &message, deadline, detached.as_mut()).await;
        drop(guard);
        match written {
            Ok(()) => {}
            Err(WriteError::Deadline) => {
                self.pending_map().remove(&id);
                tracing::warn!("LSP request {} ({}) stalled writing to the server", id, method);
                return Err(timed_out(method, Some(id), timeout));
            }
            Err(WriteError::Detached) => {
                self.pending_map().remove(&id);
                return Err(LspError::closed(method));
            }
            Err(WriteError::Failed(e)) => {
                self.pending_map().remove(&id);
                tracing::warn!("Writing request {} ({}) failed: {}", id, method, e);
                return Err(LspError::closed(method));
            }
        }

        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LspError::closed(method)),
            Err(_) => {
                self.pending_map().remove(&id);
                tracing::warn!(
                    "LSP request {} ({}) timed out after {}ms",
                    id,
                    method,
                    timeout.as_millis()
                );
                Err(timed_out(method, Some(id), timeout))
            }
        }
    }

    /// Send a notification; returns once the frame is written
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        self.notify_within(method, params, self.write_timeout).await
    }

    pub async fn notify_within(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<(), LspError> {
        tracing::debug!("LSP notification: {}", method);
        self.write(method, &Notification::new(method, params).into(), limit)
            .await
    }

    /// Answer a server-initiated request
    pub async fn reply(&self, response: Response) -> Result<(), LspError> {
        self.write("reply", &response.into(), self.write_timeout)
            .await
    }

    async fn write(&self, label: &str, message: &Message, limit: Duration) -> Result<(), LspError> {
        let deadline = Instant::now() + limit;
        let detached = self.detached.notified();
        tokio::pin!(detached);

        let mut guard = match self.lock_writer(deadline, detached.as_mut()).await {
            Ok(guard) => guard,
            Err(WriteError::Deadline) => return Err(timed_out(label, None, limit)),
            Err(_) => return Err(LspError::NotRunning),
        };
        match write_frame(&mut guard, message, deadline, detached.as_mut()).await {
            Ok(()) => Ok(()),
            Err(WriteError::Deadline) => {
                tracing::warn!("LSP {} stalled writing to the server", label);
                Err(timed_out(label, None, limit))
            }
            Err(WriteError::Detached) => Err(LspError::NotRunning),
            Err(WriteError::Failed(e)) => Err(e),
        }
    }

    async fn lock_writer(
        &self,
        deadline: Instant,
        detached: Pin<&mut Notified<'_>>,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<FrameWriter>>, WriteError> {
        tokio::select! {
            biased;
            _ = detached => Err(WriteError::Detached),
            guard = timeout_at(deadline, self.writer.lock()) => guard.map_err(|_| WriteError::Deadline),
        }
    }

    /// Hand a response to its waiting caller. Called only by the reader task.
    pub fn resolve(&self, response: Response) {
        let Some(id) = response.id.as_ref().and_then(RequestId::as_number) else {
            tracing::warn!("Discarding response with unusable id {:?}", response.id);
            return;
        };

        let Some(pending) = self.pending_map().remove(&id) else {
            tracing::warn!(
                "Discarding response for unknown request id {} (timed out or never sent)",
                id
            );
            return;
        };

        let now = Instant::now();
        tracing::debug!(
            "LSP response {} ({}) after {}ms",
            id,
            pending.method,
            now.duration_since(pending.created_at).as_millis()
        );
        if now > pending.deadline {
            tracing::debug!("Response {} arrived past its deadline", id);
        }

        let result = response.into_result().map_err(|err| {
            tracing::warn!(
                "LSP request {} ({}) failed: {}",
                id,
                pending.method,
                err
            );
            LspError::from(err)
        });
        // The caller may have stopped waiting; nothing to do then.
        let _ = pending.slot.send(result);
    }

    /// Fail every in-flight request with ConnectionClosed. Returns the count.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending_map().drain().collect();
        if !drained.is_empty() {
            tracing::debug!("Cancelling {} pending requests: {}", drained.len(), reason);
        }
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!("Request {} ({}) closed: {}", id, pending.method, reason);
            let _ = pending.slot.send(Err(LspError::closed(&pending.method)));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending_map().len()
    }

    /// Ids and methods still waiting, oldest id first
    pub fn in_flight(&self) -> Vec<(u64, String)> {
        let mut items: Vec<_> = self
            .pending_map()
            .iter()
            .map(|(id, p)| (*id, p.method.clone()))
            .collect();
        items.sort_by_key(|(id, _)| *id);
        items
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write one frame, giving up at `deadline` or on detach. A frame cut off
/// mid-write leaves the stream unusable, so the writer is dropped then.
async fn write_frame(
    slot: &mut Option<FrameWriter>,
    message: &Message,
    deadline: Instant,
    detached: Pin<&mut Notified<'_>>,
) -> Result<(), WriteError> {
    let Some(writer) = slot.as_mut() else {
        return Err(WriteError::Failed(LspError::NotRunning));
    };
    let outcome = tokio::select! {
        biased;
        _ = detached => None,
        written = timeout_at(deadline, writer.write_message(message)) => Some(written),
    };
    match outcome {
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => Err(WriteError::Failed(e)),
        Some(Err(_)) => {
            *slot = None;
            Err(WriteError::Deadline)
        }
        None => {
            *slot = None;
            Err(WriteError::Detached)
        }
    }
}

fn timed_out(method: &str, id: Option<u64>, after: Duration) -> LspError {
    LspError::Timeout {
        method: method.to_string(),
        id,
        after,
    }
}
