//! Call correlation table
//!
//! Tracks outbound calls awaiting a CALLRESULT or CALLERROR. Each entry owns
//! the single-use completion slot for its waiter; whichever path removes the
//! entry (reply, deadline expiry, link close) is the only one able to
//! complete it.
//!
//! Deadlines live in one min-heap served by one reaper task instead of a
//! timer per call. Heap entries whose call already completed are skipped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::DeviceChannel;
use crate::error::OcppError;
use crate::ocpp::{Call, ErrorCode, Frame};
use crate::registry::ConnectionId;

type Completion = oneshot::Sender<Result<Value, OcppError>>;

/// Outbound call awaiting a reply
struct Outstanding {
    device_id: String,
    connection_id: ConnectionId,
    action: String,
    deadline: Instant,
    slot: Completion,
}

#[derive(Default)]
struct TableState {
    calls: HashMap<String, Outstanding>,
    deadlines: BinaryHeap<Reverse<(Instant, String)>>,
}

/// Shared table of outstanding outbound calls
pub struct CallTable {
    state: Mutex<TableState>,
    wake: Arc<Notify>,
}

/// Handle for one issued call
#[derive(Debug)]
pub struct CallHandle {
    call_id: String,
    rx: oneshot::Receiver<Result<Value, OcppError>>,
}

impl CallHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Wait for the reply, the deadline or the link closing
    pub async fn wait(self) -> Result<Value, OcppError> {
        match self.rx.await {
            Ok(result) => result,
            // slot dropped without completion: the table itself is gone
            Err(_) => Err(OcppError::ConnectionClosed),
        }
    }
}

impl CallTable {
    /// Create the table and spawn its deadline reaper.
    ///
    /// Must be called from within a tokio runtime. The reaper exits once the
    /// table is dropped.
    pub fn new() -> Arc<Self> {
        let wake = Arc::new(Notify::new());
        let table = Arc::new(Self {
            state: Mutex::new(TableState::default()),
            wake: wake.clone(),
        });

        tokio::spawn(reap(Arc::downgrade(&table), wake));
        table
    }

    /// Register an outstanding call and queue its CALL frame on `channel`
    pub async fn send_call(
        &self,
        channel: &DeviceChannel,
        device_id: &str,
        connection_id: ConnectionId,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<CallHandle, OcppError> {
        let call = Call::new(action, payload)?;
        let call_id = call.message_id.clone();
        let deadline = Instant::now() + timeout;
        let (slot, rx) = oneshot::channel();

        // registered before sending so a fast reply always finds its entry
        let earliest = {
            let mut state = self.state.lock();
            state.calls.insert(
                call_id.clone(),
                Outstanding {
                    device_id: device_id.to_string(),
                    connection_id,
                    action: action.to_string(),
                    deadline,
                    slot,
                },
            );
            let earliest = state
                .deadlines
                .peek()
                .map_or(true, |Reverse((next, _))| deadline < *next);
            state.deadlines.push(Reverse((deadline, call_id.clone())));
            earliest
        };
        if earliest {
            self.wake.notify_one();
        }

        debug!("Sending {} ({}) to {}", action, call_id, device_id);

        // a link that stops draining its queue must not hold the caller past the deadline
        let queued = match tokio::time::timeout_at(deadline, channel.send(Frame::Call(call))).await {
            Ok(sent) => sent,
            Err(_) => {
                warn!("Outbound queue of {} full, {} ({}) not sent", device_id, action, call_id);
                Err(OcppError::Timeout {
                    device_id: device_id.to_string(),
                    action: action.to_string(),
                })
            }
        };
        if let Err(e) = queued {
            self.state.lock().calls.remove(&call_id);
            return Err(e);
        }

        Ok(CallHandle { call_id, rx })
    }

    /// Fulfil the call with `payload`. Returns false for unknown or
    /// already-completed ids.
    pub fn complete_result(&self, call_id: &str, payload: Value) -> bool {
        let Some(call) = self.state.lock().calls.remove(call_id) else {
            return false;
        };
        debug!("{} ({}) answered by {}", call.action, call_id, call.device_id);
        let _ = call.slot.send(Ok(payload));
        true
    }

    /// Fail the call with the error the charge point reported
    pub fn complete_error(
        &self,
        call_id: &str,
        code: ErrorCode,
        description: String,
        details: Value,
    ) -> bool {
        let Some(call) = self.state.lock().calls.remove(call_id) else {
            return false;
        };
        warn!(
            "{} ({}) rejected by {}: {} - {}",
            call.action, call_id, call.device_id, code, description
        );
        let _ = call.slot.send(Err(OcppError::Remote {
            code,
            description,
            details,
        }));
        true
    }

    /// Fail every call issued on a link that has closed
    pub fn fail_connection(&self, connection_id: ConnectionId) -> usize {
        let failed: Vec<Outstanding> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state
                .calls
                .iter()
                .filter(|(_, call)| call.connection_id == connection_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| state.calls.remove(id)).collect()
        };

        let count = failed.len();
        for call in failed {
            debug!("Link closed with {} to {} outstanding", call.action, call.device_id);
            let _ = call.slot.send(Err(OcppError::ConnectionClosed));
        }
        count
    }

    /// Number of calls still awaiting a reply
    pub fn outstanding(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Expire every call whose deadline is at or before `now`; returns the
    /// next deadline still in the heap
    fn expire_due(&self, now: Instant) -> Option<Instant> {
        let (expired, next) = {
            let mut state = self.state.lock();
            let mut expired = Vec::new();

            while let Some(Reverse((deadline, _))) = state.deadlines.peek() {
                if *deadline > now {
                    break;
                }
                let Some(Reverse((deadline, call_id))) = state.deadlines.pop() else {
                    break;
                };
                let due = state
                    .calls
                    .get(&call_id)
                    .is_some_and(|call| call.deadline == deadline);
                if due {
                    if let Some(call) = state.calls.remove(&call_id) {
                        expired.push((call_id, call));
                    }
                }
            }

            let next = state.deadlines.peek().map(|Reverse((deadline, _))| *deadline);
            (expired, next)
        };

        for (call_id, call) in expired {
            warn!(
                "Timeout waiting for {} ({}) from {}",
                call.action, call_id, call.device_id
            );
            let _ = call.slot.send(Err(OcppError::Timeout {
                device_id: call.device_id,
                action: call.action,
            }));
        }

        next
    }
}

impl Drop for CallTable {
    fn drop(&mut self) {
        // let the reaper observe the table is gone
        self.wake.notify_one();
    }
}

async fn reap(table: Weak<CallTable>, wake: Arc<Notify>) {
    loop {
        let next = match table.upgrade() {
            Some(table) => table.expire_due(Instant::now()),
            None => break,
        };

        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Outbound;
    use crate::ocpp::CallError;
    use serde_json::json;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(8);

    async fn issue(
        table: &CallTable,
        channel: &DeviceChannel,
        rx: &mut mpsc::Receiver<Outbound>,
        timeout: Duration,
    ) -> CallHandle {
        let handle = table
            .send_call(channel, "CP1", 1, "Reset", json!({"type": "Soft"}), timeout)
            .await
            .unwrap();

        match rx.recv().await {
            Some(Outbound::Frame(Frame::Call(call))) => {
                assert_eq!(call.message_id, handle.call_id());
                assert_eq!(call.action, "Reset");
            }
            other => panic!("Expected queued Call, got {:?}", other),
        }
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_completes_call() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);
        let handle = issue(&table, &channel, &mut rx, TIMEOUT).await;

        assert_eq!(table.outstanding(), 1);
        assert!(table.complete_result(handle.call_id(), json!({"status": "Accepted"})));
        assert_eq!(table.outstanding(), 0);
        assert_eq!(handle.wait().await.unwrap(), json!({"status": "Accepted"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_completes_call() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);
        let handle = issue(&table, &channel, &mut rx, TIMEOUT).await;

        let id = handle.call_id().to_string();
        assert!(table.complete_error(&id, ErrorCode::NotSupported, "no".into(), json!({})));
        match handle.wait().await {
            Err(OcppError::Remote { code, description, .. }) => {
                assert_eq!(code, ErrorCode::NotSupported);
                assert_eq!(description, "no");
            }
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_reply_is_discarded() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);
        let handle = issue(&table, &channel, &mut rx, TIMEOUT).await;
        let id = handle.call_id().to_string();

        let result = handle.wait().await;
        assert!(matches!(result, Err(OcppError::Timeout { .. })));
        assert_eq!(table.outstanding(), 0);

        assert!(!table.complete_result(&id, json!({})));
        assert!(!table.complete_error(&id, ErrorCode::GenericError, String::new(), json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_then_deadline_does_nothing() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);
        let handle = issue(&table, &channel, &mut rx, Duration::from_millis(100)).await;

        assert!(table.complete_result(handle.call_id(), json!(1)));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.wait().await.unwrap(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_deadline_wakes_reaper() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);

        let slow = issue(&table, &channel, &mut rx, Duration::from_secs(60)).await;
        let fast = issue(&table, &channel, &mut rx, Duration::from_secs(1)).await;

        let started = Instant::now();
        assert!(matches!(fast.wait().await, Err(OcppError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(table.outstanding(), 1);

        assert!(table.complete_result(slow.call_id(), json!({})));
        assert!(slow.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_channel_leaves_no_entry() {
        let table = CallTable::new();
        let (channel, rx) = DeviceChannel::new(8);
        drop(rx);

        let result = table
            .send_call(&channel, "CP1", 1, "Reset", json!({}), TIMEOUT)
            .await;
        assert!(matches!(result, Err(OcppError::ConnectionClosed)));
        assert_eq!(table.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out_at_deadline() {
        let table = CallTable::new();
        let (channel, _rx) = DeviceChannel::new(1);
        channel
            .send(Frame::CallError(CallError::new("filler", ErrorCode::GenericError, "")))
            .await
            .unwrap();

        let started = Instant::now();
        let result = table
            .send_call(&channel, "CP2", 1, "Reset", json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(OcppError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(table.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_connection() {
        let table = CallTable::new();
        let (channel, mut rx) = DeviceChannel::new(8);
        let handle = issue(&table, &channel, &mut rx, TIMEOUT).await;

        assert_eq!(table.fail_connection(2), 0);
        assert_eq!(table.fail_connection(1), 1);
        assert!(matches!(handle.wait().await, Err(OcppError::ConnectionClosed)));
    }
}
