use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{StreamingTransport, TransportError, TransportEvent, MESSAGE_DATA_FIELD};

/// Scriptable transport for tests: records connect/disconnect calls and
/// lets the test inject events into the active connection.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    sender: Option<mpsc::UnboundedSender<TransportEvent>>,
    connects: Vec<(String, Vec<String>)>,
    disconnects: usize,
    failures_to_serve: usize,
    reject_connects: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connect calls fail with a retryable error.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failures_to_serve = count;
    }

    /// Makes every subsequent connect call fail terminally.
    pub fn reject_connects(&self) {
        self.state.lock().reject_connects = true;
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Token and channels of the most recent connect call.
    pub fn last_connect(&self) -> Option<(String, Vec<String>)> {
        self.state.lock().connects.last().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Injects an event into the active connection. Returns false when no
    /// connection is up or the receiver is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let guard = self.state.lock();
        match &guard.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Injects a message event whose `data` field is `json`.
    pub fn emit_message(&self, json: &str) -> bool {
        let mut fields = HashMap::new();
        fields.insert(MESSAGE_DATA_FIELD.to_string(), json.to_string());
        self.emit(TransportEvent::Message(fields))
    }
}

#[async_trait]
impl StreamingTransport for MockTransport {
    async fn connect(
        &self,
        token: &str,
        channels: &[String],
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut guard = self.state.lock();
        guard.connects.push((token.to_string(), channels.to_vec()));
        if guard.reject_connects {
            return Err(TransportError::Rejected);
        }
        if guard.failures_to_serve > 0 {
            guard.failures_to_serve -= 1;
            return Err(TransportError::Connect("mock connect failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Opened);
        guard.sender = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        let mut guard = self.state.lock();
        guard.disconnects += 1;
        guard.sender = None;
    }
}
