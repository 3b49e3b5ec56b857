//! Reports waiting to be delivered to the control server.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::ServerState;
use crate::work::WorkStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatusUpdate {
    pub work_id: Uuid,
    pub status: WorkStatus,
    pub message: String,
}

/// One host resource sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCheckIn {
    pub timestamp: DateTime<Utc>,
    /// Percent across all cores.
    pub cpu_usage: f32,
    /// Percent of total memory in use.
    pub ram_usage: f32,
    /// Host uptime in seconds.
    pub uptime: u64,
    /// Bytes received since the previous sample.
    pub network_in_bytes: u64,
    /// Bytes sent since the previous sample.
    pub network_out_bytes: u64,
}

impl HostCheckIn {
    /// True when every metric reads zero, which happens on the poller's first pass.
    pub fn is_empty(&self) -> bool {
        self.cpu_usage == 0.0
            && self.ram_usage == 0.0
            && self.uptime == 0
            && self.network_in_bytes == 0
            && self.network_out_bytes == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStateReport {
    pub server_id: Uuid,
    pub state: ServerState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
pub enum OutboundMessage {
    WorkStatus(WorkStatusUpdate),
    CheckIn(HostCheckIn),
    ServerState(ServerStateReport),
}

impl OutboundMessage {
    pub fn work_status(work_id: Uuid, status: WorkStatus, message: impl Into<String>) -> Self {
        Self::WorkStatus(WorkStatusUpdate {
            work_id,
            status,
            message: message.into(),
        })
    }

    pub fn server_state(server_id: Uuid, state: ServerState) -> Self {
        Self::ServerState(ServerStateReport {
            server_id,
            state,
            timestamp: Utc::now(),
        })
    }

    fn describe(&self) -> String {
        match self {
            Self::WorkStatus(update) => format!("work status {} {:?}", update.work_id, update.status),
            Self::CheckIn(check_in) => format!("check-in {}", check_in.timestamp),
            Self::ServerState(report) => format!("server state {} {:?}", report.server_id, report.state),
        }
    }
}

/// An outbound message plus the number of failed delivery attempts so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryableOutboundMessage {
    pub message: OutboundMessage,
    #[serde(default)]
    pub attempt_count: u32,
}

impl RetryableOutboundMessage {
    pub fn new(message: OutboundMessage) -> Self {
        Self {
            message,
            attempt_count: 0,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} (attempt {})", self.message.describe(), self.attempt_count)
    }
}

/// FIFO of reports shared by the work queue, lifecycle engine, poller and broker.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: Mutex<VecDeque<RetryableOutboundMessage>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: OutboundMessage) {
        self.push_retry(RetryableOutboundMessage::new(message));
    }

    /// Re-enqueue a message at the back, keeping its attempt count.
    pub fn push_retry(&self, message: RetryableOutboundMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
    }

    /// Take up to `max` messages from the front.
    pub fn take_batch(&self, max: usize) -> Vec<RetryableOutboundMessage> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let count = max.min(messages.len());
        messages.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the queued messages, front first.
    pub fn snapshot(&self) -> Vec<RetryableOutboundMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{HostCheckIn, OutboundMessage, OutboundQueue, RetryableOutboundMessage};
    use crate::work::WorkStatus;

    #[test]
    fn batches_come_off_the_front() {
        let queue = OutboundQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.push(OutboundMessage::work_status(*id, WorkStatus::PickedUp, ""));
        }

        let batch = queue.take_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch[0].message,
            OutboundMessage::work_status(ids[0], WorkStatus::PickedUp, "")
        );
        assert_eq!(queue.len(), 1);

        queue.push_retry(RetryableOutboundMessage {
            attempt_count: 3,
            ..batch[0].clone()
        });
        let rest = queue.take_batch(10);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].attempt_count, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_check_in_detection() {
        let mut check_in = HostCheckIn {
            timestamp: Utc::now(),
            cpu_usage: 0.0,
            ram_usage: 0.0,
            uptime: 0,
            network_in_bytes: 0,
            network_out_bytes: 0,
        };
        assert!(check_in.is_empty());
        check_in.uptime = 12;
        assert!(!check_in.is_empty());
    }

    #[test]
    fn messages_are_tagged_on_the_wire() {
        let id = Uuid::new_v4();
        let json =
            serde_json::to_value(OutboundMessage::work_status(id, WorkStatus::Completed, "done"))
                .unwrap();
        assert_eq!(json["kind"], "WorkStatus");
        assert_eq!(json["body"]["status"], "Completed");
        assert_eq!(json["body"]["workId"], id.to_string());
    }
}
