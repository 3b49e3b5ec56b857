use std::sync::Arc;

use uuid::Uuid;

use super::types::ServerState;
use crate::outbound::{OutboundMessage, OutboundQueue};
use crate::work::WorkStatus;

/// Emits progress for the work item driving an operation, plus state changes.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    outbound: Arc<OutboundQueue>,
    work_id: Option<Uuid>,
}

impl StatusReporter {
    pub fn new(outbound: Arc<OutboundQueue>, work_id: Option<Uuid>) -> Self {
        Self { outbound, work_id }
    }

    /// A reporter not tied to any work item (background refreshes).
    pub fn detached(outbound: Arc<OutboundQueue>) -> Self {
        Self::new(outbound, None)
    }

    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        if let Some(work_id) = self.work_id {
            self.outbound.push(OutboundMessage::work_status(
                work_id,
                WorkStatus::InProgress,
                message,
            ));
        }
    }

    pub fn server_state(&self, server_id: Uuid, state: ServerState) {
        log::info!("Game server {} is now {}", server_id, state.name());
        self.outbound
            .push(OutboundMessage::server_state(server_id, state));
    }
}
