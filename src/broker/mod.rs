//! Agent side of the control-server conversation.
//!
//! Each tick: check reachability (confirming registration on a down-to-up edge),
//! pull new work into the queue, then drain the outbound retry queue.

mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::outbound::{
    HostCheckIn, OutboundMessage, OutboundQueue, ServerStateReport, WorkStatusUpdate,
};
use crate::pacer::{IntervalPacer, Shutdown};
use crate::work::{WorkItem, WorkQueue};

pub use http::HttpControlPlane;

/// Calls the agent makes against the control server.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn confirm_registration(&self) -> Result<()>;
    async fn fetch_work(&self) -> Result<Vec<WorkItem>>;
    async fn send_work_status(&self, update: &WorkStatusUpdate) -> Result<()>;
    async fn send_check_in(&self, check_in: &HostCheckIn) -> Result<()>;
    async fn send_server_state(&self, report: &ServerStateReport) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub queue_max_per_run: usize,
    pub max_queue_attempts: u32,
    pub drop_empty_checkins: bool,
}

impl From<&AgentConfig> for BrokerSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            queue_max_per_run: config.queue_max_per_run,
            max_queue_attempts: config.max_queue_attempts,
            drop_empty_checkins: config.drop_empty_checkins,
        }
    }
}

/// Outcome of one outbound drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub retried: usize,
    pub dropped: usize,
    pub filtered: usize,
}

pub struct CommunicationBroker {
    control: Arc<dyn ControlPlane>,
    work: Arc<WorkQueue>,
    outbound: Arc<OutboundQueue>,
    settings: BrokerSettings,
    server_up: AtomicBool,
    registered: AtomicBool,
}

impl CommunicationBroker {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        work: Arc<WorkQueue>,
        outbound: Arc<OutboundQueue>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            control,
            work,
            outbound,
            settings,
            server_up: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Ping the control server; confirm registration when it just came up or never was.
    pub async fn validate_server_status(&self) -> bool {
        let up = match self.control.ping().await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Control server unreachable: {}", e);
                false
            }
        };
        let was_up = self.server_up.swap(up, Ordering::SeqCst);
        if up && !was_up {
            log::info!("Control server is reachable");
        } else if !up && was_up {
            log::warn!("Lost connection to the control server");
        }

        if up && (!was_up || !self.is_registered()) {
            match self.control.confirm_registration().await {
                Ok(()) => {
                    if !self.registered.swap(true, Ordering::SeqCst) {
                        log::info!("Host registration confirmed");
                    }
                }
                Err(e) => {
                    self.registered.store(false, Ordering::SeqCst);
                    log::warn!("Host registration failed: {}", e);
                }
            }
        }
        up
    }

    /// Pull pending work and enqueue it. Returns the number of newly queued items.
    pub async fn fetch_work(&self) -> Result<usize> {
        let items = self.control.fetch_work().await?;
        let fetched = items.len();
        let queued = items
            .into_iter()
            .filter(|item| self.work.enqueue(item.clone()))
            .count();
        if fetched > 0 {
            log::info!("Fetched {} work item(s), {} new", fetched, queued);
        }
        Ok(queued)
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        match message {
            OutboundMessage::WorkStatus(update) => self.control.send_work_status(update).await,
            OutboundMessage::CheckIn(check_in) => self.control.send_check_in(check_in).await,
            OutboundMessage::ServerState(report) => self.control.send_server_state(report).await,
        }
    }

    /// Send up to `queue_max_per_run` queued messages, re-queueing failures until
    /// they reach `max_queue_attempts`.
    pub async fn send_out_queue(&self) -> DrainReport {
        let mut report = DrainReport::default();
        for mut pending in self.outbound.take_batch(self.settings.queue_max_per_run) {
            if self.settings.drop_empty_checkins {
                if let OutboundMessage::CheckIn(check_in) = &pending.message {
                    if check_in.is_empty() {
                        report.filtered += 1;
                        continue;
                    }
                }
            }

            match self.deliver(&pending.message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    pending.attempt_count += 1;
                    if pending.attempt_count >= self.settings.max_queue_attempts {
                        log::warn!("Dropping {} after error: {}", pending.describe(), e);
                        report.dropped += 1;
                    } else {
                        log::debug!("Delivery of {} failed: {}", pending.describe(), e);
                        self.outbound.push_retry(pending);
                        report.retried += 1;
                    }
                }
            }
        }
        report
    }

    /// One broker cycle. Nothing is drained while the server is down or the host unregistered.
    pub async fn tick(&self) {
        if !self.validate_server_status().await || !self.is_registered() {
            return;
        }
        if let Err(e) = self.fetch_work().await {
            log::warn!("Failed to fetch work: {}", e);
        }
        let report = self.send_out_queue().await;
        if report.retried > 0 || report.dropped > 0 {
            log::warn!(
                "Outbound drain: {} sent, {} retried, {} dropped",
                report.sent,
                report.retried,
                report.dropped
            );
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: Shutdown) {
        let mut pacer = IntervalPacer::new(interval);
        loop {
            self.tick().await;
            if !pacer.pace(&mut shutdown).await {
                break;
            }
        }
        log::info!("Communication broker stopped");
    }

    /// Best-effort final drain used during shutdown.
    pub async fn flush(&self) -> DrainReport {
        if self.server_up.load(Ordering::SeqCst) && self.is_registered() {
            self.send_out_queue().await
        } else {
            DrainReport::default()
        }
    }
}
