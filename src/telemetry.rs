//! Host resource poller feeding check-ins into the outbound queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sysinfo::{Networks, System};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::outbound::{HostCheckIn, OutboundMessage, OutboundQueue};
use crate::pacer::{IntervalPacer, Shutdown};

/// Keeps the `sysinfo` handles between samples so CPU and network deltas work.
pub struct HostSampler {
    system: System,
    networks: Networks,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Take one sample. CPU usage and network deltas are relative to the previous call.
    pub fn sample(&mut self) -> HostCheckIn {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let total = self.system.total_memory();
        let ram_usage = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        let (network_in_bytes, network_out_bytes) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });

        HostCheckIn {
            timestamp: Utc::now(),
            cpu_usage: self.system.global_cpu_usage(),
            ram_usage,
            uptime: System::uptime(),
            network_in_bytes,
            network_out_bytes,
        }
    }
}

struct PollerState {
    sampler: Mutex<HostSampler>,
    latest: Mutex<Option<HostCheckIn>>,
    last_sample_at: Mutex<Option<Instant>>,
}

impl PollerState {
    fn record(&self, check_in: &HostCheckIn) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(check_in.clone());
        *self.last_sample_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    fn take_sample(&self) -> HostCheckIn {
        let check_in = self
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sample();
        self.record(&check_in);
        check_in
    }
}

/// Background sampler of CPU, RAM, network and uptime.
pub struct ResourcePoller {
    outbound: Arc<OutboundQueue>,
    interval: Duration,
    state: Arc<PollerState>,
    task: Mutex<Option<(JoinHandle<()>, Instant)>>,
}

impl ResourcePoller {
    pub fn new(outbound: Arc<OutboundQueue>, interval: Duration) -> Self {
        Self {
            outbound,
            interval,
            state: Arc::new(PollerState {
                sampler: Mutex::new(HostSampler::new()),
                latest: Mutex::new(None),
                last_sample_at: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the sampling loop, replacing any previous one.
    pub fn start(&self, shutdown: Shutdown) {
        let state = Arc::clone(&self.state);
        let outbound = Arc::clone(&self.outbound);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut shutdown = shutdown;
            let mut pacer = IntervalPacer::new(interval);
            loop {
                let check_in = state.take_sample();
                log::debug!(
                    "Host sample: cpu {:.1}% ram {:.1}% up {}s",
                    check_in.cpu_usage,
                    check_in.ram_usage,
                    check_in.uptime
                );
                outbound.push(OutboundMessage::CheckIn(check_in));
                if !pacer.pace(&mut shutdown).await {
                    break;
                }
            }
            log::info!("Resource poller stopped");
        });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace((handle, Instant::now()));
        if let Some((old, _)) = previous {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some((handle, _)) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    pub fn latest(&self) -> Option<HostCheckIn> {
        self.state
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sample immediately outside the loop and queue the result.
    pub fn sample_now(&self) -> HostCheckIn {
        let check_in = self.state.take_sample();
        self.outbound.push(OutboundMessage::CheckIn(check_in.clone()));
        check_in
    }

    /// True when the loop is gone or has not produced a sample within `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        let Some((handle, started_at)) = task.as_ref() else {
            return true;
        };
        if handle.is_finished() {
            return true;
        }
        let last = self
            .state
            .last_sample_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map_or(*started_at, |at| at.max(*started_at));
        last.elapsed() > threshold
    }

    /// Restart the loop if it went stale. Returns whether it was restarted.
    pub fn ensure_running(&self, threshold: Duration, shutdown: &Shutdown) -> bool {
        if shutdown.is_triggered() || !self.is_stale(threshold) {
            return false;
        }
        log::warn!(
            "Resource poller has not sampled for over {}s, restarting it",
            threshold.as_secs()
        );
        self.start(shutdown.clone());
        true
    }
}

impl Drop for ResourcePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{HostSampler, ResourcePoller};
    use crate::outbound::{OutboundMessage, OutboundQueue};
    use crate::pacer::shutdown_channel;

    #[test]
    fn sample_reads_host_metrics() {
        let mut sampler = HostSampler::new();
        let check_in = sampler.sample();
        assert!(check_in.ram_usage > 0.0 && check_in.ram_usage <= 100.0);
    }

    #[tokio::test]
    async fn loop_queues_check_ins() {
        let outbound = Arc::new(OutboundQueue::new());
        let poller = ResourcePoller::new(Arc::clone(&outbound), Duration::from_millis(10));
        let (trigger, shutdown) = shutdown_channel();
        poller.start(shutdown);

        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.trigger();

        let check_ins = outbound
            .snapshot()
            .into_iter()
            .filter(|m| matches!(m.message, OutboundMessage::CheckIn(_)))
            .count();
        assert!(check_ins >= 2, "got {check_ins} check-ins");
        assert!(poller.latest().is_some());
    }

    #[tokio::test]
    async fn stale_poller_is_restarted() {
        let outbound = Arc::new(OutboundQueue::new());
        let poller = ResourcePoller::new(Arc::clone(&outbound), Duration::from_millis(10));
        let (_trigger, shutdown) = shutdown_channel();

        assert!(poller.is_stale(Duration::from_secs(20)));
        assert!(poller.ensure_running(Duration::from_secs(20), &shutdown));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!poller.is_stale(Duration::from_secs(20)));
        assert!(!poller.ensure_running(Duration::from_secs(20), &shutdown));

        poller.stop();
        assert!(poller.is_stale(Duration::from_secs(20)));
    }
}
