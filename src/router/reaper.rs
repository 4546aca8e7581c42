//! Single periodic task: per-second rate deltas, idle-mailbox eviction,
//! stale-message trims, debug snapshot publication.

use crate::router::registry::{DebugSnapshot, MailboxRegistry, Traffic, TrafficRates};
use crate::types::{REAPER_TICK_MS, RouterConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodic coroutine over the registry. One task, 50 ms tick; stats and
/// eviction each fire on their own one-second cadence. Worst-case stop
/// latency is one tick.
pub struct StatsReaper {
    registry: Arc<MailboxRegistry>,
    idle: Duration,
    stale: Duration,
    stopping: Arc<AtomicBool>,
}

impl StatsReaper {
    pub fn new(registry: Arc<MailboxRegistry>, config: &RouterConfig, stopping: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            idle: Duration::from_secs(config.idle_evict_secs),
            stale: Duration::from_secs(config.stale_message_age_secs),
            stopping,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_millis(REAPER_TICK_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut stat_last = self.registry.traffic();
        let mut last_stats = Instant::now();
        let mut last_evict = Instant::now();

        debug!("reaper started");
        while !self.stopping.load(Ordering::Relaxed) {
            interval.tick().await;

            if last_stats.elapsed() >= Duration::from_secs(1) {
                let elapsed_secs = last_stats.elapsed().as_secs().max(1);
                last_stats = Instant::now();
                let stat = self.registry.traffic();
                let rates = derive_rates(&stat, &stat_last, elapsed_secs);
                stat_last = stat;
                self.registry.set_rates(rates);
                self.publish_snapshot(stat, rates);
            }

            if last_evict.elapsed() >= Duration::from_secs(1) {
                last_evict = Instant::now();
                self.registry.evict(self.idle, self.stale);
            }
        }
        debug!("reaper stopped");
    }

    fn publish_snapshot(&self, totals: Traffic, rates: TrafficRates) {
        let snapshot = DebugSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            address_count: self.registry.address_count(),
            next_frame_id: self.registry.next_id(),
            totals,
            rates,
            mailboxes: self.registry.mailbox_counts(),
        };
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => self.registry.publish_snapshot(bytes),
            Err(e) => warn!("snapshot serialization failed: {}", e),
        }
    }
}

fn derive_rates(stat: &Traffic, last: &Traffic, elapsed_secs: u64) -> TrafficRates {
    let in_bytes = stat.in_bytes.saturating_sub(last.in_bytes) / elapsed_secs;
    let out_bytes = stat.out_bytes.saturating_sub(last.out_bytes) / elapsed_secs;
    TrafficRates {
        in_bytes_per_sec: in_bytes,
        in_frames_per_sec: stat.in_frames.saturating_sub(last.in_frames) / elapsed_secs,
        in_kb_per_sec: in_bytes / 1024,
        in_mb_per_sec: in_bytes / (1024 * 1024),
        out_bytes_per_sec: out_bytes,
        out_frames_per_sec: stat.out_frames.saturating_sub(last.out_frames) / elapsed_secs,
        out_kb_per_sec: out_bytes / 1024,
        out_mb_per_sec: out_bytes / (1024 * 1024),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_rates_deltas() {
        let last = Traffic { in_bytes: 1000, in_frames: 10, out_bytes: 0, out_frames: 0 };
        let stat = Traffic { in_bytes: 5096, in_frames: 30, out_bytes: 2048, out_frames: 4 };
        let rates = derive_rates(&stat, &last, 1);
        assert_eq!(rates.in_bytes_per_sec, 4096);
        assert_eq!(rates.in_frames_per_sec, 20);
        assert_eq!(rates.in_kb_per_sec, 4);
        assert_eq!(rates.out_bytes_per_sec, 2048);
        assert_eq!(rates.out_frames_per_sec, 4);
    }

    #[test]
    fn test_derive_rates_counter_reset_is_zero() {
        let last = Traffic { in_bytes: 100, in_frames: 1, out_bytes: 0, out_frames: 0 };
        let stat = Traffic::default();
        let rates = derive_rates(&stat, &last, 1);
        assert_eq!(rates.in_bytes_per_sec, 0);
    }
}
