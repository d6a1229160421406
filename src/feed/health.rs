//! Per-source health tracking
//!
//! A source that fails `failure_threshold` times in a row is parked until
//! `cooldown` has elapsed, then gets one probe. Latency samples are kept for
//! the p95 reported in logs.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const MIN_LATENCY_SAMPLES: usize = 20;
const LATENCY_WINDOW: usize = 64;

#[derive(Debug)]
pub struct SourceHealth {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    tripped_at: Option<Instant>,
    latencies_ms: VecDeque<f64>,
}

/// Snapshot for status reporting
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceHealthReport {
    pub source: String,
    pub available: bool,
    pub consecutive_failures: u32,
    pub p95_latency_ms: Option<f64>,
}

impl SourceHealth {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            tripped_at: None,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Whether the source may be queried at `now`
    pub fn is_available(&self, now: Instant) -> bool {
        match self.tripped_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.cooldown,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        if self.tripped_at.take().is_some() {
            info!(source = %self.name, "🔌 Source recovered");
        }
        self.consecutive_failures = 0;

        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
        if self.latencies_ms.len() > LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
    }

    pub fn record_failure(&mut self, reason: &str, now: Instant) {
        self.consecutive_failures += 1;
        warn!(
            source = %self.name,
            failures = self.consecutive_failures,
            reason,
            "⚠️ Source failure recorded"
        );

        if self.consecutive_failures >= self.failure_threshold {
            // A failed probe after cool-down re-arms the timer
            if self.tripped_at.is_none() {
                error!(
                    source = %self.name,
                    failures = self.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "🛑 Source parked"
                );
            }
            self.tripped_at = Some(now);
        }
    }

    pub fn p95_latency(&self) -> Option<f64> {
        if self.latencies_ms.len() < MIN_LATENCY_SAMPLES {
            return None;
        }
        let mut samples: Vec<f64> = self.latencies_ms.iter().copied().collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        samples.get(index).copied()
    }

    pub fn report(&self, now: Instant) -> SourceHealthReport {
        SourceHealthReport {
            source: self.name.clone(),
            available: self.is_available(now),
            consecutive_failures: self.consecutive_failures,
            p95_latency_ms: self.p95_latency(),
        }
    }
}
