//! In-process metrics registry.
//!
//! Counters, gauges, and histograms keyed by name, sampled at
//! `[metrics].default_sample_rate` for high-frequency events per
//! `config.rs`. Backed by the same `dashmap`-based concurrent maps as
//! `interaction.rs`'s cache rather than introducing a separate metrics
//! crate — PAMPAX has no metrics exporter of its own yet, so this
//! registry is read back by `pampax health` instead of pushed anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::MetricsConfig;

#[derive(Default)]
struct Histogram {
    count: AtomicU64,
    sum_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean_ms: f64,
}

/// Process-wide metrics sink. One instance lives on the `PampaxEngine` and
/// is cloned cheaply (all interior state is `Arc`-free `DashMap`s) into
/// every request path that wants to record something.
#[derive(Default)]
pub struct Metrics {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Histogram>,
    sample_rate: f64,
}

impl Metrics {
    #[must_use]
    pub fn new(config: &MetricsConfig) -> Self {
        Metrics { sample_rate: config.default_sample_rate, ..Default::default() }
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, delta: u64) {
        self.counters.entry(name.to_string()).or_default().fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: u64) {
        self.gauges.entry(name.to_string()).or_default().store(value, Ordering::Relaxed);
    }

    /// Record a duration against a histogram, honoring the configured
    /// sample rate for names that opt into sampling via `sampled: true`.
    pub fn observe_ms(&self, name: &str, elapsed_ms: u64, sampled: bool) {
        if sampled && !self.should_sample() {
            return;
        }
        let entry = self.histograms.entry(name.to_string()).or_default();
        entry.count.fetch_add(1, Ordering::Relaxed);
        entry.sum_millis.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    fn should_sample(&self) -> bool {
        if self.sample_rate >= 1.0 {
            return true;
        }
        if self.sample_rate <= 0.0 {
            return false;
        }
        let ticket = self.counters.entry("__sample_ticket".to_string()).or_default().fetch_add(1, Ordering::Relaxed);
        (ticket as f64 * self.sample_rate) as u64 != ((ticket + 1) as f64 * self.sample_rate) as u64
    }

    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> u64 {
        self.gauges.get(name).map(|g| g.load(Ordering::Relaxed)).unwrap_or(0)
    }

    #[must_use]
    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        let h = self.histograms.get(name)?;
        let count = h.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let mean_ms = h.sum_millis.load(Ordering::Relaxed) as f64 / count as f64;
        Some(HistogramSnapshot { count, mean_ms })
    }

    /// A flat snapshot of every counter/gauge/histogram, for `pampax
    /// analytics` and `pampax health --format json`.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed))).collect(),
            gauges: self.gauges.iter().map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed))).collect(),
            histograms: self
                .histograms
                .iter()
                .filter_map(|e| {
                    let count = e.value().count.load(Ordering::Relaxed);
                    (count > 0).then(|| {
                        let mean_ms = e.value().sum_millis.load(Ordering::Relaxed) as f64 / count as f64;
                        (e.key().clone(), HistogramSnapshot { count, mean_ms })
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: std::collections::BTreeMap<String, u64>,
    pub gauges: std::collections::BTreeMap<String, u64>,
    pub histograms: std::collections::BTreeMap<String, HistogramSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new(&MetricsConfig::default());
        metrics.incr("search.requests");
        metrics.incr("search.requests");
        assert_eq!(metrics.counter("search.requests"), 2);
    }

    #[test]
    fn histogram_tracks_mean() {
        let metrics = Metrics::new(&MetricsConfig { enabled: true, default_sample_rate: 1.0 });
        metrics.observe_ms("retrieve.latency", 10, true);
        metrics.observe_ms("retrieve.latency", 30, true);
        let snapshot = metrics.histogram("retrieve.latency").unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.mean_ms, 20.0);
    }

    #[test]
    fn zero_sample_rate_drops_sampled_observations() {
        let metrics = Metrics::new(&MetricsConfig { enabled: true, default_sample_rate: 0.0 });
        metrics.observe_ms("noisy.metric", 5, true);
        assert!(metrics.histogram("noisy.metric").is_none());
    }

    #[test]
    fn unsampled_observations_always_recorded() {
        let metrics = Metrics::new(&MetricsConfig { enabled: true, default_sample_rate: 0.0 });
        metrics.observe_ms("important.metric", 5, false);
        assert!(metrics.histogram("important.metric").is_some());
    }
}
