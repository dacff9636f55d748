//! Meta server metrics
//!
//! Prometheus-compatible counters, gauges and a sweep duration histogram.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for sweep durations (in milliseconds)
const SWEEP_BUCKETS: [f64; 9] = [0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let mut buckets = Vec::with_capacity(boundaries.len() + 1);
        for _ in 0..=boundaries.len() {
            buckets.push(AtomicU64::new(0));
        }
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub sweeps_total: Counter,
    pub proposals_sent: Counter,
    pub proposals_discarded: Counter,
    pub updates_applied: Counter,
    pub updates_rejected: Counter,
    pub node_downgrades: Counter,

    /// Partition health after the last sweep
    pub partitions_healthy: Gauge,
    pub partitions_needs_repair: Gauge,
    pub partitions_unrecoverable: Gauge,

    pub sweep_duration: Histogram,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            sweeps_total: Counter::new(),
            proposals_sent: Counter::new(),
            proposals_discarded: Counter::new(),
            updates_applied: Counter::new(),
            updates_rejected: Counter::new(),
            node_downgrades: Counter::new(),
            partitions_healthy: Gauge::new(),
            partitions_needs_repair: Gauge::new(),
            partitions_unrecoverable: Gauge::new(),
            sweep_duration: Histogram::with_buckets(&SWEEP_BUCKETS),
            start_time: Instant::now(),
        }
    }

    pub fn record_sweep(&self, duration: Duration) {
        self.sweeps_total.inc();
        self.sweep_duration
            .observe(duration.as_secs_f64() * 1000.0);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters = [
            ("minimeta_sweeps_total", "Partition sweeps run", &self.sweeps_total),
            (
                "minimeta_proposals_sent_total",
                "Reconfiguration requests handed to the transport",
                &self.proposals_sent,
            ),
            (
                "minimeta_proposals_discarded_total",
                "Queued proposals dropped as invalid",
                &self.proposals_discarded,
            ),
            (
                "minimeta_updates_applied_total",
                "Acknowledged updates installed",
                &self.updates_applied,
            ),
            (
                "minimeta_updates_rejected_total",
                "Acknowledged updates refused",
                &self.updates_rejected,
            ),
            (
                "minimeta_node_downgrades_total",
                "Replicas downgraded because their node died",
                &self.node_downgrades,
            ),
        ];
        for (name, help, counter) in counters {
            writeln!(out, "# HELP {} {}", name, help).unwrap();
            writeln!(out, "# TYPE {} counter", name).unwrap();
            writeln!(out, "{} {}", name, counter.get()).unwrap();
        }

        out.push_str("# HELP minimeta_partitions Partitions by health after the last sweep\n");
        out.push_str("# TYPE minimeta_partitions gauge\n");
        for (status, gauge) in [
            ("healthy", &self.partitions_healthy),
            ("needs_repair", &self.partitions_needs_repair),
            ("unrecoverable", &self.partitions_unrecoverable),
        ] {
            writeln!(out, "minimeta_partitions{{status=\"{}\"}} {}", status, gauge.get()).unwrap();
        }

        out.push_str("# HELP minimeta_sweep_duration_ms Sweep duration in milliseconds\n");
        out.push_str("# TYPE minimeta_sweep_duration_ms histogram\n");
        for (le, count) in self.sweep_duration.get_buckets() {
            if le.is_infinite() {
                writeln!(out, "minimeta_sweep_duration_ms_bucket{{le=\"+Inf\"}} {}", count)
                    .unwrap();
            } else {
                writeln!(out, "minimeta_sweep_duration_ms_bucket{{le=\"{}\"}} {}", le, count)
                    .unwrap();
            }
        }
        writeln!(out, "minimeta_sweep_duration_ms_sum {}", self.sweep_duration.sum()).unwrap();
        writeln!(
            out,
            "minimeta_sweep_duration_ms_count {}",
            self.sweep_duration.count()
        )
        .unwrap();

        out.push_str("# HELP minimeta_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE minimeta_uptime_seconds gauge\n");
        writeln!(out, "minimeta_uptime_seconds {}", self.uptime_seconds()).unwrap();

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::with_buckets(&SWEEP_BUCKETS);

        hist.observe(0.2);
        hist.observe(50.0);
        hist.observe(9000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.first().unwrap().1, 1);
        assert_eq!(buckets.last().unwrap().1, 3);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.proposals_sent.add(3);
        registry.partitions_healthy.set(7);
        registry.record_sweep(Duration::from_millis(2));

        let out = registry.to_prometheus();
        assert!(out.contains("minimeta_proposals_sent_total 3"));
        assert!(out.contains("minimeta_partitions{status=\"healthy\"} 7"));
        assert!(out.contains("minimeta_sweeps_total 1"));
        assert!(out.contains("minimeta_sweep_duration_ms_count 1"));
    }
}
