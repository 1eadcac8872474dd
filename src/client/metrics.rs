//! Request timing
//!
//! Samples are grouped by metric name and each group keeps only the most recent
//! [`MAX_SAMPLES`] values.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::cache::now_millis;

/// Samples kept per metric name
pub const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    /// Milliseconds
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    samples: DashMap<String, VecDeque<Metric>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metric name used for a request URL
    pub fn request_metric(url: &str) -> String {
        format!("request:{}", url)
    }

    pub fn record(&self, name: &str, value: f64) {
        let mut group = self.samples.entry(name.to_string()).or_default();
        if group.len() >= MAX_SAMPLES {
            group.pop_front();
        }
        group.push_back(Metric {
            name: name.to_string(),
            value,
            timestamp: now_millis(),
        });
    }

    pub fn track_request(&self, url: &str, elapsed: Duration) {
        self.record(&Self::request_metric(url), elapsed.as_secs_f64() * 1000.0);
    }

    /// Samples for one name, oldest first
    pub fn metrics(&self, name: &str) -> Vec<Metric> {
        self.samples
            .get(name)
            .map(|group| group.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.samples.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Mean value in milliseconds, None when nothing was recorded
    pub fn average(&self, name: &str) -> Option<f64> {
        let group = self.samples.get(name)?;
        if group.is_empty() {
            return None;
        }
        Some(group.iter().map(|m| m.value).sum::<f64>() / group.len() as f64)
    }

    pub fn clear(&self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        let monitor = PerformanceMonitor::new();
        monitor.record("request:http://a", 10.0);
        monitor.record("request:http://a", 30.0);
        assert_eq!(monitor.average("request:http://a"), Some(20.0));
        assert_eq!(monitor.average("request:http://b"), None);
    }

    #[test]
    fn test_track_request_name() {
        let monitor = PerformanceMonitor::new();
        monitor.track_request("http://a/users", Duration::from_millis(5));
        let samples = monitor.metrics("request:http://a/users");
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_samples_are_bounded() {
        let monitor = PerformanceMonitor::new();
        for i in 0..(MAX_SAMPLES + 10) {
            monitor.record("m", i as f64);
        }
        let samples = monitor.metrics("m");
        assert_eq!(samples.len(), MAX_SAMPLES);
        assert_eq!(samples[0].value, 10.0);

        monitor.clear();
        assert!(monitor.names().is_empty());
    }
}
