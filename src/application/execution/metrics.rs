//! Rolling in-process execution metrics over the last 100 orders.

use std::collections::VecDeque;
use std::sync::Mutex;

const WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPath {
    Limit,
    Market,
    Iceberg,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecSample {
    pub path: ExecPath,
    pub maker: bool,
    pub slippage_pct: f64,
    pub latency_ms: u64,
    pub requotes: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecSummary {
    pub limit_count: usize,
    pub market_count: usize,
    pub iceberg_count: usize,
    pub maker_count: usize,
    pub taker_count: usize,
    pub avg_slippage_pct: f64,
    pub avg_latency_ms: f64,
    pub total_requotes: u64,
}

#[derive(Default)]
pub struct ExecutionMetrics {
    samples: Mutex<VecDeque<ExecSample>>,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: ExecSample) {
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        samples.push_back(sample);
        while samples.len() > WINDOW {
            samples.pop_front();
        }
    }

    pub fn summary(&self) -> ExecSummary {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        let mut out = ExecSummary::default();
        if samples.is_empty() {
            return out;
        }
        let mut slippage_sum = 0.0;
        let mut latency_sum = 0.0;
        for s in samples.iter() {
            match s.path {
                ExecPath::Limit => out.limit_count += 1,
                ExecPath::Market => out.market_count += 1,
                ExecPath::Iceberg => out.iceberg_count += 1,
            }
            if s.maker {
                out.maker_count += 1;
            } else {
                out.taker_count += 1;
            }
            slippage_sum += s.slippage_pct;
            latency_sum += s.latency_ms as f64;
            out.total_requotes += s.requotes as u64;
        }
        out.avg_slippage_pct = slippage_sum / samples.len() as f64;
        out.avg_latency_ms = latency_sum / samples.len() as f64;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_caps_at_100() {
        let metrics = ExecutionMetrics::new();
        for i in 0..150 {
            metrics.record(ExecSample {
                path: ExecPath::Limit,
                maker: i % 2 == 0,
                slippage_pct: 0.1,
                latency_ms: 10,
                requotes: 1,
            });
        }
        let summary = metrics.summary();
        assert_eq!(summary.limit_count, 100);
        assert_eq!(summary.total_requotes, 100);
        assert!((summary.avg_slippage_pct - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_summary_counts_paths() {
        let metrics = ExecutionMetrics::new();
        metrics.record(ExecSample {
            path: ExecPath::Market,
            maker: false,
            slippage_pct: 0.2,
            latency_ms: 5,
            requotes: 0,
        });
        metrics.record(ExecSample {
            path: ExecPath::Iceberg,
            maker: true,
            slippage_pct: 0.0,
            latency_ms: 50,
            requotes: 2,
        });
        let summary = metrics.summary();
        assert_eq!(summary.market_count, 1);
        assert_eq!(summary.iceberg_count, 1);
        assert_eq!(summary.maker_count, 1);
        assert_eq!(summary.taker_count, 1);
    }
}
