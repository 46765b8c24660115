//! CPU utilization sampling from /proc/stat.

use std::future::Future;

use thiserror::Error;

const PROC_STAT: &str = "/proc/stat";

/// Errors from sampling the CPU load.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to read {0}")]
    Read(&'static str, #[source] std::io::Error),
    #[error("no aggregate cpu line in {0}")]
    MissingCpuLine(&'static str),
}

/// A source of current CPU load, polled once per tick.
///
/// Failures are transient: the caller skips the reading and polls again on
/// the next tick.
pub trait LoadProbe: Send + 'static {
    /// Current CPU load as a percentage.
    fn current_load(&mut self) -> impl Future<Output = Result<f64, MetricsError>> + Send;
}

/// Raw CPU time counters from the aggregate `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    fn inactive(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// CPU load collector with state for delta calculation.
///
/// Utilization is computed over the window between consecutive samples, so
/// the first sample after construction reports 0.0. Each collector keeps its
/// own window; concurrent collectors are fully independent.
#[derive(Debug, Default)]
pub struct CpuCollector {
    prev_times: Option<CpuTimes>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self { prev_times: None }
    }

    /// Compute utilization from a /proc/stat snapshot and advance the window.
    fn sample(&mut self, stat_content: &str) -> Result<f64, MetricsError> {
        let line = stat_content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or(MetricsError::MissingCpuLine(PROC_STAT))?;
        let times = parse_cpu_line(line);

        let load = match self.prev_times {
            Some(ref prev) => calculate_utilization(prev, &times),
            None => 0.0,
        };

        self.prev_times = Some(times);
        Ok(load)
    }
}

impl LoadProbe for CpuCollector {
    async fn current_load(&mut self) -> Result<f64, MetricsError> {
        let stat_content = tokio::fs::read_to_string(PROC_STAT)
            .await
            .map_err(|e| MetricsError::Read(PROC_STAT, e))?;
        self.sample(&stat_content)
    }
}

fn parse_cpu_line(line: &str) -> CpuTimes {
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1) // Skip "cpu"
        .filter_map(|s| s.parse().ok())
        .collect();

    CpuTimes {
        user: *parts.first().unwrap_or(&0),
        nice: *parts.get(1).unwrap_or(&0),
        system: *parts.get(2).unwrap_or(&0),
        idle: *parts.get(3).unwrap_or(&0),
        iowait: *parts.get(4).unwrap_or(&0),
        irq: *parts.get(5).unwrap_or(&0),
        softirq: *parts.get(6).unwrap_or(&0),
        steal: *parts.get(7).unwrap_or(&0),
    }
}

fn calculate_utilization(prev: &CpuTimes, curr: &CpuTimes) -> f64 {
    let total_delta = curr.total().saturating_sub(prev.total());
    if total_delta == 0 {
        return 0.0;
    }

    let inactive_delta = curr.inactive().saturating_sub(prev.inactive());
    100.0 * (1.0 - (inactive_delta as f64 / total_delta as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(user: u64, system: u64, idle: u64, iowait: u64) -> String {
        format!(
            "cpu  {} 0 {} {} {} 0 0 0 0 0\ncpu0 0 0 0 0 0 0 0 0 0 0\nctxt 12345\n",
            user, system, idle, iowait
        )
    }

    #[test]
    fn parses_aggregate_cpu_line() {
        let times = parse_cpu_line("cpu  4705 150 1120 16250 520 30 45 10 0 0");
        assert_eq!(times.user, 4705);
        assert_eq!(times.nice, 150);
        assert_eq!(times.system, 1120);
        assert_eq!(times.idle, 16250);
        assert_eq!(times.iowait, 520);
        assert_eq!(times.irq, 30);
        assert_eq!(times.softirq, 45);
        assert_eq!(times.steal, 10);
    }

    #[test]
    fn utilization_from_deltas() {
        let prev = parse_cpu_line("cpu  0 0 0 0 0 0 0 0");
        let curr = parse_cpu_line("cpu  25 0 0 75 0 0 0 0");
        let load = calculate_utilization(&prev, &curr);
        assert!((load - 25.0).abs() < 1e-9);
    }

    #[test]
    fn zero_delta_reports_idle() {
        let times = parse_cpu_line("cpu  100 0 50 300 10 0 0 0");
        assert_eq!(calculate_utilization(&times, &times), 0.0);
    }

    #[test]
    fn counter_regression_is_harmless() {
        let prev = parse_cpu_line("cpu  200 0 100 600 20 0 0 0");
        let curr = parse_cpu_line("cpu  100 0 50 300 10 0 0 0");
        assert_eq!(calculate_utilization(&prev, &curr), 0.0);
    }

    #[test]
    fn first_sample_is_zero_then_windowed() {
        let mut collector = CpuCollector::new();
        let first = collector.sample(&stat(100, 0, 900, 0)).unwrap();
        assert_eq!(first, 0.0);

        // 50 active out of 100 total in the window
        let second = collector.sample(&stat(150, 0, 950, 0)).unwrap();
        assert!((second - 50.0).abs() < 1e-9);
    }

    #[test]
    fn missing_cpu_line_is_an_error() {
        let mut collector = CpuCollector::new();
        let err = collector.sample("ctxt 12345\nbtime 0\n").unwrap_err();
        assert!(matches!(err, MetricsError::MissingCpuLine(_)));
    }
}
