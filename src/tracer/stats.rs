//! Throttled throughput printing.

use std::io::Write;
use std::time::{Duration, Instant};

use crate::backend::{ComputeBackend, PerfNumbers};
use crate::util::Result;

/// Prints ray throughput at most once per interval and resets the device
/// counters after each print.
#[derive(Debug, Clone)]
pub struct StatsPrinter {
    interval: Duration,
    last_printed: Instant,
    latest: PerfNumbers,
}

impl StatsPrinter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_printed: now,
            latest: PerfNumbers::default(),
        }
    }

    /// Most recently printed rates, for overlays.
    pub fn latest(&self) -> PerfNumbers {
        self.latest
    }

    /// Print if more than one interval passed since the last print.
    ///
    /// Returns the printed numbers. Counters are reset on the device only
    /// when something was printed.
    pub fn tick<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        now: Instant,
    ) -> Result<Option<PerfNumbers>> {
        let elapsed = now.saturating_duration_since(self.last_printed);
        if elapsed <= self.interval {
            return Ok(None);
        }
        self.last_printed = now;

        let perf = PerfNumbers::from_stats(&backend.stats(), elapsed);
        self.latest = perf;
        if let Err(e) = print_line(&perf) {
            log::debug!("Failed to print stats: {e}");
        }
        backend.reset_stats()?;
        Ok(Some(perf))
    }
}

fn print_line(perf: &PerfNumbers) -> std::io::Result<()> {
    log::debug!("{perf:?}");
    write_line(&mut std::io::stdout().lock(), perf)
}

/// Write the summary followed by a carriage return so the next one overwrites it.
fn write_line(out: &mut impl Write, perf: &PerfNumbers) -> std::io::Result<()> {
    write!(out, "{}\r", format_perf(perf))?;
    out.flush()
}

/// One-line summary, e.g. `12.3M primary, 4.56M extension, ...`.
pub fn format_perf(perf: &PerfNumbers) -> String {
    format!(
        "{:.1}M primary, {:.2}M extension, {:.2}M shadow, {:.2}M samples, total: {:.2}MRays/s",
        perf.primary,
        perf.extension,
        perf.shadow,
        perf.samples,
        perf.total()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordingBackend, Stage};
    use crate::backend::RenderStats;

    #[test]
    fn test_prints_at_most_once_per_interval() {
        let t0 = Instant::now();
        let mut printer = StatsPrinter::new(Duration::from_secs(1), t0);
        let mut backend = RecordingBackend::new();

        assert!(printer.tick(&mut backend, t0 + Duration::from_millis(500)).unwrap().is_none());
        assert!(printer.tick(&mut backend, t0 + Duration::from_millis(1000)).unwrap().is_none());
        assert!(printer.tick(&mut backend, t0 + Duration::from_millis(1001)).unwrap().is_some());
        assert!(printer.tick(&mut backend, t0 + Duration::from_millis(1500)).unwrap().is_none());

        let resets = backend.stages.iter().filter(|s| **s == Stage::ResetStats).count();
        assert_eq!(resets, 1);
    }

    #[test]
    fn test_rates_use_elapsed_time() {
        let t0 = Instant::now();
        let mut printer = StatsPrinter::new(Duration::from_secs(1), t0);
        let mut backend = RecordingBackend::new();
        backend.resize(1000, 1000).unwrap();
        backend.enqueue_ray_gen().unwrap();
        backend.enqueue_ray_gen().unwrap();
        backend.fetch_stats_async().unwrap();

        let perf = printer.tick(&mut backend, t0 + Duration::from_secs(2)).unwrap().unwrap();
        assert!((perf.primary - 1.0).abs() < 1e-9);
        assert_eq!(printer.latest(), perf);
        assert_eq!(backend.stats(), RenderStats::default());
    }

    #[test]
    fn test_format() {
        let perf = PerfNumbers { primary: 1.0, extension: 2.0, shadow: 3.0, samples: 0.5 };
        let line = format_perf(&perf);
        assert!(line.starts_with("1.0M primary"));
        assert!(line.ends_with("total: 6.00MRays/s"));
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_line_reports_errors() {
        let perf = PerfNumbers { primary: 1.0, extension: 0.0, shadow: 0.0, samples: 0.0 };
        let mut buf = Vec::new();
        write_line(&mut buf, &perf).unwrap();
        assert_eq!(buf.last(), Some(&b'\r'));

        let err = write_line(&mut Closed, &perf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
