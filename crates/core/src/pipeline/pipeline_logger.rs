use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for transcode progress and per-stage cost.
///
/// Executors report through this trait so the CLI can print a run summary
/// while the HTTP service stays quiet.
pub trait PipelineLogger: Send {
    fn progress(&mut self, current: usize, total: usize);

    /// Milliseconds spent in `stage` for a single frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// A sampled gauge, such as the reorder buffer depth.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Called once after the last frame is written.
    fn summary(&self) {}
}

/// Discards everything.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running count and sum of one series of samples.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleStats {
    pub count: usize,
    pub total: f64,
    pub max: f64,
}

impl SampleStats {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Logs progress through `log` every `every_n_frames` frames and prints a
/// per-stage breakdown when the run ends.
pub struct StdoutPipelineLogger {
    every_n_frames: usize,
    stages: BTreeMap<String, SampleStats>,
    gauges: BTreeMap<String, SampleStats>,
    started: Instant,
    frames_written: usize,
    frames_expected: usize,
}

impl StdoutPipelineLogger {
    pub fn new(every_n_frames: usize) -> Self {
        Self {
            every_n_frames: every_n_frames.max(1),
            stages: BTreeMap::new(),
            gauges: BTreeMap::new(),
            started: Instant::now(),
            frames_written: 0,
            frames_expected: 0,
        }
    }

    pub fn stage(&self, name: &str) -> Option<SampleStats> {
        self.stages.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<SampleStats> {
        self.gauges.get(name).copied()
    }

    /// Renders the end-of-run report. `None` until at least one sample arrived.
    pub fn report(&self) -> Option<String> {
        if self.stages.is_empty() && self.gauges.is_empty() {
            return None;
        }

        let wall_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut out = format!(
            "Transcode finished: {} frames in {:.1}s",
            self.frames_written,
            wall_ms / 1000.0
        );

        for (name, stats) in &self.stages {
            let share = if wall_ms > 0.0 {
                stats.total / wall_ms * 100.0
            } else {
                0.0
            };
            out.push_str(&format!(
                "\n  {name:<10} mean {:6.1}ms  max {:6.1}ms  sum {:7.0}ms  {share:4.1}% of wall",
                stats.mean(),
                stats.max,
                stats.total
            ));
        }
        for (name, stats) in &self.gauges {
            out.push_str(&format!(
                "\n  {name:<10} mean {:.1}  peak {:.0}",
                stats.mean(),
                stats.max
            ));
        }

        if self.frames_expected > 0 && self.frames_expected != self.frames_written {
            out.push_str(&format!(
                "\n  container header claimed {} frames",
                self.frames_expected
            ));
        }
        if self.frames_written > 0 && wall_ms > 0.0 {
            let rate = self.frames_written as f64 * 1000.0 / wall_ms;
            out.push_str(&format!("\n  {rate:.1} frames/s"));
        }

        Some(out)
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(25)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.frames_written = current;
        self.frames_expected = total;
        let last = total > 0 && current == total;
        if !last && current % self.every_n_frames != 0 {
            return;
        }
        match total {
            0 => log::info!("Annotated {current} frames"),
            _ => log::info!(
                "Annotated {current}/{total} frames ({:.0}%)",
                current as f64 * 100.0 / total as f64
            ),
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.stages
            .entry(stage.to_owned())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.gauges.entry(name.to_owned()).or_default().record(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(report) = self.report() {
            log::info!("{report}");
        }
    }
}
