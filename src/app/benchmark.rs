use std::fmt;
use std::fs;
use std::time::{Duration, Instant};
use color_eyre::Result;
use crate::renderer::config::BenchmarkSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkPhase {
    Warmup,
    Measuring,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSummary {
    pub frames: usize,
    pub elapsed: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

impl BenchmarkSummary {
    pub fn fps(&self) -> f64 {
        if self.mean.is_zero() {
            0.0
        } else {
            1.0 / self.mean.as_secs_f64()
        }
    }
}

impl fmt::Display for BenchmarkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frames: {}", self.frames)?;
        writeln!(f, "elapsed: {:.3} s", self.elapsed.as_secs_f64())?;
        writeln!(f, "frame time min: {:.3} ms", self.min.as_secs_f64() * 1000.0)?;
        writeln!(f, "frame time max: {:.3} ms", self.max.as_secs_f64() * 1000.0)?;
        writeln!(f, "frame time mean: {:.3} ms", self.mean.as_secs_f64() * 1000.0)?;
        write!(f, "fps: {:.1}", self.fps())
    }
}

/// Times presented frames: ignores everything during the warmup, then collects
/// frame times until the runtime or frame budget is exhausted
pub struct Benchmark {
    settings: BenchmarkSettings,
    started: Option<Instant>,
    measure_started: Option<Instant>,
    last_frame: Option<Instant>,
    frame_times: Vec<Duration>,
    phase: BenchmarkPhase,
}

impl Benchmark {
    pub fn new(settings: BenchmarkSettings) -> Self {
        Self {
            settings,
            started: None,
            measure_started: None,
            last_frame: None,
            frame_times: Vec::new(),
            phase: BenchmarkPhase::Warmup,
        }
    }

    /// Call once per presented frame
    pub fn frame(&mut self, now: Instant) -> BenchmarkPhase {
        match self.phase {
            BenchmarkPhase::Warmup => {
                let started = *self.started.get_or_insert(now);
                if now.duration_since(started) >= self.settings.warmup {
                    log::info!("Benchmark warmup done, measuring");
                    self.phase = BenchmarkPhase::Measuring;
                    self.measure_started = Some(now);
                    self.last_frame = Some(now);
                }
            }
            BenchmarkPhase::Measuring => {
                if let Some(last) = self.last_frame.replace(now) {
                    self.frame_times.push(now.duration_since(last));
                }

                let frames_done = self.settings.max_frames
                    .is_some_and(|max| self.frame_times.len() >= max as usize);
                let time_done = self.settings.max_frames.is_none()
                    && self.measure_started
                        .is_some_and(|start| now.duration_since(start) >= self.settings.runtime);
                if frames_done || time_done {
                    self.phase = BenchmarkPhase::Finished;
                }
            }
            BenchmarkPhase::Finished => {}
        }

        self.phase
    }

    pub fn summary(&self) -> Option<BenchmarkSummary> {
        let min = *self.frame_times.iter().min()?;
        let max = *self.frame_times.iter().max()?;
        let elapsed: Duration = self.frame_times.iter().sum();
        let mean = elapsed / self.frame_times.len() as u32;

        Some(BenchmarkSummary {
            frames: self.frame_times.len(),
            elapsed,
            min,
            max,
            mean,
        })
    }

    /// Logs the results and writes them to the configured file, if any
    pub fn report(&self) -> Result<()> {
        let Some(summary) = self.summary() else {
            log::warn!("Benchmark finished without any measured frames");
            return Ok(());
        };

        for line in summary.to_string().lines() {
            log::info!("Benchmark {}", line);
        }

        if let Some(path) = self.settings.output.as_ref() {
            fs::write(path, format!("{}\n", summary))?;
            log::info!("Benchmark results written to {:?}", path);
        }

        Ok(())
    }
}
