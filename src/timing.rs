//! Frame clock, per-period timing counters and JSON timing snapshots.

use crate::compute::FrameTimings;
use crate::scheduler::FrameReport;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

pub const ENQUEUE_WORK: &str = "Enqueue work";
pub const TOTAL_COMPUTE: &str = "Total compute";
pub const PRESENT: &str = "Present";

pub struct FrameClock {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

/// Named nanosecond counters, kept in first-seen order and reset every report.
#[derive(Debug, Default)]
pub struct TimingCounters {
    counters: Vec<(&'static str, u64)>,
    frames: u32,
}

impl TimingCounters {
    pub fn add(&mut self, label: &'static str, nanos: u64) {
        match self.counters.iter_mut().find(|(name, _)| *name == label) {
            Some((_, total)) => *total += nanos,
            None => self.counters.push((label, nanos)),
        }
    }

    pub fn add_duration(&mut self, label: &'static str, duration: Duration) {
        self.add(label, u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn record_frame(&mut self, report: &FrameReport, present: Duration) {
        self.frames += 1;
        for stage in &report.timings.stages {
            self.add(stage.label, stage.nanos);
        }
        self.add_duration(ENQUEUE_WORK, report.enqueue);
        self.add_duration(TOTAL_COMPUTE, report.total);
        self.add_duration(PRESENT, present);
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn total_nanos(&self, label: &str) -> u64 {
        self.counters.iter().find(|(name, _)| *name == label).map_or(0, |(_, total)| *total)
    }

    /// Summarises the counters against a wall-clock `period` and resets them.
    pub fn take_report(&mut self, period: Duration) -> PeriodReport {
        let period_secs = period.as_secs_f64().max(f64::EPSILON);
        let frames = self.frames;
        let lines = self
            .counters
            .iter_mut()
            .map(|(label, total)| {
                let seconds = *total as f64 * 1e-9;
                let line = CounterLine { label: *label, millis: seconds * 1e3, percent: 100.0 * seconds / period_secs };
                *total = 0;
                line
            })
            .collect();
        self.frames = 0;
        PeriodReport {
            frames,
            fps: f64::from(frames) / period_secs,
            ms_per_frame: if frames == 0 { 0.0 } else { 1e3 * period_secs / f64::from(frames) },
            lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterLine {
    pub label: &'static str,
    pub millis: f64,
    /// Share of the wall-clock period.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub frames: u32,
    pub fps: f64,
    pub ms_per_frame: f64,
    pub lines: Vec<CounterLine>,
}

impl fmt::Display for PeriodReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FPS: {:.1}, {:.2} ms/F", self.fps, self.ms_per_frame)?;
        let width = self.lines.iter().map(|line| line.label.len()).max().unwrap_or(0);
        for line in &self.lines {
            write!(f, "\n  {:<width$}  {:6.2}%  {:9.3} ms", line.label, line.percent, line.millis)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StageSamples {
    total_ms: f64,
    max_ms: f64,
    samples: usize,
}

/// Collects per-stage GPU time across a whole run for export.
#[derive(Debug, Default)]
pub struct TimingAccumulator {
    frame_count: usize,
    stages: BTreeMap<&'static str, StageSamples>,
}

impl TimingAccumulator {
    /// Folds one frame's stages in, summing repeated labels within the frame first.
    /// A frame without GPU timings still counts toward `frame_count`.
    pub fn record_frame(&mut self, timings: &FrameTimings) {
        self.frame_count += 1;
        let mut per_frame: BTreeMap<&'static str, u64> = BTreeMap::new();
        for stage in &timings.stages {
            *per_frame.entry(stage.label).or_default() += stage.nanos;
        }
        for (label, nanos) in per_frame {
            let ms = nanos as f64 * 1e-6;
            let samples = self.stages.entry(label).or_default();
            samples.total_ms += ms;
            samples.max_ms = samples.max_ms.max(ms);
            samples.samples += 1;
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn snapshot(&self, label: impl Into<String>) -> TimingSnapshot {
        TimingSnapshot {
            label: label.into(),
            frame_count: self.frame_count,
            stages: self
                .stages
                .iter()
                .map(|(label, samples)| StageSnapshot {
                    label: label.to_string(),
                    average_ms: samples.total_ms / samples.samples.max(1) as f64,
                    max_ms: samples.max_ms,
                    sample_count: samples.samples,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub label: String,
    pub average_ms: f64,
    pub max_ms: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub label: String,
    pub frame_count: usize,
    pub stages: Vec<StageSnapshot>,
}

impl TimingSnapshot {
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write timing snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read timing snapshot {}", path.display()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn stage(&self, label: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|stage| stage.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::StageTiming;

    fn report(stages: &[(&'static str, u64)]) -> FrameReport {
        FrameReport {
            timings: FrameTimings {
                stages: stages.iter().map(|&(label, nanos)| StageTiming { label, nanos }).collect(),
            },
            enqueue: Duration::from_millis(1),
            total: Duration::from_millis(4),
            ..FrameReport::default()
        }
    }

    #[test]
    fn period_report_uses_wall_clock_percentages() {
        let mut counters = TimingCounters::default();
        counters.record_frame(&report(&[("Move rays", 250_000_000), ("Move rays", 250_000_000)]), Duration::ZERO);
        counters.record_frame(&report(&[("Dump image", 100_000_000)]), Duration::from_millis(2));
        let summary = counters.take_report(Duration::from_secs(2));
        assert_eq!(summary.frames, 2);
        assert!((summary.fps - 1.0).abs() < 1e-9);
        assert!((summary.ms_per_frame - 1000.0).abs() < 1e-6);
        let move_rays = summary.lines.iter().find(|l| l.label == "Move rays").unwrap();
        assert!((move_rays.percent - 25.0).abs() < 1e-9);
        assert_eq!(summary.lines[0].label, "Move rays");
        assert!(summary.to_string().starts_with("FPS: 1.0, 1000.00 ms/F"));
        assert_eq!(counters.total_nanos("Move rays"), 0);
        assert_eq!(counters.frames(), 0);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut acc = TimingAccumulator::default();
        acc.record_frame(&report(&[("Primary rays", 2_000_000), ("Primary rays", 1_000_000)]).timings);
        acc.record_frame(&report(&[("Primary rays", 1_000_000)]).timings);
        let snapshot = acc.snapshot("bench");
        let stage = snapshot.stage("Primary rays").unwrap();
        assert_eq!(stage.sample_count, 2);
        assert!((stage.average_ms - 2.0).abs() < 1e-9);
        assert!((stage.max_ms - 3.0).abs() < 1e-9);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.json");
        snapshot.write_to_path(&path).unwrap();
        assert_eq!(TimingSnapshot::load(&path).unwrap(), snapshot);
    }

    #[test]
    fn untimed_frames_are_counted_without_stages() {
        let mut acc = TimingAccumulator::default();
        acc.record_frame(&FrameTimings::default());
        acc.record_frame(&report(&[("Dump image", 1_000_000)]).timings);
        assert_eq!(acc.frame_count(), 2);
        let snapshot = acc.snapshot("mixed");
        assert_eq!(snapshot.frame_count, 2);
        assert_eq!(snapshot.stage("Dump image").unwrap().sample_count, 1);
    }
}
