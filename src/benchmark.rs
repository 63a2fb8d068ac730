//! Timed sweep over tracer settings, started from the keyboard.
//!
//! Each case runs a warm-up phase whose timings are discarded, then a
//! measured phase. Results for every case are written to one JSON file.

use crate::compute::FrameTimings;
use crate::timing::{TimingAccumulator, TimingSnapshot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub work_group_size: u32,
    pub width: u32,
    pub height: u32,
    pub bounces: u32,
    pub lights: u32,
    /// Active flag per model slot; `None` keeps the current selection.
    #[serde(default)]
    pub models: Option<Vec<bool>>,
}

impl BenchmarkCase {
    const fn new(work_group_size: u32, width: u32, height: u32, bounces: u32, lights: u32) -> Self {
        Self { work_group_size, width, height, bounces, lights, models: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkPlan {
    #[serde(default = "BenchmarkPlan::default_warmup_secs")]
    pub warmup_secs: f32,
    #[serde(default = "BenchmarkPlan::default_measure_secs")]
    pub measure_secs: f32,
    #[serde(default = "BenchmarkPlan::default_output")]
    pub output: PathBuf,
    #[serde(default = "BenchmarkPlan::default_cases")]
    pub cases: Vec<BenchmarkCase>,
}

impl BenchmarkPlan {
    const fn default_warmup_secs() -> f32 {
        1.0
    }

    const fn default_measure_secs() -> f32 {
        10.0
    }

    fn default_output() -> PathBuf {
        PathBuf::from("benchmark_results.json")
    }

    fn default_cases() -> Vec<BenchmarkCase> {
        let mut cases = Vec::new();
        for (width, height) in [(1024, 768), (640, 480)] {
            for group in [32, 64, 128, 256] {
                cases.push(BenchmarkCase::new(group, width, height, 4, 2));
            }
        }
        for (width, height) in [(128, 128), (800, 600), (1280, 1024)] {
            cases.push(BenchmarkCase::new(128, width, height, 4, 2));
        }
        for bounces in 0..=10 {
            cases.push(BenchmarkCase::new(128, 1024, 768, bounces, 2));
        }
        for lights in [1, 3, 4, 7, 10] {
            cases.push(BenchmarkCase::new(128, 1024, 768, 4, lights));
        }
        cases
    }
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        Self {
            warmup_secs: Self::default_warmup_secs(),
            measure_secs: Self::default_measure_secs(),
            output: Self::default_output(),
            cases: Self::default_cases(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case: BenchmarkCase,
    pub frames: usize,
    pub measured_secs: f32,
    pub fps: f32,
    pub timings: TimingSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub results: Vec<CaseResult>,
}

impl BenchmarkReport {
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write benchmark results {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Measure,
}

/// What the caller should do after a benchmark frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkStep {
    Continue,
    /// Switch to the given case before the next frame.
    Apply(BenchmarkCase),
    Finished(BenchmarkReport),
}

#[derive(Debug)]
pub struct BenchmarkRun {
    plan: BenchmarkPlan,
    current: usize,
    phase: Phase,
    time_left: f32,
    measured: f32,
    accumulator: TimingAccumulator,
    results: Vec<CaseResult>,
}

impl BenchmarkRun {
    /// Starts the sweep. Returns `None` for a plan without cases.
    pub fn start(plan: BenchmarkPlan) -> Option<(Self, BenchmarkCase)> {
        let first = plan.cases.first()?.clone();
        let run = Self {
            time_left: plan.warmup_secs,
            plan,
            current: 0,
            phase: Phase::Warmup,
            measured: 0.0,
            accumulator: TimingAccumulator::default(),
            results: Vec::new(),
        };
        Some((run, first))
    }

    pub fn output(&self) -> &Path {
        &self.plan.output
    }

    pub fn case_index(&self) -> usize {
        self.current
    }

    pub fn case_count(&self) -> usize {
        self.plan.cases.len()
    }

    /// Feeds one rendered frame of `dt` seconds.
    pub fn advance(&mut self, dt: f32, timings: &FrameTimings) -> BenchmarkStep {
        if self.phase == Phase::Measure {
            self.accumulator.record_frame(timings);
            self.measured += dt;
        }
        self.time_left -= dt;
        if self.time_left > 0.0 {
            return BenchmarkStep::Continue;
        }
        match self.phase {
            Phase::Warmup => {
                self.phase = Phase::Measure;
                self.time_left = self.plan.measure_secs;
                self.measured = 0.0;
                self.accumulator = TimingAccumulator::default();
                BenchmarkStep::Continue
            }
            Phase::Measure => {
                self.finish_case();
                self.current += 1;
                match self.plan.cases.get(self.current) {
                    Some(case) => {
                        self.phase = Phase::Warmup;
                        self.time_left = self.plan.warmup_secs;
                        BenchmarkStep::Apply(case.clone())
                    }
                    None => BenchmarkStep::Finished(BenchmarkReport { results: std::mem::take(&mut self.results) }),
                }
            }
        }
    }

    fn finish_case(&mut self) {
        let Some(case) = self.plan.cases.get(self.current) else { return };
        let frames = self.accumulator.frame_count();
        let fps = if self.measured > 0.0 { frames as f32 / self.measured } else { 0.0 };
        let label = format!(
            "{}x{} group {} bounces {} lights {}",
            case.width, case.height, case.work_group_size, case.bounces, case.lights
        );
        log::info!(target: "benchmark", "case {}/{} {label}: {fps:.1} FPS", self.current + 1, self.plan.cases.len());
        self.results.push(CaseResult {
            case: case.clone(),
            frames,
            measured_secs: self.measured,
            fps,
            timings: self.accumulator.snapshot(label),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::StageTiming;

    fn frame() -> FrameTimings {
        FrameTimings { stages: vec![StageTiming { label: "Primary rays", nanos: 1_000_000 }] }
    }

    fn plan() -> BenchmarkPlan {
        BenchmarkPlan {
            warmup_secs: 0.5,
            measure_secs: 1.0,
            output: PathBuf::from("unused.json"),
            cases: vec![BenchmarkCase::new(32, 64, 64, 1, 1), BenchmarkCase::new(64, 32, 32, 2, 2)],
        }
    }

    #[test]
    fn sweep_warms_up_measures_and_advances() {
        let (mut run, first) = BenchmarkRun::start(plan()).unwrap();
        assert_eq!(first.work_group_size, 32);
        assert_eq!(run.advance(0.25, &frame()), BenchmarkStep::Continue);
        assert_eq!(run.advance(0.25, &frame()), BenchmarkStep::Continue);
        for _ in 0..3 {
            assert_eq!(run.advance(0.25, &frame()), BenchmarkStep::Continue);
        }
        let BenchmarkStep::Apply(second) = run.advance(0.25, &frame()) else {
            panic!("expected the second case");
        };
        assert_eq!(second.lights, 2);
        assert_eq!(run.case_index(), 1);

        let mut step = BenchmarkStep::Continue;
        for _ in 0..6 {
            step = run.advance(0.25, &frame());
        }
        let BenchmarkStep::Finished(report) = step else {
            panic!("expected the sweep to finish");
        };
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].frames, 4);
        assert!((report.results[0].fps - 4.0).abs() < 1e-5);
    }

    #[test]
    fn fps_is_reported_without_gpu_timestamps() {
        let plan = BenchmarkPlan { cases: plan().cases[..1].to_vec(), ..plan() };
        let (mut run, _) = BenchmarkRun::start(plan).unwrap();
        let mut step = BenchmarkStep::Continue;
        for _ in 0..6 {
            step = run.advance(0.25, &FrameTimings::default());
        }
        let BenchmarkStep::Finished(report) = step else {
            panic!("expected the single case to finish");
        };
        assert_eq!(report.results[0].frames, 4);
        assert!((report.results[0].fps - 4.0).abs() < 1e-5);
        assert!(report.results[0].timings.stages.is_empty());
    }

    #[test]
    fn empty_plan_does_not_start() {
        let plan = BenchmarkPlan { cases: Vec::new(), ..BenchmarkPlan::default() };
        assert!(BenchmarkRun::start(plan).is_none());
        assert!(!BenchmarkPlan::default().cases.is_empty());
    }

    #[test]
    fn report_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        BenchmarkReport { results: Vec::new() }.write_to_path(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"results\""));
    }
}
