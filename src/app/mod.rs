//! Interactive shell: window events, keyboard commands, the per-frame loop and
//! periodic timing reports.

use crate::benchmark::{BenchmarkCase, BenchmarkRun, BenchmarkStep};
use crate::cli::CliOverrides;
use crate::compute::WgpuBackend;
use crate::config::AppConfig;
use crate::input::{Command, Input, InputEvent};
use crate::renderer::Renderer;
use crate::scene::Scene;
use crate::scheduler::FrameScheduler;
use crate::settings::TracerSettings;
use crate::timing::{FrameClock, TimingAccumulator, TimingCounters};
use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

pub fn run_with_overrides(cli: CliOverrides) -> Result<()> {
    let mut config = AppConfig::load_or_default(cli.config_path());
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        log::info!(target: "cli", "overriding {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    run(config)
}

pub fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    app.finish()
}

/// GPU-side state, created once the window and device exist.
struct Tracer {
    backend: WgpuBackend,
    scene: Scene,
    scheduler: FrameScheduler,
}

struct ActiveBenchmark {
    run: BenchmarkRun,
    restore: TracerSettings,
    /// Model selection from before the sweep; cases may override it.
    restore_models: Option<Vec<bool>>,
}

pub struct App {
    config: AppConfig,
    renderer: Renderer,
    settings: TracerSettings,
    input: Input,
    clock: FrameClock,
    tracer: Option<Tracer>,
    counters: TimingCounters,
    session: TimingAccumulator,
    report_started: Instant,
    benchmark: Option<ActiveBenchmark>,
    should_close: bool,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let settings = TracerSettings::from_config(&config);
        Self {
            renderer: Renderer::new(&config.window),
            settings,
            input: Input::new(),
            clock: FrameClock::new(),
            tracer: None,
            counters: TimingCounters::default(),
            session: TimingAccumulator::default(),
            report_started: Instant::now(),
            benchmark: None,
            should_close: false,
            error: None,
            config,
        }
    }

    fn fail(&mut self, err: anyhow::Error) {
        log::error!(target: "app", "{err:#}");
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.should_close = true;
    }

    fn init_tracer(&mut self) -> Result<()> {
        let (device, queue) = self.renderer.device_and_queue()?;
        let mut backend = WgpuBackend::new(
            device,
            queue,
            &self.config.tracer.kernel_path,
            self.renderer.gpu_timing_supported(),
        )?;
        let scene = Scene::from_config(&mut backend, &self.config.scene)?;
        let scheduler = FrameScheduler::new(&mut backend, &scene)?;
        let size = self.renderer.size();
        self.settings.set_window_size(size.width, size.height);
        log::info!(
            target: "app",
            "{} models, {} spheres, {}x{} output",
            scene.models.len(),
            scene.spheres.len(),
            self.settings.width,
            self.settings.height
        );
        self.tracer = Some(Tracer { backend, scene, scheduler });
        self.clock = FrameClock::new();
        self.report_started = Instant::now();
        Ok(())
    }

    fn handle_commands(&mut self) {
        for command in self.input.take_commands() {
            if command.apply(&mut self.settings) {
                log::info!(target: "input", "{command:?} -> {:?}", self.settings);
                continue;
            }
            match command {
                Command::ToggleModel(slot) => {
                    let toggled = self.tracer.as_mut().and_then(|tracer| tracer.scene.toggle_instance(slot));
                    if let Some(active) = toggled {
                        log::info!(target: "input", "model {} {}", slot + 1, if active { "on" } else { "off" });
                    }
                }
                Command::StartBenchmark => self.start_benchmark(),
                Command::Quit => self.should_close = true,
                _ => {}
            }
        }
    }

    fn start_benchmark(&mut self) {
        let plan = self.config.benchmark.clone().unwrap_or_default();
        let Some((run, first)) = BenchmarkRun::start(plan) else {
            log::warn!(target: "benchmark", "benchmark plan has no cases");
            return;
        };
        log::info!(target: "benchmark", "starting {} cases, results go to {}", run.case_count(), run.output().display());
        let restore_models = self.tracer.as_ref().map(|tracer| tracer.scene.active_mask());
        self.benchmark = Some(ActiveBenchmark { run, restore: self.settings.clone(), restore_models });
        self.input.reset();
        self.apply_case(&first);
    }

    fn apply_case(&mut self, case: &BenchmarkCase) {
        self.settings.work_group_size = case.work_group_size;
        self.settings.num_bounces = case.bounces;
        self.settings.num_lights = case.lights;
        self.settings.set_window_size(case.width, case.height);
        self.settings.clamp();
        self.renderer.request_size(case.width, case.height);
        if let (Some(models), Some(tracer)) = (case.models.as_ref(), self.tracer.as_mut()) {
            tracer.scene.set_active_mask(models);
        }
    }

    fn advance_benchmark(&mut self, dt: f32, timings: &crate::compute::FrameTimings) -> Result<()> {
        let Some(active) = self.benchmark.as_mut() else { return Ok(()) };
        match active.run.advance(dt, timings) {
            BenchmarkStep::Continue => {}
            BenchmarkStep::Apply(case) => {
                log::info!(target: "benchmark", "case {}/{}", active.run.case_index() + 1, active.run.case_count());
                self.apply_case(&case);
            }
            BenchmarkStep::Finished(report) => {
                let output = active.run.output().to_path_buf();
                let restore = active.restore.clone();
                let restore_models = active.restore_models.take();
                self.benchmark = None;
                if let (Some(models), Some(tracer)) = (restore_models, self.tracer.as_mut()) {
                    tracer.scene.set_active_mask(&models);
                }
                report.write_to_path(&output)?;
                log::info!(target: "benchmark", "finished; wrote {}", output.display());
                self.renderer.request_size(restore.width, restore.height);
                self.settings = restore;
            }
        }
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let dt = self.clock.tick();
        if self.benchmark.is_none() {
            self.handle_commands();
        } else {
            self.input.reset();
        }
        let tracer = self.tracer.as_mut().ok_or_else(|| anyhow!("tracer not initialized"))?;
        tracer.scene.camera.travel(self.input.movement(), dt);
        tracer.scene.camera.look(self.input.take_mouse_delta());
        tracer.scene.update(dt, &self.settings);

        let report = tracer.scheduler.run_frame(&mut tracer.backend, &mut tracer.scene, &self.settings, dt)?;
        let display = tracer.scheduler.display().ok_or_else(|| anyhow!("display buffer missing"))?;
        let present = self.renderer.present(&tracer.backend, display)?;

        self.counters.record_frame(&report, present);
        self.session.record_frame(&report.timings);
        self.advance_benchmark(dt, &report.timings)?;
        self.maybe_report();
        Ok(())
    }

    fn maybe_report(&mut self) {
        let period = Duration::from_secs_f32(self.config.timing.report_period_secs.max(0.1));
        let elapsed = self.report_started.elapsed();
        if elapsed < period {
            return;
        }
        let report = self.counters.take_report(elapsed);
        log::info!(target: "timing", "{report}");
        self.report_started = Instant::now();
    }

    /// Writes the session timing snapshot and surfaces the first fatal error.
    pub fn finish(mut self) -> Result<()> {
        if let Some(path) = self.config.timing.snapshot_path.as_ref() {
            match self.session.snapshot("session").write_to_path(path) {
                Ok(()) => log::info!(target: "timing", "wrote timing snapshot {}", path.display()),
                Err(err) => log::warn!(target: "timing", "{err:#}"),
            }
        }
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.renderer.ensure_window(event_loop) {
            self.fail(err.context("Renderer initialization error"));
            event_loop.exit();
            return;
        }
        if self.tracer.is_none() {
            if let Err(err) = self.init_tracer() {
                self.fail(err.context("Tracer initialization error"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.benchmark.is_none() {
            self.input.push(InputEvent::from_window_event(&event));
        }
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => {
                self.renderer.resize(*size);
                // A running benchmark owns the trace resolution.
                if self.benchmark.is_none() {
                    self.settings.set_window_size(size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _el: &ActiveEventLoop, _dev: DeviceId, event: DeviceEvent) {
        if self.benchmark.is_none() {
            self.input.push(InputEvent::from_device_event(&event));
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
            return;
        }
        if self.tracer.is_none() {
            return;
        }
        if let Err(err) = self.frame() {
            self.fail(err);
            event_loop.exit();
        }
    }
}
