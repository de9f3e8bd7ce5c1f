// engine.rs — the sensor fusion engine.
//
// Owns every estimator stage and exposes the operations the app drives:
// push_accel / push_gps on the platform's sensor callbacks, start_run /
// stop_run / reset from the UI, snapshot() polled by the display at its own
// cadence. Single event loop, no locks; inputs are processed strictly in
// arrival order.

use serde::{Deserialize, Serialize};

use crate::calibration::BiasCalibrator;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventDetector};
use crate::fusion::{FusionCore, GpsView};
use crate::gps::{GroundDistance, MovingStartDetector, ReliabilityEstimator, StartMode};
use crate::motion::{remove_gravity, MotionGate};
use crate::status::RunSummary;
use crate::types::{AccelSample, AccelSource, GpsFix};

/// State polled by the display collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    /// Display-smoothed fused speed, m/s.
    pub speed_m_s: f64,
    pub distance_m: f64,
    pub moving: bool,
    pub launched: bool,
    pub calibrated: bool,
    pub gps_reliable: bool,
    pub gps_reliability: f64,
    pub sigma: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EngineCounters {
    pub accel_samples: u64,
    pub spikes_rejected: u64,
    pub ticks_discarded: u64,
    pub gps_fixes: u64,
    pub gps_outliers_dropped: u64,
    pub hard_zeros: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RunPhase {
    Idle,
    /// Collecting initial fixes for the moving-start decision.
    Startup,
    Tracking,
}

pub struct SpeedEngine {
    config: EngineConfig,
    phase: RunPhase,
    calibrator: BiasCalibrator,
    motion: MotionGate,
    reliability: ReliabilityEstimator,
    ground: GroundDistance,
    fusion: FusionCore,
    detector: Option<EventDetector>,
    moving_start: Option<MovingStartDetector>,
    run_start: Option<f64>,
    last_accel_ts: Option<f64>,
    last_input_ts: f64,
    last_gps_speed: Option<f64>,
    counters: EngineCounters,
    run_events: Vec<EngineEvent>,
}

impl SpeedEngine {
    pub fn new(config: EngineConfig) -> Self {
        let calibrator = BiasCalibrator::new(
            config.calibration_window_secs,
            config.calibration_min_samples,
            config.bias_blend,
            config.residual_window,
        );
        let motion = MotionGate::new(config.motion_threshold, config.noise_threshold);
        let reliability = ReliabilityEstimator::new(
            config.reliability_window,
            config.zero_gps_speed,
            config.gps_reliable_max_age,
            config.gps_reliable_min_score,
        );
        let ground = GroundDistance::new(config.distance_outlier_m);
        let fusion = FusionCore::new(&config);
        Self {
            phase: RunPhase::Idle,
            calibrator,
            motion,
            reliability,
            ground,
            fusion,
            detector: None,
            moving_start: None,
            run_start: None,
            last_accel_ts: None,
            last_input_ts: 0.0,
            last_gps_speed: None,
            counters: EngineCounters::default(),
            run_events: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Run lifecycle ────────────────────────────────────────────────────

    /// Begin a run. Bias survives from previous runs; everything else is
    /// rebuilt. Whether calibration runs waits on the moving-start decision.
    pub fn start_run(&mut self, now_ms: f64) {
        let now = now_ms / 1000.0;
        self.phase = RunPhase::Startup;
        self.run_start = Some(now);
        self.last_accel_ts = None;
        self.last_input_ts = now;
        self.last_gps_speed = None;
        self.motion = MotionGate::new(self.config.motion_threshold, self.config.noise_threshold);
        self.reliability.reset();
        self.ground.reset();
        self.fusion.begin_run(&self.config, now);
        self.detector = Some(EventDetector::new(&self.config, now));
        self.moving_start = Some(MovingStartDetector::new(
            now,
            self.config.start_fix_count,
            self.config.start_window_secs,
            self.config.start_max_accuracy_m,
            self.config.start_min_speed,
            self.config.moving_start_sigma_scale,
        ));
        self.counters = EngineCounters::default();
        self.run_events.clear();
    }

    /// Stop scheduling updates and flush a final snapshot. Timing results
    /// stay readable through `summary()` until the next run.
    pub fn stop_run(&mut self, now_ms: f64) -> Snapshot {
        self.last_input_ts = now_ms / 1000.0;
        self.phase = RunPhase::Idle;
        self.moving_start = None;
        self.snapshot()
    }

    /// Factory reset: identical to a freshly constructed engine, bias
    /// included.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = SpeedEngine::new(config);
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    /// Raw accelerometer callback; `t_ms` is a monotonic millisecond clock.
    pub fn push_accel(
        &mut self,
        ax: f64,
        ay: f64,
        az: f64,
        t_ms: f64,
        linear: bool,
    ) -> Vec<EngineEvent> {
        let sample = AccelSample {
            timestamp: t_ms / 1000.0,
            x: ax,
            y: ay,
            z: az,
            source: if linear { AccelSource::Linear } else { AccelSource::Gravity },
        };
        self.push_accel_sample(&sample)
    }

    /// Location callback. A missing accuracy falls back to the configured
    /// default; a negative speed is discarded and the fix becomes
    /// position-only.
    pub fn push_gps(
        &mut self,
        latitude: f64,
        longitude: f64,
        speed_m_s: Option<f64>,
        accuracy_m: Option<f64>,
        t_ms: f64,
    ) -> Vec<EngineEvent> {
        let fix = GpsFix {
            timestamp: t_ms / 1000.0,
            latitude,
            longitude,
            speed: speed_m_s.filter(|s| *s >= 0.0),
            accuracy: accuracy_m.unwrap_or(self.config.default_accuracy_m),
        };
        self.push_gps_fix(&fix)
    }

    pub fn push_accel_sample(&mut self, sample: &AccelSample) -> Vec<EngineEvent> {
        if self.phase == RunPhase::Idle {
            return Vec::new();
        }
        let t = sample.timestamp;
        let gap = self.last_accel_ts.map_or(0.0, |prev| t - prev);
        self.last_accel_ts = Some(t);
        self.last_input_ts = t;
        self.counters.accel_samples += 1;

        let mut events = Vec::new();
        self.poll_startup(t, &mut events);

        let raw = remove_gravity(sample);
        if self.calibrator.window_active() && self.calibrator.collect(raw, t) {
            events.push(EngineEvent::CalibrationComplete);
        }
        let residual = raw - self.calibrator.bias();
        let reading = self.motion.process(residual);
        if reading.spike {
            self.counters.spikes_rejected += 1;
        }
        self.calibrator.observe_residual(residual);

        let gps = self.gps_view(t);
        let fx = self.fusion.on_tick(&self.config, t, reading.filtered, reading.moving, gps);

        if fx.gap_discarded {
            self.counters.ticks_discarded += 1;
            events.push(EngineEvent::TickGapDiscarded {
                gap_secs: gap,
                anchored_to: self.fusion.state().v_fused,
            });
            return events;
        }
        if fx.hard_zero {
            self.counters.hard_zeros += 1;
            self.calibrator.recalibrate();
            events.push(EngineEvent::HardZeroApplied {
                stationary_secs: self.fusion.state().stationary_secs,
            });
            return events;
        }
        if let Some(factor) = fx.reconciled {
            events.push(EngineEvent::DistanceReconciled {
                factor,
                velocity_snapped: fx.velocity_snapped,
            });
        }
        if fx.sanity_reset {
            events.push(EngineEvent::SanityReset { speed_m_s: self.fusion.state().v_fused });
        }

        let (v_fused, distance) = {
            let st = self.fusion.state();
            (st.v_fused, st.distance_accel)
        };
        if let Some(det) = self.detector.as_mut() {
            let detected =
                det.on_tick(&self.config, t, reading.filtered, reading.moving, v_fused, distance);
            for e in &detected {
                if e.is_timing() {
                    self.run_events.push(e.clone());
                }
            }
            events.extend(detected);
        }
        events
    }

    pub fn push_gps_fix(&mut self, fix: &GpsFix) -> Vec<EngineEvent> {
        if self.phase == RunPhase::Idle {
            return Vec::new();
        }
        let t = fix.timestamp;
        self.last_input_ts = t;
        self.counters.gps_fixes += 1;

        let mut events = Vec::new();

        let was_startup = self.phase == RunPhase::Startup;
        if was_startup {
            if let Some(ms) = self.moving_start.as_mut() {
                ms.push(fix.clone());
            }
        }
        // The calibration deadline can also expire between accel samples.
        if self.calibrator.poll_window(t) {
            events.push(EngineEvent::CalibrationComplete);
        }

        self.reliability.observe(fix);
        let delta = self.ground.observe(fix);
        if delta.outlier {
            self.counters.gps_outliers_dropped += 1;
            events.push(EngineEvent::DistanceOutlierDropped { meters: delta.meters });
        } else if delta.meters > 0.0 {
            self.fusion.add_gps_distance(delta.meters);
        }
        if let Some(speed) = fix.speed {
            self.last_gps_speed = Some(speed);
        }

        self.poll_startup(t, &mut events);

        // The fix that resolves startup only seeds the estimate; Kalman
        // corrections begin with the next one.
        if self.phase == RunPhase::Tracking && !was_startup {
            let view = self.gps_view(t);
            if self.fusion.on_gps(&self.config, t, fix.speed, fix.accuracy, view) {
                self.counters.hard_zeros += 1;
                self.calibrator.recalibrate();
                events.push(EngineEvent::HardZeroApplied {
                    stationary_secs: self.fusion.state().stationary_secs,
                });
            }
        }
        events
    }

    // ── Outputs ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        let st = self.fusion.state();
        Snapshot {
            speed_m_s: self
                .fusion
                .display_speed(&self.config)
                .clamp(0.0, self.config.v_max),
            distance_m: st.distance_accel,
            moving: st.moving,
            launched: self.detector.as_ref().map_or(false, |d| d.launched()),
            calibrated: self.calibrator.is_calibrated(),
            gps_reliable: self.reliability.reliable_at(self.last_input_ts),
            gps_reliability: self.reliability.score(),
            sigma: st.sigma,
        }
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    /// Timing events queued since the last drain.
    pub fn drain_run_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.run_events)
    }

    pub fn summary(&self) -> RunSummary {
        let snap = self.snapshot();
        RunSummary {
            timestamp: self.last_input_ts,
            duration_secs: self
                .run_start
                .map_or(0.0, |s| (self.last_input_ts - s).max(0.0)),
            speed_m_s: snap.speed_m_s,
            distance_m: snap.distance_m,
            launched: snap.launched,
            calibrated: snap.calibrated,
            gps_reliability: snap.gps_reliability,
            counters: self.counters,
            checkpoints: self
                .detector
                .as_ref()
                .map_or_else(Vec::new, |d| d.checkpoint_results()),
            milestones: self
                .detector
                .as_ref()
                .map_or_else(Vec::new, |d| d.milestone_results()),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn gps_view(&self, now: f64) -> GpsView {
        GpsView {
            reliable: self.reliability.reliable_at(now),
            score: self.reliability.score(),
            speed: self.last_gps_speed,
            consecutive_zero: self.reliability.consecutive_zero(),
        }
    }

    /// Resolve the startup phase once the moving-start detector has enough
    /// evidence (or its window lapsed with no GPS at all).
    fn poll_startup(&mut self, now: f64, events: &mut Vec<EngineEvent>) {
        if self.phase != RunPhase::Startup {
            return;
        }
        let ready = self.moving_start.as_ref().map_or(true, |ms| ms.ready(now));
        if !ready {
            return;
        }
        let mode = self
            .moving_start
            .take()
            .map_or(StartMode::Stationary, |ms| ms.evaluate());
        self.phase = RunPhase::Tracking;
        match mode {
            StartMode::Moving { speed, sigma } => {
                self.fusion.seed_moving_start(&self.config, speed, sigma);
                self.calibrator.mark_calibrated();
                events.push(EngineEvent::MovingStartDetected { speed_m_s: speed });
            }
            StartMode::Stationary => {
                if !self.calibrator.is_calibrated() {
                    self.calibrator.begin_window(now);
                }
            }
        }
    }
}
