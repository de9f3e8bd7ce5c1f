// events.rs — launch, speed-checkpoint, and distance-milestone detection on
// the fused signal.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::{DistanceTarget, EngineConfig, SpeedTarget};

/// Everything the engine reports while a run is active. The three timing
/// events (`LaunchDetected`, `SpeedCheckpoint`, `DistanceMilestone`) fire at
/// most once per run; the rest are diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EngineEvent {
    LaunchDetected { elapsed_secs: f64 },
    SpeedCheckpoint { id: String, elapsed_secs: f64 },
    DistanceMilestone { id: String, elapsed_secs: f64, speed_m_s: f64 },
    MovingStartDetected { speed_m_s: f64 },
    CalibrationComplete,
    TickGapDiscarded { gap_secs: f64, anchored_to: f64 },
    HardZeroApplied { stationary_secs: f64 },
    DistanceReconciled { factor: f64, velocity_snapped: bool },
    DistanceOutlierDropped { meters: f64 },
    SanityReset { speed_m_s: f64 },
}

impl EngineEvent {
    /// The three per-run timing results, as opposed to diagnostics.
    pub fn is_timing(&self) -> bool {
        matches!(
            self,
            EngineEvent::LaunchDetected { .. }
                | EngineEvent::SpeedCheckpoint { .. }
                | EngineEvent::DistanceMilestone { .. }
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointResult {
    pub id: String,
    pub elapsed_secs: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MilestoneResult {
    pub id: String,
    pub elapsed_secs: f64,
    pub speed_m_s: f64,
}

#[derive(Clone, Copy, Debug)]
struct LaunchSample {
    t: f64,
    filtered: f64,
    moving: bool,
}

struct SpeedProgress {
    target: SpeedTarget,
    /// A checkpoint arms once the fused speed has been seen below `from`.
    armed: bool,
    achieved: Option<f64>,
}

struct DistanceProgress {
    target: DistanceTarget,
    achieved: Option<(f64, f64)>,
}

pub struct EventDetector {
    buffer: VecDeque<LaunchSample>,
    run_start: f64,
    launch_time: Option<f64>,
    speed: Vec<SpeedProgress>,
    distance: Vec<DistanceProgress>,
}

impl EventDetector {
    pub fn new(cfg: &EngineConfig, run_start: f64) -> Self {
        Self {
            buffer: VecDeque::new(),
            run_start,
            launch_time: None,
            speed: cfg
                .speed_targets
                .iter()
                .map(|t| SpeedProgress {
                    armed: t.from_m_s <= 0.0,
                    target: t.clone(),
                    achieved: None,
                })
                .collect(),
            distance: cfg
                .distance_targets
                .iter()
                .map(|t| DistanceProgress { target: t.clone(), achieved: None })
                .collect(),
        }
    }

    pub fn launched(&self) -> bool {
        self.launch_time.is_some()
    }

    pub fn launch_time(&self) -> Option<f64> {
        self.launch_time
    }

    /// Elapsed-time origin: launch when one was detected, run start before.
    pub fn time_basis(&self) -> f64 {
        self.launch_time.unwrap_or(self.run_start)
    }

    pub fn on_tick(
        &mut self,
        cfg: &EngineConfig,
        t: f64,
        filtered: f64,
        moving: bool,
        v_fused: f64,
        distance_m: f64,
    ) -> Vec<EngineEvent> {
        let mut out = Vec::new();

        self.buffer.push_back(LaunchSample { t, filtered, moving });
        while self
            .buffer
            .front()
            .map_or(false, |s| s.t < t - cfg.launch_buffer_secs)
        {
            self.buffer.pop_front();
        }

        if self.launch_time.is_none() && self.launch_conditions(cfg, t, v_fused) {
            self.launch_time = Some(t);
            out.push(EngineEvent::LaunchDetected { elapsed_secs: t - self.run_start });
        }

        let basis = self.time_basis();

        for sp in &mut self.speed {
            if !sp.armed && v_fused < sp.target.from_m_s {
                sp.armed = true;
            }
            if sp.armed && sp.achieved.is_none() && v_fused >= sp.target.to_m_s {
                let elapsed = t - basis;
                sp.achieved = Some(elapsed);
                out.push(EngineEvent::SpeedCheckpoint {
                    id: sp.target.id.clone(),
                    elapsed_secs: elapsed,
                });
            }
        }

        for dp in &mut self.distance {
            if dp.achieved.is_none() && distance_m >= dp.target.meters {
                let elapsed = t - basis;
                dp.achieved = Some((elapsed, v_fused));
                out.push(EngineEvent::DistanceMilestone {
                    id: dp.target.id.clone(),
                    elapsed_secs: elapsed,
                    speed_m_s: v_fused,
                });
            }
        }

        out
    }

    /// Launch needs all three: a strict streak of strong samples, real fused
    /// speed, and a dense half-second of sustained acceleration.
    fn launch_conditions(&self, cfg: &EngineConfig, t: f64, v_fused: f64) -> bool {
        if v_fused <= cfg.launch_min_speed {
            return false;
        }

        if self.buffer.len() < cfg.launch_strict_samples {
            return false;
        }
        let strict = self
            .buffer
            .iter()
            .rev()
            .take(cfg.launch_strict_samples)
            .all(|s| s.filtered > cfg.launch_accel_threshold && s.moving);
        if !strict {
            return false;
        }

        let recent: Vec<&LaunchSample> = self
            .buffer
            .iter()
            .filter(|s| s.t >= t - cfg.launch_recent_window)
            .collect();
        if recent.len() < cfg.launch_recent_min_samples {
            return false;
        }
        let strong = recent
            .iter()
            .filter(|s| s.filtered > cfg.launch_recent_accel && s.moving)
            .count();
        strong as f64 >= cfg.launch_recent_ratio * recent.len() as f64
    }

    pub fn checkpoint_results(&self) -> Vec<CheckpointResult> {
        self.speed
            .iter()
            .filter_map(|sp| {
                sp.achieved.map(|elapsed_secs| CheckpointResult {
                    id: sp.target.id.clone(),
                    elapsed_secs,
                })
            })
            .collect()
    }

    pub fn milestone_results(&self) -> Vec<MilestoneResult> {
        self.distance
            .iter()
            .filter_map(|dp| {
                dp.achieved.map(|(elapsed_secs, speed_m_s)| MilestoneResult {
                    id: dp.target.id.clone(),
                    elapsed_secs,
                    speed_m_s,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistanceTarget, SpeedTarget};

    fn cfg() -> EngineConfig {
        EngineConfig {
            speed_targets: vec![
                SpeedTarget::new("0-60mph", 0.0, 26.8224),
                SpeedTarget::new("60-100mph", 26.8224, 44.704),
            ],
            distance_targets: vec![DistanceTarget::new("1/8mile", 201.168)],
            ..EngineConfig::default()
        }
    }

    /// Drive 100 Hz ticks with constant inputs.
    fn feed(
        det: &mut EventDetector,
        cfg: &EngineConfig,
        from: f64,
        secs: f64,
        filtered: f64,
        moving: bool,
        v: f64,
        d: f64,
    ) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        let ticks = (secs * 100.0) as usize;
        for i in 0..ticks {
            let t = from + i as f64 * 0.01;
            out.extend(det.on_tick(cfg, t, filtered, moving, v, d));
        }
        out
    }

    #[test]
    fn test_launch_fires_once_on_sustained_acceleration() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        let quiet = feed(&mut det, &cfg, 0.0, 1.0, 0.1, false, 0.0, 0.0);
        assert!(quiet.is_empty());
        assert!(!det.launched());

        let events = feed(&mut det, &cfg, 1.0, 1.0, 3.0, true, 5.0, 0.0);
        let launches: Vec<&EngineEvent> = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::LaunchDetected { .. }))
            .collect();
        assert_eq!(launches.len(), 1);
        assert!(det.launched());
        // Needs the dense half-second, so just over 0.5 s into the burst.
        let lt = det.launch_time().unwrap();
        assert!(lt >= 1.4 && lt <= 1.7);
    }

    #[test]
    fn test_launch_rejects_brief_spike() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        feed(&mut det, &cfg, 0.0, 1.0, 0.1, false, 0.0, 0.0);
        // A fifth of a second of shaking is not a launch.
        feed(&mut det, &cfg, 1.0, 0.2, 3.0, true, 5.0, 0.0);
        let events = feed(&mut det, &cfg, 1.2, 0.5, 0.1, false, 0.0, 0.0);
        assert!(events.is_empty());
        assert!(!det.launched());
    }

    #[test]
    fn test_checkpoint_uses_launch_basis() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        feed(&mut det, &cfg, 0.0, 1.0, 3.0, true, 5.0, 0.0);
        let lt = det.launch_time().unwrap();

        let events = feed(&mut det, &cfg, 1.0, 0.1, 3.0, true, 27.0, 0.0);
        match events.first() {
            Some(EngineEvent::SpeedCheckpoint { id, elapsed_secs }) => {
                assert_eq!(id, "0-60mph");
                assert!((elapsed_secs - (1.0 - lt)).abs() < 1e-9);
            }
            other => panic!("expected checkpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_checkpoint_fires_once() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        let events = feed(&mut det, &cfg, 0.0, 2.0, 3.0, true, 30.0, 0.0);
        let checkpoints = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::SpeedCheckpoint { .. }))
            .count();
        assert_eq!(checkpoints, 1);
    }

    #[test]
    fn test_gated_checkpoint_needs_prior_slow_observation() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        // Cruising through 100 mph without ever being under 60: no 60-100.
        let events = feed(&mut det, &cfg, 0.0, 1.0, 3.0, true, 50.0, 0.0);
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::SpeedCheckpoint { id, .. } if id == "60-100mph")));

        // Drop below 60 mph, then climb again: now it reports.
        feed(&mut det, &cfg, 1.0, 0.5, 3.0, true, 20.0, 0.0);
        let events = feed(&mut det, &cfg, 1.5, 0.5, 3.0, true, 50.0, 0.0);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::SpeedCheckpoint { id, .. } if id == "60-100mph")));
    }

    #[test]
    fn test_milestone_carries_crossing_speed() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        feed(&mut det, &cfg, 0.0, 1.0, 3.0, true, 30.0, 150.0);
        let events = feed(&mut det, &cfg, 1.0, 0.1, 3.0, true, 39.0, 250.0);
        match events.first() {
            Some(EngineEvent::DistanceMilestone { id, speed_m_s, .. }) => {
                assert_eq!(id, "1/8mile");
                assert!((speed_m_s - 39.0).abs() < 1e-9);
            }
            other => panic!("expected milestone, got {:?}", other),
        }
    }

    #[test]
    fn test_results_collect_achieved_targets() {
        let cfg = cfg();
        let mut det = EventDetector::new(&cfg, 0.0);
        feed(&mut det, &cfg, 0.0, 1.0, 3.0, true, 30.0, 250.0);
        let checkpoints = det.checkpoint_results();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].id, "0-60mph");
        let milestones = det.milestone_results();
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].id, "1/8mile");
    }
}
