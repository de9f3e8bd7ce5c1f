// fusion.rs — the scalar fused-speed estimator.
//
// One speed, one uncertainty. Accelerometer ticks integrate the filtered
// magnitude into `v_accel` and grow `sigma`; GPS fixes pull `v_fused` toward
// the measured speed with a scalar Kalman-style gain and shrink `sigma`.
// Zero anchors keep a parked phone from drifting, and the sanity cap keeps a
// corrupted tick from ever reaching the display.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusedState {
    /// Published speed estimate, m/s, never negative.
    pub v_fused: f64,
    /// Dead-reckoned speed since the last GPS correction.
    pub v_accel: f64,
    /// Scalar uncertainty of `v_fused`, m/s.
    pub sigma: f64,
    /// Distance from integrating `v_fused`, metres.
    pub distance_accel: f64,
    /// Distance from great-circle sums of successive fixes, metres.
    pub distance_gps: f64,
    pub moving: bool,
    /// Seconds of continuous non-motion.
    pub stationary_secs: f64,
}

impl FusedState {
    fn new(sigma: f64) -> Self {
        Self {
            v_fused: 0.0,
            v_accel: 0.0,
            sigma,
            distance_accel: 0.0,
            distance_gps: 0.0,
            moving: false,
            stationary_secs: 0.0,
        }
    }
}

/// What the fusion core needs to know about GPS on a given update.
#[derive(Clone, Copy, Debug)]
pub struct GpsView {
    pub reliable: bool,
    pub score: f64,
    /// Last known GPS ground speed; None until a fix has carried one.
    pub speed: Option<f64>,
    pub consecutive_zero: u32,
}

impl GpsView {
    pub fn absent() -> Self {
        Self { reliable: false, score: 0.3, speed: None, consecutive_zero: 0 }
    }
}

/// Side effects of one accelerometer tick, for the caller to act on.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickEffects {
    pub gap_discarded: bool,
    /// Hard zero applied; the caller re-calibrates bias on this signal.
    pub hard_zero: bool,
    pub sanity_reset: bool,
    /// Correction factor `distance_gps / distance_accel` when reconciliation
    /// snapped the integrated distance.
    pub reconciled: Option<f64>,
    pub velocity_snapped: bool,
}

pub struct FusionCore {
    state: FusedState,
    display: VecDeque<f64>,
    last_tick_ts: Option<f64>,
    /// Last time sigma was advanced, shared by ticks and fixes.
    last_sigma_ts: Option<f64>,
    last_reconcile_ts: f64,
}

impl FusionCore {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            state: FusedState::new(cfg.sigma_start),
            display: VecDeque::with_capacity(cfg.display_window),
            last_tick_ts: None,
            last_sigma_ts: None,
            last_reconcile_ts: 0.0,
        }
    }

    pub fn begin_run(&mut self, cfg: &EngineConfig, now: f64) {
        self.state = FusedState::new(cfg.sigma_start);
        self.display.clear();
        self.last_tick_ts = None;
        self.last_sigma_ts = None;
        self.last_reconcile_ts = now;
    }

    pub fn state(&self) -> &FusedState {
        &self.state
    }

    /// Seed the estimate when GPS shows the vehicle already rolling at
    /// run start.
    pub fn seed_moving_start(&mut self, cfg: &EngineConfig, speed: f64, sigma: f64) {
        self.state.v_fused = speed;
        self.state.v_accel = speed;
        self.state.sigma = sigma.max(cfg.sigma_min);
    }

    pub fn add_gps_distance(&mut self, meters: f64) {
        self.state.distance_gps += meters;
    }

    /// One accelerometer tick.
    pub fn on_tick(
        &mut self,
        cfg: &EngineConfig,
        t: f64,
        filtered: f64,
        moving: bool,
        gps: GpsView,
    ) -> TickEffects {
        let mut fx = TickEffects::default();
        let prev = self.last_tick_ts.unwrap_or(t);
        if t < prev {
            // Out-of-order sample; nothing useful to integrate.
            return fx;
        }
        let mut dt = t - prev;

        self.state.moving = moving;

        // A long silence means the process was backgrounded. Whatever the
        // integrator thinks now is stale: re-anchor and skip integration.
        if dt > cfg.dt_gap {
            let anchor = if gps.reliable { gps.speed.unwrap_or(0.0) } else { 0.0 };
            self.state.v_fused = anchor;
            self.state.v_accel = anchor;
            self.state.sigma = cfg.gap_sigma;
            self.display.clear();
            self.stamp(t);
            fx.gap_discarded = true;
            return fx;
        }

        dt = dt.min(cfg.dt_cap);

        if !moving && filtered < cfg.motion_threshold {
            self.state.stationary_secs += dt;
        } else {
            self.state.stationary_secs = 0.0;
        }

        // Hard anchor: long confirmed standstill with GPS absent or agreeing.
        let gps_slow = gps.speed.map_or(true, |s| s < cfg.zero_gps_speed);
        if self.state.stationary_secs > cfg.stationary_forced_zero_secs
            && (!gps.reliable || gps_slow)
        {
            self.state.v_fused = 0.0;
            self.state.v_accel = 0.0;
            self.state.sigma = cfg.hard_zero_sigma;
            self.display.clear();
            self.display.push_back(0.0);
            self.stamp(t);
            fx.hard_zero = true;
            return fx;
        }

        // Dead-reckoning integration. Uncertainty grows with time whether or
        // not the gate lets the magnitude integrate; GPS shrinks it back.
        if moving && filtered > cfg.motion_threshold {
            self.state.v_accel += filtered * dt;
        }
        self.state.sigma += cfg.drift_rate * dt;

        match (gps.reliable, gps.speed) {
            (true, Some(v_gps)) => {
                let w = (0.5 + 0.3 * gps.score).min(cfg.max_gps_weight);
                self.state.v_fused = w * v_gps + (1.0 - w) * self.state.v_accel;
                if (self.state.v_accel - v_gps).abs() > cfg.accel_pull_threshold {
                    self.state.v_accel = cfg.accel_pull_keep * self.state.v_accel
                        + (1.0 - cfg.accel_pull_keep) * v_gps;
                }
            }
            _ => {
                self.state.v_fused = self.state.v_accel;
                if !moving || filtered < 0.5 * cfg.motion_threshold {
                    self.state.v_fused *= cfg.idle_decay.powf(dt);
                    self.state.v_accel = self.state.v_fused;
                }
            }
        }

        // Soft anchors.
        if gps.reliable {
            if let Some(v_gps) = gps.speed {
                if v_gps < cfg.soft_zero_gps_speed
                    && gps.consecutive_zero >= cfg.consecutive_zero_fixes
                {
                    self.zero_velocity();
                }
            }
        }
        if !moving && self.state.v_fused < cfg.soft_zero_max_speed {
            let gps_confirms = gps.reliable
                && gps.speed.map_or(false, |s| s < cfg.soft_zero_confirm_speed);
            if gps_confirms || self.state.v_fused < cfg.tilt_reject_speed {
                self.zero_velocity();
            }
        }

        // Distance reconciliation on a coarse deadline.
        if t - self.last_reconcile_ts >= cfg.reconcile_interval
            && self.state.distance_accel > cfg.reconcile_min_distance
            && self.state.distance_gps > 0.0
        {
            self.last_reconcile_ts = t;
            let rel = (self.state.distance_accel - self.state.distance_gps).abs()
                / self.state.distance_accel;
            if rel > cfg.reconcile_rel_error && gps.reliable {
                let factor = self.state.distance_gps / self.state.distance_accel;
                self.state.distance_accel = self.state.distance_gps;
                fx.reconciled = Some(factor);
                if factor < cfg.reconcile_snap_low || factor > cfg.reconcile_snap_high {
                    if let Some(v_gps) = gps.speed {
                        self.state.v_fused = v_gps;
                        self.state.v_accel = v_gps;
                        fx.velocity_snapped = true;
                    }
                }
            }
        }

        self.state.v_fused = self.state.v_fused.max(0.0);
        self.state.v_accel = self.state.v_accel.max(0.0);

        // Sanity cap before anything reaches the display ring.
        if self.state.v_fused > cfg.v_max {
            let reset_to = if gps.reliable { gps.speed.unwrap_or(0.0) } else { 0.0 };
            self.state.v_fused = reset_to;
            self.state.v_accel = reset_to;
            self.display.clear();
            fx.sanity_reset = true;
        }

        self.display.push_back(self.state.v_fused);
        while self.display.len() > cfg.display_window {
            self.display.pop_front();
        }

        if self.state.v_fused > cfg.distance_min_speed {
            self.state.distance_accel += self.state.v_fused * dt;
        }

        self.state.sigma = self.state.sigma.max(cfg.sigma_min);
        self.stamp(t);
        fx
    }

    /// One GPS fix: scalar Kalman-style correction, then the consecutive-zero
    /// anchor. Position-only fixes (no speed) leave the estimate alone.
    ///
    /// Returns true when the fix forced a hard zero.
    pub fn on_gps(
        &mut self,
        cfg: &EngineConfig,
        t: f64,
        fix_speed: Option<f64>,
        accuracy: f64,
        gps: GpsView,
    ) -> bool {
        if let Some(v_gps) = fix_speed {
            let sigma_gps = (accuracy * cfg.gps_sigma_scale).max(cfg.gps_sigma_floor)
                / gps.score.max(0.1);
            let since = self
                .last_sigma_ts
                .map(|ts| (t - ts).max(0.0))
                .unwrap_or(0.0);
            self.state.sigma += cfg.drift_rate * since;

            let k = self.state.sigma / (self.state.sigma + sigma_gps).max(0.1);
            self.state.v_fused += k * (v_gps - self.state.v_fused);
            self.state.v_fused = self.state.v_fused.max(0.0);
            self.state.sigma = ((1.0 - k) * self.state.sigma).max(cfg.sigma_min);

            // Re-anchor the dead-reckoning integrator on the corrected value.
            self.state.v_accel = self.state.v_fused;
            self.last_sigma_ts = Some(t);
        }

        if gps.reliable
            && fix_speed.map_or(false, |s| s < cfg.soft_zero_gps_speed)
            && gps.consecutive_zero >= cfg.consecutive_zero_fixes
        {
            self.state.v_fused = 0.0;
            self.state.v_accel = 0.0;
            self.state.sigma = cfg.hard_zero_sigma;
            self.display.clear();
            self.display.push_back(0.0);
            return true;
        }
        false
    }

    /// Display-side speed: median over the short ring once it has enough
    /// samples, the raw estimate before that.
    pub fn display_speed(&self, cfg: &EngineConfig) -> f64 {
        if self.display.len() < cfg.display_min_samples {
            return self.state.v_fused;
        }
        let mut sorted: Vec<f64> = self.display.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        }
    }

    fn zero_velocity(&mut self) {
        self.state.v_fused = 0.0;
        self.state.v_accel = 0.0;
    }

    fn stamp(&mut self, t: f64) {
        self.last_tick_ts = Some(t);
        self.last_sigma_ts = Some(t);
    }
}
