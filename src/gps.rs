// gps.rs — GPS reliability scoring, moving-start detection, and distance
// over ground.
//
// Every fix gets a score in [0.1, 1.0] from window accuracy, inter-fix speed
// jumps, and staleness. The fusion core treats GPS as usable only when the
// newest fix is fresh and the score clears the floor.

use std::collections::VecDeque;

use crate::types::GpsFix;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

pub struct ReliabilityEstimator {
    window: VecDeque<GpsFix>,
    window_size: usize,
    score: f64,
    consecutive_zero: u32,
    zero_speed: f64,
    last_fix_ts: Option<f64>,
    max_age: f64,
    min_score: f64,
}

impl ReliabilityEstimator {
    pub fn new(window_size: usize, zero_speed: f64, max_age: f64, min_score: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            score: 0.3,
            consecutive_zero: 0,
            zero_speed,
            last_fix_ts: None,
            max_age,
            min_score,
        }
    }

    /// Score a new fix and fold it into the window.
    pub fn observe(&mut self, fix: &GpsFix) -> f64 {
        let gap = self.last_fix_ts.map(|t| fix.timestamp - t);

        self.window.push_back(fix.clone());
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let mut r: f64 = 1.0;

        let mean_accuracy =
            self.window.iter().map(|f| f.accuracy).sum::<f64>() / self.window.len() as f64;
        if mean_accuracy > 50.0 {
            r *= 0.3;
        } else if mean_accuracy > 20.0 {
            r *= 0.7;
        } else if mean_accuracy > 10.0 {
            r *= 0.9;
        }

        if self.window.len() >= 3 {
            let speeds: Vec<f64> = self.window.iter().filter_map(|f| f.speed).collect();
            let jump = speeds
                .windows(2)
                .map(|w| (w[1] - w[0]).abs())
                .fold(0.0_f64, f64::max);
            if jump > 5.0 {
                r *= 0.5;
            } else if jump > 3.0 {
                r *= 0.7;
            }
        }

        if let Some(dt) = gap {
            if dt > 3.0 {
                r *= 0.5;
            } else if dt > 2.0 {
                r *= 0.7;
            }
        }

        r = if self.window.len() < 2 { 0.3 } else { r.clamp(0.1, 1.0) };

        if let Some(speed) = fix.speed {
            if speed < self.zero_speed {
                self.consecutive_zero += 1;
            } else {
                self.consecutive_zero = 0;
            }
        }

        self.last_fix_ts = Some(fix.timestamp);
        self.score = r;
        r
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn consecutive_zero(&self) -> u32 {
        self.consecutive_zero
    }

    /// Usable by the fusion core: a fix exists, it is fresh, and the score
    /// clears the floor.
    pub fn reliable_at(&self, now: f64) -> bool {
        match self.last_fix_ts {
            Some(ts) => now - ts < self.max_age && self.score > self.min_score,
            None => false,
        }
    }

    pub fn last_fix_age(&self, now: f64) -> Option<f64> {
        self.last_fix_ts.map(|ts| (now - ts).max(0.0))
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.score = 0.3;
        self.consecutive_zero = 0;
        self.last_fix_ts = None;
    }
}

/// Startup decision when tracking begins while the vehicle may already be
/// rolling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartMode {
    Stationary,
    Moving { speed: f64, sigma: f64 },
}

pub struct MovingStartDetector {
    fixes: Vec<GpsFix>,
    run_start: f64,
    min_fixes: usize,
    window_secs: f64,
    max_accuracy: f64,
    min_speed: f64,
    sigma_scale: f64,
}

impl MovingStartDetector {
    pub fn new(
        run_start: f64,
        min_fixes: usize,
        window_secs: f64,
        max_accuracy: f64,
        min_speed: f64,
        sigma_scale: f64,
    ) -> Self {
        Self {
            fixes: Vec::new(),
            run_start,
            min_fixes,
            window_secs,
            max_accuracy,
            min_speed,
            sigma_scale,
        }
    }

    pub fn push(&mut self, fix: GpsFix) {
        self.fixes.push(fix);
    }

    /// Enough evidence to decide: the fix quota arrived, or the window since
    /// the first fix (or since run start, when GPS never shows up) elapsed.
    pub fn ready(&self, now: f64) -> bool {
        if self.fixes.len() >= self.min_fixes {
            return true;
        }
        let reference = self.fixes.first().map_or(self.run_start, |f| f.timestamp);
        now - reference >= self.window_secs
    }

    pub fn evaluate(&self) -> StartMode {
        let usable: Vec<&GpsFix> = self
            .fixes
            .iter()
            .filter(|f| f.accuracy < self.max_accuracy && f.speed.is_some())
            .collect();
        if usable.is_empty() {
            return StartMode::Stationary;
        }
        let n = usable.len() as f64;
        let mean_speed = usable.iter().filter_map(|f| f.speed).sum::<f64>() / n;
        if mean_speed > self.min_speed {
            let mean_accuracy = usable.iter().map(|f| f.accuracy).sum::<f64>() / n;
            StartMode::Moving { speed: mean_speed, sigma: self.sigma_scale * mean_accuracy }
        } else {
            StartMode::Stationary
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DistanceDelta {
    pub meters: f64,
    pub outlier: bool,
}

/// Accumulates great-circle distance over successive fixes, dropping
/// single-step jumps that can only be multipath or a cold-start snap.
pub struct GroundDistance {
    last: Option<(f64, f64)>,
    total: f64,
    outlier_m: f64,
}

impl GroundDistance {
    pub fn new(outlier_m: f64) -> Self {
        Self { last: None, total: 0.0, outlier_m }
    }

    pub fn observe(&mut self, fix: &GpsFix) -> DistanceDelta {
        let mut delta = DistanceDelta::default();
        if let Some((lat, lon)) = self.last {
            let d = haversine_m(lat, lon, fix.latitude, fix.longitude);
            delta.meters = d;
            if d >= self.outlier_m {
                delta.outlier = true;
            } else {
                self.total += d;
            }
        }
        self.last = Some((fix.latitude, fix.longitude));
        delta
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.total = 0.0;
    }
}
