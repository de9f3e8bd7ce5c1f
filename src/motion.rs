// motion.rs — accelerometer preprocessing and the moving/stationary gate.
//
// Turns bias-corrected 3-axis samples into the filtered scalar magnitude the
// fusion core integrates, and owns the sticky Moving/Stationary
// classification consumed downstream.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::types::{AccelSample, AccelSource};

pub const STANDARD_GRAVITY: f64 = 9.81;

/// Raw magnitudes kept for filtering.
const MAG_WINDOW: usize = 20;
/// The filtered value is a trimmed mean over this many most-recent magnitudes.
const TRIM_SPAN: usize = 10;
/// Below this many buffered magnitudes the raw value passes through.
const TRIM_MIN: usize = 5;
const TRIM_FRACTION: f64 = 0.05;
/// Magnitudes above `noise_threshold * SPIKE_FACTOR` are impulsive noise.
const SPIKE_FACTOR: f64 = 5.0;

/// Stationary → Moving at `motion_threshold * ENTER_FACTOR`.
const ENTER_FACTOR: f64 = 2.0;
/// Moving → Stationary requires dropping under `motion_threshold * EXIT_FACTOR`.
const EXIT_FACTOR: f64 = 0.3;
/// Samples under `motion_threshold * STILL_FACTOR` feed the still streak.
const STILL_FACTOR: f64 = 0.5;
const STILL_SAMPLES: u32 = 50;

/// Remove gravity according to the sample's source path. The raw path
/// subtracts g along the device z axis only; under tilt the residual leaks
/// into the magnitude and the tilt-rejection anchor absorbs it downstream.
pub fn remove_gravity(sample: &AccelSample) -> Vector3<f64> {
    match sample.source {
        AccelSource::Linear => Vector3::new(sample.x, sample.y, sample.z),
        AccelSource::Gravity => Vector3::new(sample.x, sample.y, sample.z - STANDARD_GRAVITY),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MotionReading {
    /// Trimmed-mean magnitude in m/s².
    pub filtered: f64,
    pub moving: bool,
    /// The raw magnitude was an impulsive spike and was replaced.
    pub spike: bool,
}

pub struct MotionGate {
    motion_threshold: f64,
    noise_threshold: f64,
    window: VecDeque<f64>,
    last_accepted: f64,
    last_filtered: f64,
    moving: bool,
    still_streak: u32,
}

impl MotionGate {
    pub fn new(motion_threshold: f64, noise_threshold: f64) -> Self {
        Self {
            motion_threshold,
            noise_threshold,
            window: VecDeque::with_capacity(MAG_WINDOW),
            last_accepted: 0.0,
            last_filtered: 0.0,
            moving: false,
            still_streak: 0,
        }
    }

    /// Feed one bias-corrected sample vector.
    pub fn process(&mut self, residual: Vector3<f64>) -> MotionReading {
        let magnitude = residual.norm();

        let spike = magnitude > self.noise_threshold * SPIKE_FACTOR;
        let filtered = if spike {
            // Impulsive noise: reuse the previous output, leave the window alone.
            self.last_filtered
        } else {
            self.last_accepted = magnitude;
            self.window.push_back(magnitude);
            while self.window.len() > MAG_WINDOW {
                self.window.pop_front();
            }
            if self.window.len() >= TRIM_MIN {
                let span = self.window.len().min(TRIM_SPAN);
                let recent: Vec<f64> =
                    self.window.iter().rev().take(span).copied().collect();
                trimmed_mean(&recent)
            } else {
                magnitude
            }
        };
        self.last_filtered = filtered;

        self.classify(filtered);

        MotionReading { filtered, moving: self.moving, spike }
    }

    fn classify(&mut self, filtered: f64) {
        if self.moving {
            if filtered < self.motion_threshold * STILL_FACTOR {
                self.still_streak += 1;
            } else {
                self.still_streak = 0;
            }
            if filtered < self.motion_threshold * EXIT_FACTOR
                && self.still_streak >= STILL_SAMPLES
            {
                self.moving = false;
                self.still_streak = 0;
            }
        } else {
            self.still_streak = 0;
            if filtered > self.motion_threshold * ENTER_FACTOR {
                self.moving = true;
            }
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }
}

fn trimmed_mean(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let trim = (sorted.len() as f64 * TRIM_FRACTION).round() as usize;
    if sorted.len() <= trim * 2 {
        return sorted.iter().sum::<f64>() / sorted.len() as f64;
    }
    let kept = &sorted[trim..sorted.len() - trim];
    kept.iter().sum::<f64>() / kept.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccelSample, AccelSource};

    fn gate() -> MotionGate {
        MotionGate::new(0.5, 2.0)
    }

    #[test]
    fn test_gravity_removed_on_raw_path() {
        let raw = AccelSample {
            timestamp: 0.0,
            x: 0.1,
            y: 0.2,
            z: 9.91,
            source: AccelSource::Gravity,
        };
        let v = remove_gravity(&raw);
        assert!((v.z - 0.1).abs() < 1e-12);

        let linear = AccelSample { source: AccelSource::Linear, ..raw };
        assert!((remove_gravity(&linear).z - 9.91).abs() < 1e-12);
    }

    #[test]
    fn test_passthrough_before_window_fills() {
        let mut g = gate();
        let r = g.process(Vector3::new(1.0, 0.0, 0.0));
        assert!((r.filtered - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spike_reuses_previous_output() {
        let mut g = gate();
        g.process(Vector3::new(0.4, 0.0, 0.0));
        let r = g.process(Vector3::new(50.0, 0.0, 0.0));
        assert!(r.spike);
        assert!((r.filtered - 0.4).abs() < 1e-12);
        // The spike must not have entered the window.
        let r2 = g.process(Vector3::new(0.4, 0.0, 0.0));
        assert!(!r2.spike);
        assert!(r2.filtered < 1.0);
    }

    #[test]
    fn test_trimmed_mean_drops_extremes_at_full_span() {
        // Nine identical values and one outlier; with ten buffered the trim
        // drops one from each end, so the outlier vanishes.
        let mut g = gate();
        for _ in 0..9 {
            g.process(Vector3::new(1.0, 0.0, 0.0));
        }
        let r = g.process(Vector3::new(3.0, 0.0, 0.0));
        assert!((r.filtered - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_enters_moving_above_double_threshold() {
        let mut g = gate();
        for _ in 0..10 {
            let r = g.process(Vector3::new(1.5, 0.0, 0.0));
            assert!(r.filtered <= 1.5);
        }
        assert!(g.is_moving());
    }

    #[test]
    fn test_stays_stationary_below_enter_threshold() {
        let mut g = gate();
        for _ in 0..50 {
            g.process(Vector3::new(0.8, 0.0, 0.0));
        }
        assert!(!g.is_moving());
    }

    #[test]
    fn test_exit_requires_sustained_quiet() {
        let mut g = gate();
        for _ in 0..20 {
            g.process(Vector3::new(2.0, 0.0, 0.0));
        }
        assert!(g.is_moving());

        // A short quiet burst is not enough.
        for _ in 0..20 {
            g.process(Vector3::new(0.05, 0.0, 0.0));
        }
        assert!(g.is_moving());

        // Fifty consecutive quiet samples flip the gate.
        for _ in 0..60 {
            g.process(Vector3::new(0.05, 0.0, 0.0));
        }
        assert!(!g.is_moving());
    }

    #[test]
    fn test_loud_sample_resets_still_streak() {
        let mut g = gate();
        for _ in 0..20 {
            g.process(Vector3::new(2.0, 0.0, 0.0));
        }
        for _ in 0..40 {
            g.process(Vector3::new(0.05, 0.0, 0.0));
        }
        // Streak broken right before it would have completed.
        for _ in 0..10 {
            g.process(Vector3::new(2.0, 0.0, 0.0));
        }
        for _ in 0..40 {
            g.process(Vector3::new(0.05, 0.0, 0.0));
        }
        assert!(g.is_moving());
    }
}
