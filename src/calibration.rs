// calibration.rs — per-axis accelerometer bias estimation.
//
// An initial stationary window seeds the bias with per-axis medians; after
// that, confirmed stationary intervals nudge the bias toward the observed
// residual so thermal drift is absorbed without destabilising the estimate.

use std::collections::VecDeque;

use nalgebra::Vector3;

struct CalibrationWindow {
    started_at: f64,
    samples: Vec<Vector3<f64>>,
}

pub struct BiasCalibrator {
    bias: Vector3<f64>,
    calibrated: bool,
    window: Option<CalibrationWindow>,
    residuals: VecDeque<Vector3<f64>>,
    window_secs: f64,
    min_samples: usize,
    blend: f64,
    residual_window: usize,
}

impl BiasCalibrator {
    pub fn new(window_secs: f64, min_samples: usize, blend: f64, residual_window: usize) -> Self {
        Self {
            bias: Vector3::zeros(),
            calibrated: false,
            window: None,
            residuals: VecDeque::with_capacity(residual_window),
            window_secs,
            min_samples,
            blend,
            residual_window,
        }
    }

    pub fn bias(&self) -> Vector3<f64> {
        self.bias
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn window_active(&self) -> bool {
        self.window.is_some()
    }

    /// Open the initial stationary collection window.
    pub fn begin_window(&mut self, now: f64) {
        self.window = Some(CalibrationWindow { started_at: now, samples: Vec::new() });
    }

    /// Mark calibrated without a window (moving start keeps the prior bias).
    pub fn mark_calibrated(&mut self) {
        self.window = None;
        self.calibrated = true;
    }

    /// Feed one gravity-removed sample while the window is open. Returns true
    /// when this sample closed the window.
    pub fn collect(&mut self, sample: Vector3<f64>, now: f64) -> bool {
        let done = match self.window.as_mut() {
            Some(w) => {
                w.samples.push(sample);
                now - w.started_at >= self.window_secs
            }
            None => false,
        };
        if done {
            self.close_window();
        }
        done
    }

    /// Deadline check for a window that stopped receiving samples. Returns
    /// true when the window just closed.
    pub fn poll_window(&mut self, now: f64) -> bool {
        let done = match self.window.as_ref() {
            Some(w) => now - w.started_at >= self.window_secs,
            None => false,
        };
        if done {
            self.close_window();
        }
        done
    }

    fn close_window(&mut self) {
        if let Some(w) = self.window.take() {
            // Too few samples: keep the prior bias but stop waiting.
            if w.samples.len() >= self.min_samples {
                self.bias = Vector3::new(
                    median(w.samples.iter().map(|s| s.x)),
                    median(w.samples.iter().map(|s| s.y)),
                    median(w.samples.iter().map(|s| s.z)),
                );
            }
            self.calibrated = true;
        }
    }

    /// Record a bias-subtracted sample for later re-calibration.
    pub fn observe_residual(&mut self, residual: Vector3<f64>) {
        self.residuals.push_back(residual);
        while self.residuals.len() > self.residual_window {
            self.residuals.pop_front();
        }
    }

    /// Nudge the bias toward the mean residual. Callers invoke this only
    /// while the engine is confirmed stationary.
    pub fn recalibrate(&mut self) {
        if self.residuals.is_empty() {
            return;
        }
        let n = self.residuals.len() as f64;
        let sum = self
            .residuals
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<f64>, r| acc + *r);
        self.bias += (sum / n) * self.blend;
    }

    pub fn reset(&mut self) {
        self.bias = Vector3::zeros();
        self.calibrated = false;
        self.window = None;
        self.residuals.clear();
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut v: Vec<f64> = values.collect();
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        v[mid]
    } else {
        (v[mid - 1] + v[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator() -> BiasCalibrator {
        BiasCalibrator::new(3.0, 10, 0.1, 20)
    }

    #[test]
    fn test_window_sets_per_axis_median() {
        let mut c = calibrator();
        c.begin_window(0.0);
        // 31 samples over 3 s; one outlier that the median ignores.
        for i in 0..=30 {
            let t = i as f64 * 0.1;
            let x = if i == 15 { 4.0 } else { 0.1 };
            c.collect(Vector3::new(x, -0.05, 0.2), t);
        }
        assert!(c.is_calibrated());
        assert!(!c.window_active());
        let b = c.bias();
        assert!((b.x - 0.1).abs() < 1e-9);
        assert!((b.y + 0.05).abs() < 1e-9);
        assert!((b.z - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_window_keeps_prior_bias() {
        let mut c = calibrator();
        c.begin_window(0.0);
        for i in 0..5 {
            c.collect(Vector3::new(1.0, 1.0, 1.0), i as f64);
        }
        assert!(c.is_calibrated());
        assert_eq!(c.bias(), Vector3::zeros());
    }

    #[test]
    fn test_poll_closes_window_without_samples() {
        let mut c = calibrator();
        c.begin_window(0.0);
        assert!(!c.poll_window(1.0));
        assert!(c.poll_window(3.5));
        assert!(c.is_calibrated());
        assert_eq!(c.bias(), Vector3::zeros());
    }

    #[test]
    fn test_recalibration_bounded_by_blend() {
        let mut c = calibrator();
        c.mark_calibrated();
        let mut max_residual: f64 = 0.0;
        for i in 0..20 {
            let r = 0.02 + 0.001 * i as f64;
            max_residual = max_residual.max(r);
            c.observe_residual(Vector3::new(r, 0.0, -r));
        }
        let before = c.bias();
        c.recalibrate();
        let delta = c.bias() - before;
        // Each axis moves by at most blend * the largest observed residual.
        assert!(delta.x.abs() <= 0.1 * max_residual + 1e-12);
        assert!(delta.y.abs() <= 0.1 * max_residual + 1e-12);
        assert!(delta.z.abs() <= 0.1 * max_residual + 1e-12);
        assert!(delta.x > 0.0);
        assert!(delta.z < 0.0);
    }

    #[test]
    fn test_recalibration_without_residuals_is_a_no_op() {
        let mut c = calibrator();
        c.mark_calibrated();
        c.recalibrate();
        assert_eq!(c.bias(), Vector3::zeros());
    }
}
