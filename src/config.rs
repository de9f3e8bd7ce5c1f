// config.rs — every tuneable of the fusion engine in one place.
//
// Defaults are the values the estimator was tuned with on real drive logs;
// the replay binary exposes a handful of them as CLI overrides.

/// Metres per second in one mile per hour.
pub const MPH: f64 = 0.44704;
/// Metres per second in one kilometre per hour.
pub const KMH: f64 = 1.0 / 3.6;

/// An acceleration-interval target, e.g. 0→60 mph.
///
/// A checkpoint only arms once the fused speed has been observed below
/// `from_m_s` within the run, so cruising through 60 mph does not report a
/// 0→60 time.
#[derive(Clone, Debug)]
pub struct SpeedTarget {
    pub id: String,
    pub from_m_s: f64,
    pub to_m_s: f64,
}

impl SpeedTarget {
    pub fn new(id: &str, from_m_s: f64, to_m_s: f64) -> Self {
        Self { id: id.to_string(), from_m_s, to_m_s }
    }
}

/// A distance milestone target, e.g. the quarter mile.
#[derive(Clone, Debug)]
pub struct DistanceTarget {
    pub id: String,
    pub meters: f64,
}

impl DistanceTarget {
    pub fn new(id: &str, meters: f64) -> Self {
        Self { id: id.to_string(), meters }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    // ── Motion gate ──
    pub motion_threshold: f64,
    pub noise_threshold: f64,

    // ── Uncertainty ──
    pub drift_rate: f64,
    pub sigma_min: f64,
    pub sigma_start: f64,
    pub gap_sigma: f64,
    pub hard_zero_sigma: f64,

    // ── Tick gap / sanity ──
    pub dt_gap: f64,
    pub dt_cap: f64,
    pub v_max: f64,

    // ── GPS reliability ──
    pub reliability_window: usize,
    pub gps_reliable_max_age: f64,
    pub gps_reliable_min_score: f64,
    pub default_accuracy_m: f64,

    // ── GPS measurement noise model ──
    pub gps_sigma_scale: f64,
    pub gps_sigma_floor: f64,

    // ── Moving start ──
    pub start_fix_count: usize,
    pub start_window_secs: f64,
    pub start_max_accuracy_m: f64,
    pub start_min_speed: f64,
    pub moving_start_sigma_scale: f64,

    // ── Fusion ──
    pub max_gps_weight: f64,
    pub accel_pull_threshold: f64,
    pub accel_pull_keep: f64,
    /// Per-second speed retention while dead-reckoning with a quiet
    /// accelerometer; applied as `idle_decay.powf(dt)` each tick.
    pub idle_decay: f64,

    // ── Zero anchors ──
    pub stationary_forced_zero_secs: f64,
    pub consecutive_zero_fixes: u32,
    pub zero_gps_speed: f64,
    pub soft_zero_gps_speed: f64,
    pub soft_zero_max_speed: f64,
    pub soft_zero_confirm_speed: f64,
    pub tilt_reject_speed: f64,

    // ── Distance ──
    pub distance_min_speed: f64,
    pub reconcile_interval: f64,
    pub reconcile_rel_error: f64,
    pub reconcile_min_distance: f64,
    pub reconcile_snap_low: f64,
    pub reconcile_snap_high: f64,
    pub distance_outlier_m: f64,

    // ── Display smoothing ──
    pub display_window: usize,
    pub display_min_samples: usize,

    // ── Calibration ──
    pub calibration_window_secs: f64,
    pub calibration_min_samples: usize,
    pub bias_blend: f64,
    pub residual_window: usize,

    // ── Launch detection ──
    pub launch_buffer_secs: f64,
    pub launch_accel_threshold: f64,
    pub launch_strict_samples: usize,
    pub launch_min_speed: f64,
    pub launch_recent_window: f64,
    pub launch_recent_min_samples: usize,
    pub launch_recent_accel: f64,
    pub launch_recent_ratio: f64,

    // ── Targets ──
    pub speed_targets: Vec<SpeedTarget>,
    pub distance_targets: Vec<DistanceTarget>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.5,
            noise_threshold: 2.0,
            drift_rate: 0.5,
            sigma_min: 0.1,
            sigma_start: 10.0,
            gap_sigma: 5.0,
            hard_zero_sigma: 0.5,
            dt_gap: 0.5,
            dt_cap: 0.1,
            v_max: 100.0,
            reliability_window: 10,
            gps_reliable_max_age: 2.0,
            gps_reliable_min_score: 0.3,
            default_accuracy_m: 20.0,
            gps_sigma_scale: 0.05,
            gps_sigma_floor: 0.5,
            start_fix_count: 3,
            start_window_secs: 2.0,
            start_max_accuracy_m: 30.0,
            start_min_speed: 2.0,
            moving_start_sigma_scale: 0.1,
            max_gps_weight: 0.8,
            accel_pull_threshold: 2.0,
            accel_pull_keep: 0.7,
            idle_decay: 0.98,
            stationary_forced_zero_secs: 3.0,
            consecutive_zero_fixes: 3,
            zero_gps_speed: 0.5,
            soft_zero_gps_speed: 0.3,
            soft_zero_max_speed: 2.0,
            soft_zero_confirm_speed: 1.0,
            tilt_reject_speed: 0.89,
            distance_min_speed: 0.5,
            reconcile_interval: 2.0,
            reconcile_rel_error: 0.2,
            reconcile_min_distance: 5.0,
            reconcile_snap_low: 0.8,
            reconcile_snap_high: 1.2,
            distance_outlier_m: 100.0,
            display_window: 5,
            display_min_samples: 3,
            calibration_window_secs: 3.0,
            calibration_min_samples: 10,
            bias_blend: 0.1,
            residual_window: 20,
            launch_buffer_secs: 2.0,
            launch_accel_threshold: 1.5,
            launch_strict_samples: 10,
            launch_min_speed: 2.0,
            launch_recent_window: 0.5,
            launch_recent_min_samples: 25,
            launch_recent_accel: 1.0,
            launch_recent_ratio: 0.8,
            speed_targets: default_speed_targets(),
            distance_targets: default_distance_targets(),
        }
    }
}

pub fn default_speed_targets() -> Vec<SpeedTarget> {
    vec![
        SpeedTarget::new("0-60mph", 0.0, 60.0 * MPH),
        SpeedTarget::new("0-100kmh", 0.0, 100.0 * KMH),
        SpeedTarget::new("0-100mph", 0.0, 100.0 * MPH),
        SpeedTarget::new("60-100mph", 60.0 * MPH, 100.0 * MPH),
        SpeedTarget::new("100-200kmh", 100.0 * KMH, 200.0 * KMH),
    ]
}

pub fn default_distance_targets() -> Vec<DistanceTarget> {
    vec![
        DistanceTarget::new("1/8mile", 201.168),
        DistanceTarget::new("1/4mile", 402.336),
        DistanceTarget::new("1000m", 1000.0),
        DistanceTarget::new("1mile", 1609.344),
    ]
}
