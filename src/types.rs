use serde::{Deserialize, Serialize};

/// Which path the platform delivered an accelerometer sample through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelSource {
    /// Hardware linear acceleration, gravity already removed.
    Linear,
    /// Raw accelerometer including gravity. Gravity is subtracted along the
    /// device z axis downstream; tilt leaks into the magnitude on this path.
    Gravity,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AccelSample {
    /// Monotonic seconds.
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub source: AccelSource,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    /// Monotonic seconds.
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Instantaneous ground speed in m/s. None when the receiver could not
    /// derive one (negative values are discarded at the boundary).
    pub speed: Option<f64>,
    /// Accuracy radius in metres.
    pub accuracy: f64,
}
