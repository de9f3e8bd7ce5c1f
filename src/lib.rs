// speedsense — GPS + accelerometer fusion for vehicle speed, distance, and
// acceleration-interval timing.
//
// The engine is single-threaded and callback-driven: the platform pushes
// accelerometer samples and location fixes in arrival order, the display
// polls `snapshot()`, and timing results (launch, 0-60, quarter mile)
// come out as events. Nothing here touches the UI, persistence, or sensor
// permission layers; those live with the embedding app.

pub mod calibration;
pub mod config;
pub mod engine;
pub mod events;
pub mod fusion;
pub mod gps;
pub mod motion;
pub mod status;
pub mod trace;
pub mod types;

pub use config::{DistanceTarget, EngineConfig, SpeedTarget};
pub use engine::{Snapshot, SpeedEngine};
pub use events::EngineEvent;
pub use types::{AccelSample, AccelSource, GpsFix};
