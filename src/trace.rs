// trace.rs — recorded sensor sessions: save, load, re-feed.
//
// A trace is the full interleaved input stream of a run, in arrival order.
// Re-feeding one through a fresh engine reproduces every snapshot exactly,
// which is what makes field logs debuggable after the fact.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::SpeedEngine;
use crate::events::EngineEvent;
use crate::types::{AccelSample, GpsFix};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace io: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One input in arrival order; exactly one of the two fields is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceReading {
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accel: Option<AccelSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    /// Seconds; the engine run starts here.
    pub started_at: f64,
    pub readings: Vec<TraceReading>,
}

impl Trace {
    pub fn new(started_at: f64) -> Self {
        Self { started_at, readings: Vec::new() }
    }

    pub fn record_accel(&mut self, sample: AccelSample) {
        self.readings.push(TraceReading {
            timestamp: sample.timestamp,
            accel: Some(sample),
            gps: None,
        });
    }

    pub fn record_gps(&mut self, fix: GpsFix) {
        self.readings.push(TraceReading { timestamp: fix.timestamp, accel: None, gps: Some(fix) });
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// `.json` plain, `.gz` gzip-compressed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let trace = if is_gzip(path) {
            serde_json::from_reader(GzDecoder::new(BufReader::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        Ok(trace)
    }

    /// Run the whole trace through an engine in arrival order; returns the
    /// events with the timestamp of the input that produced them.
    pub fn replay(&self, engine: &mut SpeedEngine) -> Vec<(f64, EngineEvent)> {
        let mut out = Vec::new();
        engine.start_run(self.started_at * 1000.0);
        for reading in &self.readings {
            let events = if let Some(sample) = &reading.accel {
                engine.push_accel_sample(sample)
            } else if let Some(fix) = &reading.gps {
                engine.push_gps_fix(fix)
            } else {
                Vec::new()
            };
            for ev in events {
                out.push((reading.timestamp, ev));
            }
        }
        out
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::AccelSource;

    fn synthetic_trace() -> Trace {
        let mut trace = Trace::new(0.0);
        for i in 0..400 {
            let t = i as f64 * 0.01;
            if i % 100 == 0 {
                trace.record_gps(GpsFix {
                    timestamp: t,
                    latitude: 43.65,
                    longitude: -79.38,
                    speed: Some(2.0 * t),
                    accuracy: 5.0,
                });
            }
            trace.record_accel(AccelSample {
                timestamp: t,
                x: 2.0,
                y: 0.0,
                z: 0.0,
                source: AccelSource::Linear,
            });
        }
        trace
    }

    #[test]
    fn test_json_round_trip() {
        let trace = synthetic_trace();
        let dir = std::env::temp_dir();
        let path = dir.join("speedsense_trace_test.json");
        trace.save(&path).unwrap();
        let loaded = Trace::load(&path).unwrap();
        assert_eq!(loaded.len(), trace.len());
        assert_eq!(
            serde_json::to_string(&loaded).unwrap(),
            serde_json::to_string(&trace).unwrap()
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_gzip_round_trip() {
        let trace = synthetic_trace();
        let dir = std::env::temp_dir();
        let path = dir.join("speedsense_trace_test.json.gz");
        trace.save(&path).unwrap();
        let loaded = Trace::load(&path).unwrap();
        assert_eq!(
            serde_json::to_string(&loaded).unwrap(),
            serde_json::to_string(&trace).unwrap()
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_replay_reproduces_snapshots() {
        let trace = synthetic_trace();
        let mut e1 = SpeedEngine::new(EngineConfig::default());
        let mut e2 = SpeedEngine::new(EngineConfig::default());
        let ev1 = trace.replay(&mut e1);
        let ev2 = trace.replay(&mut e2);
        assert_eq!(ev1.len(), ev2.len());
        assert_eq!(
            serde_json::to_string(&e1.snapshot()).unwrap(),
            serde_json::to_string(&e2.snapshot()).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = Trace::load("/nonexistent/speedsense.json").unwrap_err();
        assert!(matches!(err, TraceError::Io(_)));
    }
}
