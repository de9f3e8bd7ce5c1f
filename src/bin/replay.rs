// replay — re-run a recorded sensor trace through the fusion engine.
//
// Prints every event with the input timestamp that produced it, then the
// final snapshot, and writes a JSON run summary next to the trace. Tuning
// overrides make it usable for parameter sweeps on field logs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use speedsense::config::EngineConfig;
use speedsense::engine::SpeedEngine;
use speedsense::events::EngineEvent;
use speedsense::trace::Trace;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a recorded sensor trace through the speed fusion engine", long_about = None)]
struct Args {
    /// Path to a trace (.json or .json.gz)
    trace: PathBuf,

    /// Motion gate threshold (m/s²)
    #[arg(long)]
    motion_threshold: Option<f64>,

    /// Impulsive-noise threshold (m/s²)
    #[arg(long)]
    noise_threshold: Option<f64>,

    /// Dead-reckoning uncertainty growth (m/s per second)
    #[arg(long)]
    drift_rate: Option<f64>,

    /// Per-second speed retention while coasting without GPS
    #[arg(long)]
    idle_decay: Option<f64>,

    /// Where to write the run summary (default: alongside the trace)
    #[arg(long)]
    summary_out: Option<PathBuf>,

    /// Dump timestamp,speed,distance,sigma per accel input as CSV to stdout
    #[arg(long, default_value_t = false)]
    csv: bool,

    /// Suppress per-event lines
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn apply_overrides(config: &mut EngineConfig, args: &Args) {
    if let Some(v) = args.motion_threshold {
        config.motion_threshold = v;
    }
    if let Some(v) = args.noise_threshold {
        config.noise_threshold = v;
    }
    if let Some(v) = args.drift_rate {
        config.drift_rate = v;
    }
    if let Some(v) = args.idle_decay {
        config.idle_decay = v;
    }
}

fn describe(event: &EngineEvent) -> String {
    match event {
        EngineEvent::LaunchDetected { elapsed_secs } => {
            format!("launch detected (+{elapsed_secs:.2}s after run start)")
        }
        EngineEvent::SpeedCheckpoint { id, elapsed_secs } => {
            format!("checkpoint {id}: {elapsed_secs:.2}s")
        }
        EngineEvent::DistanceMilestone { id, elapsed_secs, speed_m_s } => {
            format!("milestone {id}: {elapsed_secs:.2}s @ {speed_m_s:.1} m/s")
        }
        EngineEvent::MovingStartDetected { speed_m_s } => {
            format!("moving start at {speed_m_s:.1} m/s, calibration skipped")
        }
        EngineEvent::CalibrationComplete => "calibration complete".to_string(),
        EngineEvent::TickGapDiscarded { gap_secs, anchored_to } => {
            format!("accel gap {gap_secs:.2}s discarded, re-anchored to {anchored_to:.1} m/s")
        }
        EngineEvent::HardZeroApplied { stationary_secs } => {
            format!("hard zero after {stationary_secs:.1}s stationary")
        }
        EngineEvent::DistanceReconciled { factor, velocity_snapped } => {
            format!("distance reconciled (factor {factor:.2}, velocity snapped: {velocity_snapped})")
        }
        EngineEvent::DistanceOutlierDropped { meters } => {
            format!("GPS position jump of {meters:.0} m dropped from distance")
        }
        EngineEvent::SanityReset { speed_m_s } => {
            format!("speed sanity reset to {speed_m_s:.1} m/s")
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let trace = Trace::load(&args.trace)
        .with_context(|| format!("failed to load trace {}", args.trace.display()))?;
    if trace.is_empty() {
        anyhow::bail!("trace {} has no readings", args.trace.display());
    }

    let mut config = EngineConfig::default();
    apply_overrides(&mut config, &args);
    let mut engine = SpeedEngine::new(config);

    println!(
        "replaying {} ({} readings, started at t={:.2}s)",
        args.trace.display(),
        trace.len(),
        trace.started_at
    );

    if args.csv {
        println!("timestamp,speed_m_s,distance_m,sigma");
        engine.start_run(trace.started_at * 1000.0);
        for reading in &trace.readings {
            if let Some(sample) = &reading.accel {
                engine.push_accel_sample(sample);
                let snap = engine.snapshot();
                println!(
                    "{:.3},{:.3},{:.2},{:.3}",
                    reading.timestamp, snap.speed_m_s, snap.distance_m, snap.sigma
                );
            } else if let Some(fix) = &reading.gps {
                engine.push_gps_fix(fix);
            }
        }
    } else {
        for (t, event) in trace.replay(&mut engine) {
            if !args.quiet {
                println!("[{t:9.3}] {}", describe(&event));
            }
        }
    }

    let last = trace.readings.last().map(|r| r.timestamp).unwrap_or(trace.started_at);
    let snapshot = engine.stop_run(last * 1000.0);
    let summary = engine.summary();

    println!("\n=== Final state ===");
    println!("speed:     {:.2} m/s", snapshot.speed_m_s);
    println!("distance:  {:.1} m", snapshot.distance_m);
    println!("launched:  {}", snapshot.launched);
    println!("sigma:     {:.2} m/s", snapshot.sigma);
    println!(
        "inputs:    {} accel ({} discarded, {} spikes), {} fixes ({} outliers)",
        summary.counters.accel_samples,
        summary.counters.ticks_discarded,
        summary.counters.spikes_rejected,
        summary.counters.gps_fixes,
        summary.counters.gps_outliers_dropped
    );
    for checkpoint in &summary.checkpoints {
        println!("result:    {} in {:.2}s", checkpoint.id, checkpoint.elapsed_secs);
    }
    for milestone in &summary.milestones {
        println!(
            "result:    {} in {:.2}s @ {:.1} m/s",
            milestone.id, milestone.elapsed_secs, milestone.speed_m_s
        );
    }

    let out = args.summary_out.unwrap_or_else(|| {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        args.trace.with_file_name(format!("summary_{stamp}.json"))
    });
    summary
        .save(&out)
        .with_context(|| format!("failed to write summary {}", out.display()))?;
    println!("\nsummary written to {}", out.display());

    Ok(())
}
