//! sentineld - edge surveillance daemon
//!
//! Loads configuration, starts the engine (shared vault + detector, one
//! worker per camera source), and runs until interrupted. The HTTP surface
//! is a separate process; this daemon owns capture, anonymization, public
//! recording, and evidence sealing.
//!
//! Exit codes: 0 ok, 2 invalid configuration, 3 key load/generate failure,
//! 4 no camera sources opened, 5 fatal runtime error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use sentinel_edge::detect::{select_device, PeriodicDetector};
use sentinel_edge::{Engine, EngineError, SentinelConfig, SharedDetector};

#[derive(Parser, Debug)]
#[command(name = "sentineld", version, about = "Edge surveillance daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit one face detection every N frames on the built-in detector.
    #[arg(long, default_value_t = 90)]
    stub_detection_period: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let code = run();
    if code != 0 {
        std::process::exit(code);
    }
}

fn run() -> i32 {
    let args = Args::parse();

    let cfg = match SentinelConfig::load_from(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("configuration invalid: {:#}", e);
            return 2;
        }
    };

    // The in-tree detector backends are CPU-only; a CUDA request falls back.
    let device = select_device(cfg.device, false);
    log::info!(
        "sentineld {} starting: {} source(s), device {}, segment window {}s",
        env!("CARGO_PKG_VERSION"),
        cfg.camera_sources.len(),
        device,
        cfg.segment_seconds
    );

    let detector = SharedDetector::new(PeriodicDetector::new(args.stub_detection_period));
    let engine = match Engine::start(cfg, detector) {
        Ok(engine) => engine,
        Err(EngineError::Config(e)) => {
            log::error!("configuration invalid: {:#}", e);
            return 2;
        }
        Err(EngineError::Key(e)) => {
            log::error!("vault key failure: {}", e);
            return 3;
        }
        Err(EngineError::NoSources) => {
            log::error!("no camera sources opened");
            return 4;
        }
        Err(EngineError::Runtime(e)) => {
            log::error!("fatal: {:#}", e);
            return 5;
        }
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_flag);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Release);
    }) {
        log::error!("cannot install signal handler: {}", e);
        engine.stop();
        return 5;
    }

    let mut last_report = Instant::now();
    while !stop_flag.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
        if last_report.elapsed() >= Duration::from_secs(10) {
            for snapshot in engine.status() {
                log::info!(
                    "camera {}: {:?} fps={:.1} last_detections={} write_errors={} evidence_drops={}",
                    snapshot.index,
                    snapshot.state,
                    snapshot.fps_ewma,
                    snapshot.last_detection_count,
                    snapshot.write_errors,
                    snapshot.evidence_drops
                );
            }
            last_report = Instant::now();
        }
    }

    log::info!("interrupt received, draining");
    engine.stop();
    0
}
