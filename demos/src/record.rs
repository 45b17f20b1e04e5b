use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use skelcap_record::{CloudOutcome, Recorder, RecorderConfig, StreamReport};
use skelcap_source::{FrameSize, FrameSource, SyntheticConfig, SyntheticSource};

// ================ CLI ================== //

/// Record a session from the synthetic sensor.
#[derive(Parser)]
struct CliArgs {
    /// JSON recorder config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session id (default: rec_<local time>).
    #[arg(long)]
    id: Option<String>,

    /// Target fps of the stored streams.
    #[arg(long)]
    fps: Option<f64>,

    /// Show the live preview windows (needs the `opencv` feature).
    #[arg(long)]
    show: bool,

    #[arg(long)]
    out: Option<PathBuf>,

    /// Stop after this many seconds of wall-clock time.
    #[arg(long, default_value = "10")]
    seconds: f64,

    /// Stop after this many sensor ticks.
    #[arg(long)]
    ticks: Option<u64>,

    /// Rate of the synthetic sensor callbacks.
    #[arg(long, default_value = "30")]
    source_fps: f64,

    /// Use a small sensor (640x360 color, 128x106 depth) instead of the native sizes.
    #[arg(long)]
    small: bool,
}

fn recorder_config(args: &CliArgs) -> Result<RecorderConfig> {
    let mut cfg = match &args.config {
        Some(path) => RecorderConfig::from_json_file(path)
            .with_context(|| format!("loading recorder config {path:?}"))?,
        None => RecorderConfig::default(),
    };
    cfg.session_id = match &args.id {
        Some(id) => id.clone(),
        None if args.config.is_some() => cfg.session_id,
        None => chrono::Local::now().format("rec_%Y-%m-%d-%H-%M-%S").to_string(),
    };
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(out) = &args.out {
        cfg.output_dir = out.clone();
    }
    if args.small {
        cfg.color_size = FrameSize::new(640, 360);
        cfg.depth_size = FrameSize::new(128, 106);
    }
    cfg.show_capture |= args.show;
    Ok(cfg)
}

fn print_stream(report: &StreamReport) {
    println!(
        "  {:<5} processed {:>5}  written {:>5}  failed {:>3}  {:?}",
        report.stream,
        report.frames_processed,
        report.frames_written,
        report.frames_failed,
        report.state
    );
    match &report.point_cloud {
        Some(CloudOutcome::Written { path, points }) => {
            println!("        point cloud: {points} points -> {}", path.display())
        }
        Some(CloudOutcome::Failed { path, reason }) => {
            println!("        point cloud {} failed: {reason}", path.display())
        }
        None => {}
    }
}

// ================ MAIN ================== //

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CliArgs::parse();

    let cfg = recorder_config(&args)?;
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("creating output directory {:?}", cfg.output_dir))?;

    let mut source = SyntheticSource::new(SyntheticConfig {
        fps: args.source_fps,
        color: cfg.color_size,
        depth: cfg.depth_size,
        ticks: args.ticks,
        realtime: true,
        ..Default::default()
    })?;

    let mut recorder = Recorder::start(cfg.clone())?;

    // 1) Stop on Ctrl-C or after the time limit
    let stop = recorder.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("installing Ctrl-C handler")?;
    let stop = recorder.stop_handle();
    let limit = Duration::from_secs_f64(args.seconds.max(0.0));
    thread::spawn(move || {
        thread::sleep(limit);
        stop.stop();
    });

    // 2) This thread is the producer
    info!("Recording {} (Ctrl-C to stop)", cfg.session_id);
    while recorder.is_live() {
        if !source.poll(&mut |ev| recorder.handle(ev))? {
            break;
        }
    }

    // 3) Drain, join, dump
    let report = recorder.finish();
    let dump = cfg.session_dump_path();
    report.recording.save_json(&dump)?;

    println!("session {}", report.recording.id);
    println!(
        "  {} skeletons over {:.2} s",
        report.recording.skeletons.len(),
        report.recording.duration_micros() as f64 / 1e6
    );
    print_stream(&report.color);
    print_stream(&report.depth);
    println!("  dump -> {}", dump.display());
    Ok(())
}
