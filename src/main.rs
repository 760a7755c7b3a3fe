mod cli;
mod pipeline;
mod video;
mod web;

use anyhow::Result;
use cli::Args;
use crossbeam::channel;
use pipeline::detector::CascadeDetector;
use pipeline::slot::FrameSlot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{error, info};
use video::camera::{capture_worker, CameraCapture};
use video::recorder::recorder_worker;
use video::CaptureDevice;
use web::server::{run_stream_server, StreamState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let raw_slot = Arc::new(FrameSlot::new());
    let processed_slot = Arc::new(FrameSlot::new());

    // The camera is opened (and its capabilities queried) before the
    // capture thread takes ownership of it.
    let camera = CameraCapture::open(args.device)?;
    let source_fps = camera.frame_rate().unwrap_or(0.0);

    let detector = Box::new(CascadeDetector::new(&args.cascade_dir)?);

    let capture_stop = Arc::new(AtomicBool::new(false));
    let capture_handle = spawn_worker("capture", {
        let slot = raw_slot.clone();
        let stop = capture_stop.clone();
        move || capture_worker(Box::new(camera), slot, stop)
    });

    let tracker_stop = Arc::new(AtomicBool::new(false));
    let tracker_handle = spawn_worker("tracker", {
        let raw = raw_slot.clone();
        let processed = processed_slot.clone();
        let stop = tracker_stop.clone();
        let mirror = args.mirror;
        move || pipeline::tracker::tracking_worker(raw, processed, detector, mirror, stop)
    });

    let (recorder_tx, recorder_rx) = channel::unbounded();
    let recorder_stop = Arc::new(AtomicBool::new(false));
    let recorder_handle = spawn_worker("recorder", {
        let slot = if args.record_raw {
            raw_slot.clone()
        } else {
            processed_slot.clone()
        };
        let stop = recorder_stop.clone();
        move || recorder_worker(slot, recorder_rx, source_fps, stop)
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let raw_server = tokio::spawn(run_stream_server(
        args.host,
        args.raw_port,
        Arc::new(StreamState {
            name: "raw",
            slot: raw_slot,
            mirror: args.mirror,
            recorder: recorder_tx.clone(),
            shutdown: shutdown_rx.clone(),
        }),
    ));
    let processed_server = tokio::spawn(run_stream_server(
        args.host,
        args.processed_port,
        Arc::new(StreamState {
            name: "processed",
            slot: processed_slot,
            mirror: false,
            recorder: recorder_tx,
            shutdown: shutdown_rx,
        }),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Stream servers first, then the consumers, then the source.
    let _ = shutdown_tx.send(true);
    raw_server.await??;
    processed_server.await??;

    tracker_stop.store(true, Ordering::Relaxed);
    join_worker("tracker", tracker_handle);
    recorder_stop.store(true, Ordering::Relaxed);
    join_worker("recorder", recorder_handle);
    capture_stop.store(true, Ordering::Relaxed);
    join_worker("capture", capture_handle);

    info!("shutdown complete");
    Ok(())
}

fn spawn_worker<F>(name: &'static str, work: F) -> JoinHandle<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::spawn(move || {
        if let Err(e) = work() {
            error!("{name} worker failed: {e:#}");
        }
    })
}

fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("{name} worker panicked");
    }
}
