use crate::pipeline::slot::FrameSlot;
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::Receiver;
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Frames the recorder waits for before trusting its measured frame rate,
/// when the device does not report one.
pub const WRITER_WARMUP_FRAMES: u64 = 20;

const IDLE_POLL: Duration = Duration::from_millis(2);
const NO_FRAME_POLL: Duration = Duration::from_millis(5);

/// Control messages for the recorder thread. Senders live in the HTTP API;
/// commands take effect at the recorder's next iteration.
#[derive(Debug)]
pub enum RecorderCommand {
    /// Write the next processed frame to this path, once.
    Screenshot(PathBuf),
    /// Begin a video session with the given fourcc codec.
    StartRecording { path: PathBuf, fourcc: i32 },
    /// End the active video session, releasing the writer.
    StopRecording,
}

/// Recorder loop: consumes the latest frame from its slot at its own pace,
/// writing pending screenshots and appending to an active video session.
///
/// The video writer is created lazily on the first frame of a session: with
/// the device-reported rate when it is valid, otherwise deferred until
/// enough frames have passed to trust the measured average rate.
pub fn recorder_worker(
    slot: Arc<FrameSlot>,
    commands: Receiver<RecorderCommand>,
    source_fps: f64,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut pending_screenshot: Option<PathBuf> = None;
    let mut session: Option<RecordingSession> = None;
    let mut start_time: Option<Instant> = None;
    let mut frames_elapsed = 0u64;
    let mut fps_estimate = 0.0f64;
    let mut last_seq = 0u64;

    while !stop.load(Ordering::Relaxed) {
        // Drain control first so a stop command is honored before the next
        // frame is written.
        while let Ok(command) = commands.try_recv() {
            match command {
                RecorderCommand::Screenshot(path) => {
                    tracing::info!("screenshot scheduled: {}", path.display());
                    pending_screenshot = Some(path);
                }
                RecorderCommand::StartRecording { path, fourcc } => {
                    if session.is_some() {
                        tracing::warn!("recording already active, ignoring start");
                    } else {
                        tracing::info!("recording started: {}", path.display());
                        session = Some(RecordingSession::new(path, fourcc));
                    }
                }
                RecorderCommand::StopRecording => match session.take() {
                    Some(active) => active.finish(),
                    None => tracing::warn!("no recording active, ignoring stop"),
                },
            }
        }

        let frame = match slot.read(false)? {
            Some(frame) if frame.seq != last_seq => frame,
            Some(_) => {
                thread::sleep(IDLE_POLL);
                continue;
            }
            None => {
                thread::sleep(NO_FRAME_POLL);
                continue;
            }
        };
        last_seq = frame.seq;

        // Running frame-rate estimate: frames seen over wall-clock since
        // the first frame.
        match start_time {
            None => start_time = Some(Instant::now()),
            Some(t0) => {
                let elapsed = t0.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    fps_estimate = frames_elapsed as f64 / elapsed;
                }
            }
        }
        frames_elapsed += 1;

        if let Some(path) = pending_screenshot.take() {
            match write_image(&path, &frame.mat) {
                Ok(()) => tracing::info!("screenshot saved: {}", path.display()),
                Err(e) => tracing::warn!("screenshot failed: {e:#}"),
            }
        }

        if let Some(active) = session.as_mut() {
            let fps = writer_fps(source_fps, frames_elapsed, fps_estimate);
            if let Err(e) = active.write(&frame.mat, fps) {
                tracing::warn!("video write failed, ending session: {e:#}");
                if let Some(broken) = session.take() {
                    broken.finish();
                }
            }
        }
    }

    // Release any open writer on shutdown.
    if let Some(active) = session.take() {
        active.finish();
    }

    tracing::info!("recorder stopped");
    Ok(())
}

/// Frame rate to create a video writer with, or `None` while the estimate
/// is still warming up.
pub fn writer_fps(reported: f64, frames_elapsed: u64, estimate: f64) -> Option<f64> {
    if reported > 0.0 {
        Some(reported)
    } else if frames_elapsed < WRITER_WARMUP_FRAMES {
        // The device's rate is unknown; wait for a stable measurement.
        None
    } else {
        Some(estimate)
    }
}

/// Parse a 4-character codec tag ("MJPG", "XVID", ...) into a fourcc code.
pub fn fourcc_from_tag(tag: &str) -> Result<i32> {
    let chars: Vec<char> = tag.chars().collect();
    if chars.len() != 4 {
        return Err(anyhow!("codec tag must be exactly 4 characters: {tag:?}"));
    }
    Ok(VideoWriter::fourcc(chars[0], chars[1], chars[2], chars[3])?)
}

struct RecordingSession {
    path: PathBuf,
    fourcc: i32,
    writer: Option<VideoWriter>,
    frames_written: u64,
}

impl RecordingSession {
    fn new(path: PathBuf, fourcc: i32) -> Self {
        Self {
            path,
            fourcc,
            writer: None,
            frames_written: 0,
        }
    }

    /// Append one frame, creating the writer first if the frame rate is
    /// settled. Size and codec are fixed for the whole session once the
    /// writer exists.
    fn write(&mut self, mat: &Mat, fps: Option<f64>) -> Result<()> {
        if self.writer.is_none() {
            let Some(fps) = fps else {
                return Ok(());
            };
            let path = self
                .path
                .to_str()
                .with_context(|| format!("non-UTF8 recording path: {}", self.path.display()))?;
            let size = mat.size()?;
            let writer = VideoWriter::new(path, self.fourcc, fps, size, true)?;
            if !writer.is_opened()? {
                return Err(anyhow!("could not open video writer for {path}"));
            }
            tracing::info!(
                "video writer created: {} ({}x{} @ {:.2} fps)",
                path,
                size.width,
                size.height,
                fps
            );
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(mat)?;
            self.frames_written += 1;
        }
        Ok(())
    }

    /// Release the writer and log the session outcome.
    fn finish(mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.release() {
                tracing::warn!("video writer release failed: {e}");
            }
            tracing::info!(
                "recording stopped: {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        } else {
            tracing::info!(
                "recording stopped before the writer was created: {}",
                self.path.display()
            );
        }
    }
}

fn write_image(path: &Path, mat: &Mat) -> Result<()> {
    let path = path
        .to_str()
        .with_context(|| format!("non-UTF8 screenshot path: {}", path.display()))?;
    let written = imgcodecs::imwrite(path, mat, &Vector::new())?;
    if !written {
        return Err(anyhow!("imwrite rejected {path}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_rate_is_used_immediately() {
        assert_eq!(writer_fps(30.0, 0, 0.0), Some(30.0));
        assert_eq!(writer_fps(29.97, 100, 15.0), Some(29.97));
    }

    #[test]
    fn invalid_rate_defers_until_warmup_completes() {
        assert_eq!(writer_fps(0.0, 0, 0.0), None);
        assert_eq!(writer_fps(0.0, 19, 24.0), None);
        assert_eq!(writer_fps(-1.0, 10, 24.0), None);
    }

    #[test]
    fn measured_estimate_is_used_after_warmup() {
        assert_eq!(writer_fps(0.0, 20, 24.5), Some(24.5));
        assert_eq!(writer_fps(0.0, 200, 24.5), Some(24.5));
    }

    #[test]
    fn codec_tags_must_be_four_characters() {
        assert!(fourcc_from_tag("MJPG").is_ok());
        assert!(fourcc_from_tag("XVID").is_ok());
        assert!(fourcc_from_tag("MP4").is_err());
        assert!(fourcc_from_tag("H264X").is_err());
        assert!(fourcc_from_tag("").is_err());
    }
}
