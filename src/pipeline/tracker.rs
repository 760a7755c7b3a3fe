use crate::pipeline::scheduler::DetectionScheduler;
use crate::pipeline::slot::FrameSlot;
use crate::pipeline::stabilizer::FaceStabilizer;
use crate::pipeline::types::{Frame, Observation};
use crate::pipeline::{annotate, FaceDetector};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(2);

/// The tracking loop: reads the latest raw frame, decides whether to run
/// the detector, stabilizes the result, and publishes an annotated copy to
/// the processed slot.
///
/// Scheduler and stabilizer state lives in this function's locals only; no
/// other thread ever touches it.
pub fn tracking_worker(
    raw: Arc<FrameSlot>,
    processed: Arc<FrameSlot>,
    mut detector: Box<dyn FaceDetector>,
    mirror: bool,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut scheduler = DetectionScheduler::new();
    let mut stabilizer = FaceStabilizer::new();
    let mut last_detections: Vec<Observation> = Vec::new();
    let mut last_seq = 0u64;

    tracing::info!("tracking loop started");

    while !stop.load(Ordering::Relaxed) {
        if raw.latest_seq() == last_seq {
            thread::sleep(IDLE_POLL);
            continue;
        }
        let frame = match raw.read(mirror)? {
            Some(frame) => frame,
            None => {
                thread::sleep(IDLE_POLL);
                continue;
            }
        };
        last_seq = frame.seq;

        if scheduler.tick(stabilizer.has_track()) {
            last_detections = match detector.detect(&frame.mat) {
                Ok(observations) => observations,
                Err(e) => {
                    // A detector fault counts as zero faces for this tick;
                    // the loop keeps running.
                    tracing::warn!("face detection failed: {e:#}");
                    Vec::new()
                }
            };
        }

        let faces = stabilizer.update(last_detections.clone());

        let mut annotated = frame.mat.clone();
        if let Err(e) = annotate::draw_faces(&mut annotated, faces) {
            tracing::warn!("failed to annotate frame {}: {e}", frame.seq);
        }
        processed.publish(Frame::new(frame.seq, annotated));
    }

    tracing::info!("tracking loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Rect;
    use opencv::core::{Mat, Scalar, CV_8UC3};

    /// Detector that replays a scripted sequence of results.
    struct ScriptedDetector {
        script: Vec<Result<Vec<Observation>>>,
        calls: Arc<std::sync::Mutex<usize>>,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<Observation>> {
            let mut calls = self.calls.lock().unwrap();
            let i = (*calls).min(self.script.len() - 1);
            *calls += 1;
            match &self.script[i] {
                Ok(obs) => Ok(obs.clone()),
                Err(_) => Err(anyhow::anyhow!("scripted failure")),
            }
        }
    }

    fn test_frame(seq: u64) -> Frame {
        let mat =
            Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap();
        Frame::new(seq, mat)
    }

    fn one_face() -> Vec<Observation> {
        vec![Observation::new(Rect::new(10, 10, 40, 40))]
    }

    #[test]
    fn publishes_annotated_frames_and_survives_detector_failure() {
        let raw = Arc::new(FrameSlot::new());
        let processed = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(std::sync::Mutex::new(0));

        let detector = Box::new(ScriptedDetector {
            script: vec![
                Ok(one_face()),
                Err(anyhow::anyhow!("boom")),
                Ok(one_face()),
            ],
            calls: calls.clone(),
        });

        let handle = {
            let raw = raw.clone();
            let processed = processed.clone();
            let stop = stop.clone();
            thread::spawn(move || tracking_worker(raw, processed, detector, false, stop))
        };

        for seq in 1..=12u64 {
            raw.publish(test_frame(seq));
            // Give the loop time to consume each frame so seq gating ticks
            // once per publish.
            for _ in 0..200 {
                if processed.latest_seq() == seq {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();

        // Every raw frame produced a processed counterpart.
        assert_eq!(processed.latest_seq(), 12);
        // The scheduler throttled detection once a face was tracked.
        let calls = *calls.lock().unwrap();
        assert!(calls < 12, "detector ran on every tick: {calls}");
        assert!(calls >= 2, "detector barely ran: {calls}");
    }
}
