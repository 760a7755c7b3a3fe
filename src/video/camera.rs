use crate::pipeline::slot::FrameSlot;
use crate::pipeline::types::Frame;
use crate::video::CaptureDevice;
use anyhow::{anyhow, Result};
use opencv::prelude::*;
use opencv::videoio::{
    VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Local camera behind OpenCV's VideoCapture.
pub struct CameraCapture {
    capture: VideoCapture,
}

impl CameraCapture {
    pub fn open(device: i32) -> Result<Self> {
        let capture = VideoCapture::new(device, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("failed to open camera device {}", device));
        }

        let fps = capture.get(CAP_PROP_FPS)?;
        let width = capture.get(CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT)? as i32;
        tracing::info!(
            "camera {} opened: {}x{} @ {:.2} fps (0 = unreported)",
            device,
            width,
            height,
            fps
        );

        Ok(Self { capture })
    }
}

impl CaptureDevice for CameraCapture {
    fn read(&mut self) -> Result<Option<Mat>> {
        let mut mat = Mat::default();
        let grabbed = self.capture.read(&mut mat)?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        Ok(Some(mat))
    }

    fn frame_rate(&self) -> Result<f64> {
        Ok(self.capture.get(CAP_PROP_FPS)?)
    }

    fn frame_size(&self) -> Result<(i32, i32)> {
        Ok((
            self.capture.get(CAP_PROP_FRAME_WIDTH)? as i32,
            self.capture.get(CAP_PROP_FRAME_HEIGHT)? as i32,
        ))
    }
}

/// Capture loop: pull frames from the device and publish each one to the
/// slot with an increasing sequence number. A read that yields no frame is
/// retried; device errors are logged and retried after a short pause. The
/// in-flight read finishes before the stop flag takes effect.
pub fn capture_worker(
    mut device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut seq = 0u64;

    while !stop.load(Ordering::Relaxed) {
        match device.read() {
            Ok(Some(mat)) => {
                seq += 1;
                slot.publish(Frame::new(seq, mat));
            }
            Ok(None) => {
                thread::sleep(Duration::from_millis(2));
            }
            Err(e) => {
                tracing::warn!("camera read failed: {e}");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    tracing::info!("capture loop stopped after {} frames", seq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    /// Device producing a fixed number of frames, then nothing.
    struct FixedDevice {
        remaining: usize,
    }

    impl CaptureDevice for FixedDevice {
        fn read(&mut self) -> Result<Option<Mat>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(
                Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap(),
            ))
        }

        fn frame_rate(&self) -> Result<f64> {
            Ok(30.0)
        }

        fn frame_size(&self) -> Result<(i32, i32)> {
            Ok((8, 8))
        }
    }

    #[test]
    fn publishes_every_captured_frame_in_order() {
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let slot = slot.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                capture_worker(Box::new(FixedDevice { remaining: 5 }), slot, stop)
            })
        };

        // Wait until the device is drained, then stop the loop.
        for _ in 0..500 {
            if slot.latest_seq() == 5 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();

        assert_eq!(slot.latest_seq(), 5);
    }
}
