use crate::pipeline::types::Frame;
use anyhow::Result;
use opencv::core::{self, Mat};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Overwrite-latest holder for the most recent captured frame.
///
/// One producer publishes; any number of readers observe the latest
/// published frame. Publishing swaps an `Arc` handle under a short write
/// lock, so a reader either sees the previous complete frame or the new
/// complete frame, never a partial one. Readers only clone the handle while
/// holding the lock; pixel access happens after it is released.
pub struct FrameSlot {
    current: RwLock<Option<Arc<Frame>>>,
    publishing: AtomicBool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            publishing: AtomicBool::new(false),
        }
    }

    /// Replace the held frame. Must only be called from the single producer
    /// thread that owns this slot; an overlapping publish is a programming
    /// error and aborts instead of corrupting the stream.
    pub fn publish(&self, frame: Frame) {
        let was_publishing = self.publishing.swap(true, Ordering::Acquire);
        assert!(
            !was_publishing,
            "FrameSlot::publish re-entered while a previous publish was in flight"
        );
        *self.current.write().unwrap() = Some(Arc::new(frame));
        self.publishing.store(false, Ordering::Release);
    }

    /// Latest published frame, or `None` if nothing has been published yet.
    /// With `mirror` set, the returned frame is a horizontally flipped copy.
    pub fn read(&self, mirror: bool) -> Result<Option<Arc<Frame>>> {
        let handle = self.current.read().unwrap().clone();
        let Some(frame) = handle else {
            return Ok(None);
        };
        if !mirror {
            return Ok(Some(frame));
        }
        let mut flipped = Mat::default();
        core::flip(&frame.mat, &mut flipped, 1)?;
        Ok(Some(Arc::new(Frame::new(frame.seq, flipped))))
    }

    /// Sequence number of the latest frame (0 if none yet). Lets consumers
    /// poll for freshness without copying pixel data.
    pub fn latest_seq(&self) -> u64 {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .map(|f| f.seq)
            .unwrap_or(0)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vec3b, CV_8UC3};
    use opencv::prelude::*;
    use std::thread;

    fn solid_frame(seq: u64, b: f64) -> Frame {
        let mat =
            Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::new(b, 0.0, 0.0, 0.0)).unwrap();
        Frame::new(seq, mat)
    }

    #[test]
    fn read_before_any_publish_is_empty() {
        let slot = FrameSlot::new();
        assert!(slot.read(false).unwrap().is_none());
        assert!(slot.read(true).unwrap().is_none());
        assert_eq!(slot.latest_seq(), 0);
    }

    #[test]
    fn read_returns_latest_published_frame() {
        let slot = FrameSlot::new();
        slot.publish(solid_frame(1, 10.0));
        slot.publish(solid_frame(2, 20.0));

        let frame = slot.read(false).unwrap().unwrap();
        assert_eq!(frame.seq, 2);
        let px = frame.mat.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!(px[0], 20);
    }

    #[test]
    fn mirrored_read_flips_horizontally() {
        let slot = FrameSlot::new();
        let mut mat =
            Mat::new_rows_cols_with_default(2, 2, CV_8UC3, Scalar::all(0.0)).unwrap();
        // Mark the top-left pixel; after mirroring it must be top-right.
        *mat.at_2d_mut::<Vec3b>(0, 0).unwrap() = Vec3b::from([255, 0, 0]);
        slot.publish(Frame::new(1, mat));

        let mirrored = slot.read(true).unwrap().unwrap();
        assert_eq!(mirrored.mat.at_2d::<Vec3b>(0, 1).unwrap()[0], 255);
        assert_eq!(mirrored.mat.at_2d::<Vec3b>(0, 0).unwrap()[0], 0);
    }

    #[test]
    fn concurrent_readers_always_see_complete_frames() {
        let slot = Arc::new(FrameSlot::new());
        let mut readers = Vec::new();

        for _ in 0..4 {
            let slot = slot.clone();
            readers.push(thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(frame) = slot.read(false).unwrap() {
                        // Every pixel of a frame carries its seq (mod 256);
                        // a torn frame would mix values.
                        let expected = (frame.seq % 256) as u8;
                        let first = frame.mat.at_2d::<Vec3b>(0, 0).unwrap()[0];
                        let last = frame.mat.at_2d::<Vec3b>(3, 3).unwrap()[0];
                        assert_eq!(first, expected);
                        assert_eq!(last, expected);
                    }
                }
            }));
        }

        for seq in 1..=200u64 {
            slot.publish(solid_frame(seq, (seq % 256) as f64));
        }

        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(slot.latest_seq(), 200);
    }
}
