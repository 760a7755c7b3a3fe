// Camera capture and media recording workers.

pub mod camera;
pub mod recorder;

use anyhow::Result;
use opencv::core::Mat;

/// A capture device that yields live frames.
///
/// `read` returns `Ok(None)` when no frame is available yet; that is a
/// normal transient state, not an error. The capability queries feed the
/// recorder's writer setup.
pub trait CaptureDevice: Send {
    fn read(&mut self) -> Result<Option<Mat>>;
    fn frame_rate(&self) -> Result<f64>;
    fn frame_size(&self) -> Result<(i32, i32)>;
}
