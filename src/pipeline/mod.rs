// Face tracking pipeline: frame distribution, detection scheduling,
// stabilization, and the tracking loop itself.

pub mod annotate;
pub mod detector;
pub mod scheduler;
pub mod slot;
pub mod stabilizer;
pub mod tracker;
pub mod types;

use anyhow::Result;
use opencv::core::Mat;

use self::types::Observation;

/// The external detection collaborator. An implementation turns one frame
/// into a list of face observations; it may fail, and callers must treat a
/// failure as "no faces this tick" rather than tearing the loop down.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Observation>>;
}
