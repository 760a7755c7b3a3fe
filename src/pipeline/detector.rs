use crate::pipeline::types::{Observation, Rect};
use crate::pipeline::FaceDetector;
use anyhow::{Context, Result};
use opencv::core::{Mat, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use opencv::{imgproc, objdetect};
use std::path::Path;

const SCALE_FACTOR: f64 = 1.1;
const MIN_NEIGHBORS: i32 = 5;

/// Haar-cascade face detector with sub-feature searches.
///
/// Faces are found on the equalized grayscale frame; eyes, nose, and mouth
/// are then looked for in fixed regions of each face rectangle, taking the
/// first hit per region. Each sub-search uses a minimum size derived from
/// the frame so tiny spurious matches are ignored.
pub struct CascadeDetector {
    face: CascadeClassifier,
    eye: CascadeClassifier,
    nose: CascadeClassifier,
    mouth: CascadeClassifier,
}

impl CascadeDetector {
    /// Load the four cascade XML files from `cascade_dir`.
    pub fn new(cascade_dir: &Path) -> Result<Self> {
        Ok(Self {
            face: load_cascade(cascade_dir, "haarcascade_frontalface_default.xml")?,
            eye: load_cascade(cascade_dir, "haarcascade_eye.xml")?,
            nose: load_cascade(cascade_dir, "haarcascade_mcs_nose.xml")?,
            mouth: load_cascade(cascade_dir, "haarcascade_mcs_mouth.xml")?,
        })
    }

    fn detect_sub_feature(
        &mut self,
        kind: SubFeature,
        gray: &Mat,
        search: Rect,
        min_size: Size,
    ) -> Result<Option<Rect>> {
        let search = match clamp_to(gray, search)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let roi = Mat::roi(gray, search.to_cv())?.try_clone()?;

        let classifier = match kind {
            SubFeature::Eye => &mut self.eye,
            SubFeature::Nose => &mut self.nose,
            SubFeature::Mouth => &mut self.mouth,
        };
        let mut hits = Vector::<opencv::core::Rect>::new();
        classifier.detect_multi_scale(
            &roi,
            &mut hits,
            SCALE_FACTOR,
            MIN_NEIGHBORS,
            0,
            min_size,
            Size::default(),
        )?;

        Ok(hits.get(0).ok().map(|hit| {
            Rect::new(search.x + hit.x, search.y + hit.y, hit.width, hit.height)
        }))
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Observation>> {
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&gray, &mut equalized)?;
        let gray = equalized;

        let mut face_rects = Vector::<opencv::core::Rect>::new();
        self.face.detect_multi_scale(
            &gray,
            &mut face_rects,
            SCALE_FACTOR,
            MIN_NEIGHBORS,
            objdetect::CASCADE_SCALE_IMAGE,
            min_object_size(&gray, 8)?,
            Size::default(),
        )?;

        let mut observations = Vec::with_capacity(face_rects.len());
        for face_rect in face_rects {
            let Rect { x, y, w, h } = Rect::from_cv(face_rect);
            let mut obs = Observation::new(Rect::new(x, y, w, h));

            // An eye in the upper-left part of the face.
            obs.left_eye = self.detect_sub_feature(
                SubFeature::Eye,
                &gray,
                Rect::new(x + w / 7, y, w * 2 / 7, h / 2),
                min_object_size(&gray, 64)?,
            )?;
            // An eye in the upper-right part.
            obs.right_eye = self.detect_sub_feature(
                SubFeature::Eye,
                &gray,
                Rect::new(x + w * 4 / 7, y, w * 2 / 7, h / 2),
                min_object_size(&gray, 64)?,
            )?;
            // A nose in the middle part.
            obs.nose = self.detect_sub_feature(
                SubFeature::Nose,
                &gray,
                Rect::new(x + w / 4, y + h / 4, w / 2, h / 2),
                min_object_size(&gray, 32)?,
            )?;
            // A mouth in the lower-middle part.
            obs.mouth = self.detect_sub_feature(
                SubFeature::Mouth,
                &gray,
                Rect::new(x + w / 6, y + h * 2 / 3, w * 2 / 3, h / 3),
                min_object_size(&gray, 16)?,
            )?;

            observations.push(obs);
        }

        Ok(observations)
    }
}

#[derive(Clone, Copy)]
enum SubFeature {
    Eye,
    Nose,
    Mouth,
}

fn load_cascade(dir: &Path, file: &str) -> Result<CascadeClassifier> {
    let path = dir.join(file);
    let path_str = path
        .to_str()
        .with_context(|| format!("non-UTF8 cascade path: {}", path.display()))?;
    let classifier = CascadeClassifier::new(path_str)
        .with_context(|| format!("failed to load cascade {}", path.display()))?;
    if classifier.empty()? {
        anyhow::bail!("cascade file {} is empty or missing", path.display());
    }
    Ok(classifier)
}

/// Minimum object size: frame dimensions divided by `divisor`.
fn min_object_size(frame: &Mat, divisor: i32) -> Result<Size> {
    let size = frame.size()?;
    Ok(Size::new(size.width / divisor, size.height / divisor))
}

/// Intersect a search rectangle with the frame bounds; `None` if nothing
/// usable is left.
fn clamp_to(frame: &Mat, rect: Rect) -> Result<Option<Rect>> {
    let size = frame.size()?;
    let x = rect.x.max(0);
    let y = rect.y.max(0);
    let w = (rect.x + rect.w).min(size.width) - x;
    let h = (rect.y + rect.h).min(size.height) - y;
    if w <= 0 || h <= 0 {
        return Ok(None);
    }
    Ok(Some(Rect::new(x, y, w, h)))
}
