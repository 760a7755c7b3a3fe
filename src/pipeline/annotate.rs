use crate::pipeline::types::{Observation, Rect};
use anyhow::Result;
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc::{self, LINE_8, LINE_AA};

// Overlay colors (BGR).
const FACE_COLOR: (f64, f64, f64) = (255.0, 255.0, 255.0); // white
const LEFT_EYE_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0); // red
const RIGHT_EYE_COLOR: (f64, f64, f64) = (0.0, 255.0, 255.0); // yellow
const NOSE_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0); // green
const MOUTH_COLOR: (f64, f64, f64) = (255.0, 0.0, 0.0); // blue

/// Draw tracked faces and a face-count overlay onto `image`.
///
/// The caller must pass a private copy; published frames are read-shared
/// and never drawn on in place.
pub fn draw_faces(image: &mut Mat, faces: &[Observation]) -> Result<()> {
    for face in faces {
        outline_rect(image, Some(face.rect), FACE_COLOR, 2)?;
        outline_rect(image, face.left_eye, LEFT_EYE_COLOR, 1)?;
        outline_rect(image, face.right_eye, RIGHT_EYE_COLOR, 1)?;
        outline_rect(image, face.nose, NOSE_COLOR, 1)?;
        outline_rect(image, face.mouth, MOUTH_COLOR, 1)?;
    }

    let text = format!("Faces: {}", faces.len());
    // Dark outline first, then the bright text on top, for visibility on
    // any background.
    imgproc::put_text(
        image,
        &text,
        Point::new(20, 40),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        4,
        LINE_AA,
        false,
    )?;
    imgproc::put_text(
        image,
        &text,
        Point::new(20, 40),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        LINE_AA,
        false,
    )?;
    Ok(())
}

fn outline_rect(
    image: &mut Mat,
    rect: Option<Rect>,
    color: (f64, f64, f64),
    thickness: i32,
) -> Result<()> {
    let Some(rect) = rect else {
        return Ok(());
    };
    imgproc::rectangle(
        image,
        rect.to_cv(),
        Scalar::new(color.0, color.1, color.2, 0.0),
        thickness,
        LINE_8,
        0,
    )?;
    Ok(())
}
