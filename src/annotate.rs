use crate::inference::Detection;
use opencv::{
    core::{Mat, Point, Scalar},
    imgproc,
};

const BOX_THICKNESS: i32 = 2;
const FONT_SCALE: f64 = 0.5;
const LABEL_OFFSET: i32 = 10;

fn box_color() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

/// Draws every well-formed detection onto `frame` and returns how many were drawn.
/// Boxes without exactly four coordinates are skipped, and drawing errors are
/// logged rather than returned.
pub fn render(frame: &mut Mat, detections: &[Detection]) -> usize {
    let mut drawn = 0;
    for detection in detections {
        let Some((x1, y1, x2, y2)) = detection.corners() else {
            tracing::debug!(
                coordinates = detection.bbox.len(),
                label = %detection.label,
                "Skipping detection with malformed bounding box"
            );
            continue;
        };

        match draw_detection(frame, (x1, y1, x2, y2), &detection.caption()) {
            Ok(()) => drawn += 1,
            Err(e) => tracing::warn!("Failed to draw detection {}: {}", detection.label, e),
        }
    }
    drawn
}

fn draw_detection(
    frame: &mut Mat,
    (x1, y1, x2, y2): (i32, i32, i32, i32),
    caption: &str,
) -> opencv::Result<()> {
    imgproc::rectangle_points(
        frame,
        Point::new(x1, y1),
        Point::new(x2, y2),
        box_color(),
        BOX_THICKNESS,
        imgproc::LINE_8,
        0,
    )?;

    imgproc::put_text(
        frame,
        caption,
        Point::new(x1, y1.saturating_sub(LABEL_OFFSET)),
        imgproc::FONT_HERSHEY_SIMPLEX,
        FONT_SCALE,
        box_color(),
        BOX_THICKNESS,
        imgproc::LINE_8,
        false,
    )
}
