use crate::{detection::Roi, render::Frame};
use image::Rgb;
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LANDMARK_RADIUS: i32 = 3;

/// Round `v` and clamp it to `lo..=hi`. Non-finite input lands on a bound or 0.
fn clamp_px(v: f32, lo: i32, hi: i32) -> i32 {
    (v.round() as i32).clamp(lo, hi)
}

/// Draw every detection box, plus its landmarks, scaled to the frame.
///
/// Coordinates are clamped just outside the frame first, so an edge or
/// landmark that lies off the frame stays off it and huge values never reach
/// the rasterizer.
pub(crate) fn draw_detections(frame: &mut Frame, roi: &Roi) {
    if roi.is_empty() {
        return;
    }
    let (width, height) = frame.dimensions();
    let (w_max, h_max) = (width as i32 + 1, height as i32 + 1);
    for detection in roi.detections() {
        let (x, y, w, h) = detection.bbox.to_pixels(width, height);
        let (x0, x1) = (clamp_px(x, -1, w_max), clamp_px(x + w, -1, w_max));
        let (y0, y1) = (clamp_px(y, -1, h_max), clamp_px(y + h, -1, h_max));
        if x1 > x0 && y1 > y0 {
            let rect = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
            draw_hollow_rect_mut(frame, rect, BOX_COLOR);
        }

        let reach = LANDMARK_RADIUS + 1;
        for landmark in detection.landmarks.iter().flat_map(|set| &set.points) {
            let lx = (landmark.x * detection.bbox.width + detection.bbox.xmin) * width as f32;
            let ly = (landmark.y * detection.bbox.height + detection.bbox.ymin) * height as f32;
            let center = (
                clamp_px(lx, -reach, w_max + reach),
                clamp_px(ly, -reach, h_max + reach),
            );
            draw_filled_circle_mut(frame, center, LANDMARK_RADIUS, LANDMARK_COLOR);
        }
    }
}
