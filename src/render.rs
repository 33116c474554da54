use crate::skeleton::{
    JointKind::{self, *},
    Point, Skeleton,
};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut};

/// A 3-channel RGB8 pixel buffer.
pub(crate) type Frame = RgbImage;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const HEAD_RADIUS: i32 = 60;
const HEAD_THICKNESS: i32 = 2;
const EYE_RADIUS: i32 = 10;
const NOSE_RADIUS: i32 = 8;
const MOUTH_HALF_WIDTH: i32 = 20;
const MOUTH_OFFSET: i32 = 30;
const MOUTH_THICKNESS: i32 = 2;
const BONE_THICKNESS: i32 = 5;
const JOINT_RADIUS: i32 = 12;

/// Joints are clamped into this many pixels around the origin so that far-off
/// coordinates cannot overflow the rasterizer.
const GUARD_BAND: i32 = 1 << 16;

/// Torso, arms then legs.
pub(crate) const BONES: [(JointKind, JointKind); 12] = [
    (LeftShoulder, LeftHip),
    (RightShoulder, RightHip),
    (LeftShoulder, RightShoulder),
    (LeftHip, RightHip),
    (LeftShoulder, LeftElbow),
    (LeftElbow, LeftWrist),
    (RightShoulder, RightElbow),
    (RightElbow, RightWrist),
    (LeftHip, LeftKnee),
    (LeftKnee, LeftAnkle),
    (RightHip, RightKnee),
    (RightKnee, RightAnkle),
];

/// Draws the kinetic character from scratch on every call.
///
/// The output depends on nothing but the skeleton, so rendering the same
/// skeleton twice yields identical frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Renderer {
    width: u32,
    height: u32,
}

impl Renderer {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub(crate) fn render(&self, skeleton: &Skeleton) -> Frame {
        let mut frame = Frame::new(self.width, self.height);
        let at = |kind: JointKind| guard(skeleton.get(kind));

        let head = guard(head_center(skeleton));
        draw_ring_mut(&mut frame, head, HEAD_RADIUS, HEAD_THICKNESS, WHITE);

        for (kind, radius) in [
            (LeftEye, EYE_RADIUS),
            (RightEye, EYE_RADIUS),
            (Nose, NOSE_RADIUS),
        ] {
            let point = at(kind);
            draw_filled_circle_mut(&mut frame, (point.x, point.y), radius, WHITE);
        }

        let mouth_y = head.y.saturating_add(MOUTH_OFFSET);
        draw_thick_line_mut(
            &mut frame,
            Point::new(head.x.saturating_sub(MOUTH_HALF_WIDTH), mouth_y),
            Point::new(head.x.saturating_add(MOUTH_HALF_WIDTH), mouth_y),
            MOUTH_THICKNESS,
            WHITE,
        );

        for &(a, b) in BONES.iter() {
            draw_thick_line_mut(&mut frame, at(a), at(b), BONE_THICKNESS, WHITE);
        }

        // markers go on top of the bones
        for (kind, _) in skeleton.iter() {
            let point = at(kind);
            draw_filled_circle_mut(&mut frame, (point.x, point.y), JOINT_RADIUS, WHITE);
        }

        frame
    }
}

fn guard(point: Point) -> Point {
    Point::new(
        point.x.clamp(-GUARD_BAND, GUARD_BAND),
        point.y.clamp(-GUARD_BAND, GUARD_BAND),
    )
}

/// Midpoint of the eyes, rounded toward negative infinity.
fn head_center(skeleton: &Skeleton) -> Point {
    let (left, right) = (skeleton.get(LeftEye), skeleton.get(RightEye));
    let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)).div_euclid(2)) as i32;
    Point::new(mid(left.x, right.x), mid(left.y, right.y))
}

/// Circle outline `thickness` pixels wide, centered on `radius`.
fn draw_ring_mut(frame: &mut Frame, center: Point, radius: i32, thickness: i32, color: Rgb<u8>) {
    let inner = i64::from(radius - thickness / 2);
    let outer = inner + i64::from(thickness);
    let (cx, cy) = (i64::from(center.x), i64::from(center.y));
    let (width, height) = (i64::from(frame.width()), i64::from(frame.height()));

    let y_range = (cy - outer).max(0)..=(cy + outer).min(height - 1);
    let x_range = (cx - outer).max(0)..=(cx + outer).min(width - 1);

    for y in y_range {
        let dy = y - cy;
        for x in x_range.clone() {
            let dx = x - cx;
            let d2 = dx * dx + dy * dy;
            if d2 >= inner * inner && d2 < outer * outer {
                frame.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Straight stroke with round caps, clipped to the frame.
fn draw_thick_line_mut(frame: &mut Frame, a: Point, b: Point, thickness: i32, color: Rgb<u8>) {
    if thickness <= 1 {
        draw_line_segment_mut(frame, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
        return;
    }

    let half = thickness / 2;
    let (dx, dy) = ((b.x as f32) - (a.x as f32), (b.y as f32) - (a.y as f32));
    let length = dx.hypot(dy);

    if length > 0.0 {
        let scale = thickness as f32 / 2.0 / length;
        let (nx, ny) = ((-dy * scale).round() as i32, (dx * scale).round() as i32);
        let offset = |p: Point, sign: i32| {
            Point::new(p.x.saturating_add(sign * nx), p.y.saturating_add(sign * ny))
        };
        let quad = [offset(a, 1), offset(b, 1), offset(b, -1), offset(a, -1)];
        // collinear corners happen only for very thin strokes; the caps cover them
        if quad[0] != quad[3] {
            draw_polygon_mut(frame, &quad, color);
        }
    }

    draw_filled_circle_mut(frame, (a.x, a.y), half, color);
    draw_filled_circle_mut(frame, (b.x, b.y), half, color);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{head_center, Frame, Renderer, BONES, WHITE};
    use crate::skeleton::{JointKind, Point, Skeleton};
    use image::Rgb;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    // White runs of the default pose at 1280x720, worked out by hand from the
    // circle, ring and polygon rasterizers.
    /// Eye row: the ring on both sides, the face markers merged in between.
    const ROW_90: &[(u32, u32)] = &[(60, 61), (68, 172), (179, 180)];
    /// Shoulder row: both markers joined by the shoulder bone.
    const ROW_200: &[(u32, u32)] = &[(88, 162)];
    /// Center column, top to bottom.
    const COLUMN_120: &[(u32, u32)] = &[
        (30, 31),
        (88, 112),
        (119, 121),
        (149, 150),
        (197, 203),
        (397, 403),
    ];

    fn renderer() -> Renderer {
        Renderer::new(1280, 720)
    }

    /// Inclusive runs of consecutive white pixels.
    fn white_runs(pixels: impl Iterator<Item = (u32, Rgb<u8>)>) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for (i, pixel) in pixels.filter(|&(_, pixel)| pixel == WHITE) {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == i => *end = i,
                _ => runs.push((i, i)),
            }
        }
        runs
    }

    fn row(frame: &Frame, y: u32) -> Vec<(u32, u32)> {
        white_runs((0..frame.width()).map(|x| (x, *frame.get_pixel(x, y))))
    }

    fn column(frame: &Frame, x: u32) -> Vec<(u32, u32)> {
        white_runs((0..frame.height()).map(|y| (y, *frame.get_pixel(x, y))))
    }

    /// Check a frame against the hand-derived default-pose reference.
    pub(crate) fn assert_default_pose(frame: &Frame) {
        assert_eq!(frame.dimensions(), (1280, 720));
        assert!(frame.pixels().all(|&pixel| pixel == WHITE || pixel == BLACK));
        assert_eq!(row(frame, 90), ROW_90);
        assert_eq!(row(frame, 200), ROW_200);
        assert_eq!(column(frame, 120), COLUMN_120);
    }

    #[test]
    fn default_frame_is_fixed() {
        let frame = renderer().render(&Skeleton::default());
        assert_default_pose(&frame);

        // joint markers
        for (_, point) in Skeleton::default().iter() {
            assert_eq!(*frame.get_pixel(point.x as u32, point.y as u32), WHITE);
        }
        // head outline around the eye midpoint (120, 90)
        assert_eq!(*frame.get_pixel(120 + 60, 90), WHITE);
        assert_eq!(*frame.get_pixel(120, 90 - 60), WHITE);
        // mouth, inside the head
        assert_eq!(*frame.get_pixel(120, 120), WHITE);
        assert_eq!(*frame.get_pixel(120, 115), BLACK);
        // left thigh mid-point
        assert_eq!(*frame.get_pixel(95, 450), WHITE);
        // background
        assert_eq!(*frame.get_pixel(0, 0), BLACK);
        assert_eq!(*frame.get_pixel(1279, 719), BLACK);
        assert_eq!(*frame.get_pixel(640, 360), BLACK);
    }

    #[test]
    fn moved_joint_breaks_the_reference() {
        let mut skeleton = Skeleton::default();
        skeleton.set(JointKind::LeftShoulder, Point::new(100, 210));
        let frame = renderer().render(&skeleton);
        assert_ne!(row(&frame, 200), ROW_200);
        assert_eq!(row(&frame, 90), ROW_90);
    }

    #[test]
    fn idempotent() {
        let mut skeleton = Skeleton::default();
        skeleton.set(JointKind::LeftWrist, Point::new(700, 30));
        skeleton.set(JointKind::RightKnee, Point::new(1000, 650));
        let r = renderer();
        assert_eq!(r.render(&skeleton), r.render(&skeleton));
    }

    #[test]
    fn fresh_canvas_every_call() {
        let r = renderer();
        let mut skeleton = Skeleton::default();
        let _ = r.render(&skeleton);

        for kind in [JointKind::LeftAnkle, JointKind::RightAnkle] {
            let p = skeleton.get(kind);
            skeleton.set(kind, Point::new(p.x + 600, p.y));
        }
        let moved = r.render(&skeleton);
        assert_eq!(*moved.get_pixel(80, 600), Rgb([0, 0, 0]));
        assert_eq!(*moved.get_pixel(680, 600), WHITE);
    }

    #[test]
    fn off_canvas_joints_are_clipped() {
        let mut skeleton = Skeleton::default();
        skeleton.set(JointKind::LeftEye, Point::new(-400, -300));
        skeleton.set(JointKind::Nose, Point::new(1279, 719));
        skeleton.set(JointKind::LeftElbow, Point::new(600, 360));
        skeleton.set(JointKind::LeftWrist, Point::new(5000, 360));
        skeleton.set(JointKind::RightAnkle, Point::new(i32::MAX, i32::MIN));
        skeleton.set(JointKind::RightKnee, Point::new(i32::MIN, i32::MAX));

        let frame = renderer().render(&skeleton);
        assert_eq!(frame.dimensions(), (1280, 720));
        assert_eq!(*frame.get_pixel(1279, 719), WHITE);
        // left forearm runs off the right edge
        assert_eq!(*frame.get_pixel(1279, 360), WHITE);
    }

    #[test]
    fn bones_cover_limbs_and_torso() {
        assert_eq!(BONES.len(), 12);
        for kind in [
            JointKind::LeftWrist,
            JointKind::RightWrist,
            JointKind::LeftAnkle,
            JointKind::RightAnkle,
        ] {
            assert!(BONES.iter().any(|&(a, b)| a == kind || b == kind));
        }
    }

    #[test]
    fn head_center_floors() {
        let mut skeleton = Skeleton::default();
        skeleton.set(JointKind::LeftEye, Point::new(-3, 5));
        skeleton.set(JointKind::RightEye, Point::new(0, 6));
        assert_eq!(head_center(&skeleton), Point::new(-2, 5));
    }
}
