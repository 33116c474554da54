use crate::{
    detection::{BoundingBox, Landmarks},
    error::Error,
    skeleton::{JointKind, Joints, Point, NUM_JOINTS},
};

/// Converts box-relative landmarks into absolute canvas pixels.
///
/// The canvas size is a display concern and is deliberately independent of
/// the network's input resolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Mapper {
    width: u32,
    height: u32,
}

impl Mapper {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Map all seventeen landmarks of a pose.
    ///
    /// Inputs outside `[0, 1]` are not clamped; the resulting pixels may land
    /// off the canvas.
    pub(crate) fn map(&self, bbox: &BoundingBox, landmarks: &Landmarks) -> Result<Joints, Error> {
        if landmarks.points.len() != NUM_JOINTS {
            return Err(Error::LandmarkCount {
                expected: NUM_JOINTS,
                got: landmarks.points.len(),
            });
        }

        let (width, height) = (self.width as f32, self.height as f32);
        let mut joints = [Point::new(0, 0); NUM_JOINTS];

        for (index, landmark) in landmarks.points.iter().enumerate() {
            let kind = JointKind::from_index(index)?;
            // `as` saturates and maps NaN to zero
            joints[kind.idx()] = Point::new(
                ((landmark.x * bbox.width + bbox.xmin) * width).round() as i32,
                ((landmark.y * bbox.height + bbox.ymin) * height).round() as i32,
            );
        }

        Ok(joints)
    }
}
