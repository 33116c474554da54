/// Class label the pose network assigns to people.
pub(crate) const PERSON: &str = "person";

/// A rectangle in normalized `[0, 1]` coordinates of the inference frame.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub(crate) struct BoundingBox {
    pub(crate) xmin: f32,
    pub(crate) ymin: f32,
    pub(crate) width: f32,
    pub(crate) height: f32,
}

impl BoundingBox {
    pub(crate) fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    /// Scale the box to a `width` x `height` pixel grid, returned as
    /// `(x, y, w, h)`.
    pub(crate) fn to_pixels(self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (width, height) = (width as f32, height as f32);
        (
            self.xmin * width,
            self.ymin * height,
            self.width * width,
            self.height * height,
        )
    }
}

/// A landmark, normalized relative to its detection's bounding box.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub(crate) struct Landmark {
    pub(crate) x: f32,
    pub(crate) y: f32,
}

impl Landmark {
    pub(crate) fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One set of pose landmarks, index-aligned with [`crate::skeleton::JointKind`].
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Landmarks {
    pub(crate) points: Vec<Landmark>,
}

impl Landmarks {
    pub(crate) fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Detection {
    pub(crate) label: String,
    pub(crate) confidence: f32,
    pub(crate) bbox: BoundingBox,
    pub(crate) landmarks: Vec<Landmarks>,
}

impl Detection {
    pub(crate) fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            landmarks: Vec::new(),
        }
    }

    pub(crate) fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks.push(landmarks);
        self
    }

    pub(crate) fn is_person(&self) -> bool {
        self.label == PERSON
    }

    /// The landmark set used for skeleton tracking, if any.
    pub(crate) fn pose(&self) -> Option<&Landmarks> {
        self.landmarks.first()
    }
}

/// Region of interest: every detection attached to a single buffer, in the
/// order the post-process filter emitted them.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Roi {
    detections: Vec<Detection>,
}

impl Roi {
    pub(crate) fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub(crate) fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// The first person carrying landmarks. Later people in the same frame are
    /// ignored, only a single subject is tracked.
    pub(crate) fn first_person(&self) -> Option<(&Detection, &Landmarks)> {
        self.detections
            .iter()
            .filter(|detection| detection.is_person())
            .find_map(|detection| detection.pose().map(|pose| (detection, pose)))
    }
}
