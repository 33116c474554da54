use crate::error::Error;
use num_traits::FromPrimitive;
use std::{fmt, str::FromStr};

/// Integer pixel coordinate on the output canvas.
pub(crate) type Point = imageproc::point::Point<i32>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, num_derive::FromPrimitive)]
pub(crate) enum JointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

pub(crate) const NUM_JOINTS: usize = JointKind::ALL.len();

impl JointKind {
    /// Every joint, in landmark index order.
    pub(crate) const ALL: [JointKind; 17] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub(crate) fn idx(self) -> usize {
        self as usize
    }

    pub(crate) fn from_index(index: usize) -> Result<Self, Error> {
        Self::from_usize(index).ok_or(Error::ConvertUSizeToJointKind(index))
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

impl fmt::Display for JointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JointKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownJoint(s.to_owned()))
    }
}

pub(crate) type Joints = [Point; NUM_JOINTS];

/// Pose the character holds until the first detection arrives.
pub(crate) const DEFAULT_JOINTS: Joints = [
    Point { x: 120, y: 100 },
    Point { x: 100, y: 90 },
    Point { x: 140, y: 90 },
    Point { x: 80, y: 90 },
    Point { x: 160, y: 90 },
    Point { x: 100, y: 200 },
    Point { x: 150, y: 200 },
    Point { x: 80, y: 300 },
    Point { x: 170, y: 300 },
    Point { x: 60, y: 400 },
    Point { x: 190, y: 400 },
    Point { x: 100, y: 400 },
    Point { x: 150, y: 400 },
    Point { x: 90, y: 500 },
    Point { x: 160, y: 500 },
    Point { x: 80, y: 600 },
    Point { x: 170, y: 600 },
];

/// Current on-screen position of every joint of the character.
///
/// All seventeen joints exist for the lifetime of the registry. Positions are
/// only ever overwritten, so a frame without a detection keeps the last pose.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Skeleton {
    joints: Joints,
}

impl Default for Skeleton {
    fn default() -> Self {
        Self {
            joints: DEFAULT_JOINTS,
        }
    }
}

impl Skeleton {
    pub(crate) fn get(&self, kind: JointKind) -> Point {
        self.joints[kind.idx()]
    }

    pub(crate) fn set(&mut self, kind: JointKind, point: Point) {
        self.joints[kind.idx()] = point;
    }

    pub(crate) fn get_by_name(&self, name: &str) -> Result<Point, Error> {
        Ok(self.get(name.parse()?))
    }

    pub(crate) fn set_by_name(&mut self, name: &str, point: Point) -> Result<(), Error> {
        self.set(name.parse()?, point);
        Ok(())
    }

    /// Overwrite every joint at once.
    pub(crate) fn update(&mut self, joints: Joints) {
        self.joints = joints;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (JointKind, Point)> + '_ {
        JointKind::ALL.iter().copied().zip(self.joints.iter().copied())
    }
}
