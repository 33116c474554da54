use crate::{detection::Roi, render::Frame};
use std::time::Duration;

/// A unit of data flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Buffer {
    /// Capture order, starting at zero.
    pub(crate) seq: u64,
    /// Presentation timestamp relative to the first frame.
    pub(crate) pts: Duration,
    pub(crate) payload: Option<Frame>,
    pub(crate) roi: Roi,
}

impl Buffer {
    pub(crate) fn new(seq: u64, pts: Duration, frame: Frame) -> Self {
        Self {
            seq,
            pts,
            payload: Some(frame),
            roi: Roi::default(),
        }
    }
}
