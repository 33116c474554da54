use crate::{
    buffer::Buffer,
    mapper::Mapper,
    render::{Frame, Renderer},
    skeleton::Skeleton,
};
use tracing::{instrument, trace, warn};

/// What the runtime should do with the buffer after the callback ran.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ProbeReturn {
    /// Nothing to process, let it through untouched.
    Pass,
    /// The buffer was handled, keep streaming.
    Ok,
}

/// Per-buffer bridge from detections to the rendered character.
///
/// Owns the joint registry; the `&mut self` receiver is what keeps two
/// buffers from updating it at once.
#[derive(Debug)]
pub(crate) struct AppCallback {
    skeleton: Skeleton,
    mapper: Mapper,
    renderer: Renderer,
    frame_count: u64,
}

impl AppCallback {
    pub(crate) fn new(mapper: Mapper, renderer: Renderer) -> Self {
        Self {
            skeleton: Skeleton::default(),
            mapper,
            renderer,
            frame_count: 0,
        }
    }

    /// Start from `skeleton` instead of the seeded default pose.
    pub(crate) fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        self.skeleton = skeleton;
        self
    }

    pub(crate) fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[instrument(name = "AppCallback::on_buffer", skip_all, level = "trace")]
    pub(crate) fn on_buffer(&mut self, buffer: Option<&mut Buffer>) -> ProbeReturn {
        let buffer = match buffer {
            Some(buffer) => buffer,
            None => return ProbeReturn::Pass,
        };

        self.frame_count += 1;

        if let Some((detection, landmarks)) = buffer.roi.first_person() {
            match self.mapper.map(&detection.bbox, landmarks) {
                Ok(joints) => self.skeleton.update(joints),
                Err(error) => warn!(
                    message = "keeping previous pose",
                    seq = buffer.seq,
                    %error
                ),
            }
        } else {
            trace!(message = "no person this frame", seq = buffer.seq);
        }

        buffer.payload = Some(self.render());
        ProbeReturn::Ok
    }

    pub(crate) fn render(&self) -> Frame {
        self.renderer.render(&self.skeleton)
    }
}
