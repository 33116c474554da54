use crate::{error::Error, render::Frame};

/// Produces raw frames for the pipeline.
pub(crate) trait Source: Send {
    /// The next frame, or `None` at end of stream.
    fn read(&mut self) -> Result<Option<Frame>, Error>;
}

/// Synthesizes black frames, optionally a fixed number of them.
#[derive(Debug, Clone)]
pub(crate) struct TestPattern {
    width: u32,
    height: u32,
    remaining: Option<u64>,
}

impl TestPattern {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            remaining: None,
        }
    }

    /// Stop after `frames` frames.
    pub(crate) fn frames(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl Source for TestPattern {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        match self.remaining.as_mut() {
            Some(0) => return Ok(None),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Ok(Some(Frame::new(self.width, self.height)))
    }
}

#[cfg(feature = "gui")]
pub(crate) use camera::Camera;

#[cfg(feature = "gui")]
mod camera {
    use super::Source;
    use crate::{
        error::Error,
        render::Frame,
        topology::{Caps, SourceKind},
    };
    use opencv::{
        core::Mat,
        imgproc::{cvt_color, COLOR_BGR2RGB},
        prelude::*,
        videoio::{VideoCapture, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, CAP_V4L2},
    };
    use std::convert::TryFrom;
    use tracing::info;

    /// A V4L2 capture device read through OpenCV.
    pub(crate) struct Camera {
        capture: VideoCapture,
        bgr: Mat,
        rgb: Mat,
        limit: Option<u64>,
    }

    impl Camera {
        pub(crate) fn open(source: &SourceKind, caps: &Caps) -> Result<Self, Error> {
            let mut capture = match source {
                SourceKind::Rpi => VideoCapture::new(0, CAP_V4L2),
                SourceKind::Usb { device } => {
                    let device = device.to_string_lossy();
                    VideoCapture::from_file(&device, CAP_V4L2)
                }
            }
            .map_err(|e| Error::OpenCv("VideoCapture::new", e))?;

            if !capture
                .is_opened()
                .map_err(|e| Error::OpenCv("VideoCapture::is_opened", e))?
            {
                return Err(Error::OpenCapture(source.to_string()));
            }

            capture
                .set(CAP_PROP_FRAME_WIDTH, f64::from(caps.width))
                .map_err(|e| Error::OpenCv("VideoCapture::set", e))?;
            capture
                .set(CAP_PROP_FRAME_HEIGHT, f64::from(caps.height))
                .map_err(|e| Error::OpenCv("VideoCapture::set", e))?;

            info!(
                message = "opened capture device",
                source = %source,
                width = caps.width,
                height = caps.height
            );

            Ok(Self {
                capture,
                bgr: Mat::default(),
                rgb: Mat::default(),
                limit: None,
            })
        }

        pub(crate) fn frames(mut self, frames: u64) -> Self {
            self.limit = Some(frames);
            self
        }
    }

    /// Copy an 8-bit 3-channel Mat into an owned frame.
    fn mat_to_frame(input: &Mat) -> Result<Frame, Error> {
        let width = u32::try_from(input.cols()).unwrap_or_default();
        let height = u32::try_from(input.rows()).unwrap_or_default();
        let step = input
            .step1(0)
            .map_err(|e| Error::OpenCv("Mat::step1", e))?
            * input
                .elem_size1()
                .map_err(|e| Error::OpenCv("Mat::elem_size1", e))?;
        let num_elements = step * height as usize;

        let raw_data = input.data().map_err(|e| Error::OpenCv("Mat::data", e))?;
        let bytes = unsafe { std::slice::from_raw_parts(raw_data, num_elements) };
        let row = width as usize * 3;
        let packed = bytes
            .chunks(step.max(1))
            .flat_map(|line| line.iter().take(row).copied())
            .collect::<Vec<_>>();
        Frame::from_raw(width, height, packed).ok_or(Error::FrameFromRaw { width, height })
    }

    impl Source for Camera {
        fn read(&mut self) -> Result<Option<Frame>, Error> {
            match self.limit.as_mut() {
                Some(0) => return Ok(None),
                Some(limit) => *limit -= 1,
                None => {}
            }
            if !self
                .capture
                .read(&mut self.bgr)
                .map_err(|e| Error::OpenCv("VideoCapture::read", e))?
            {
                return Ok(None);
            }
            cvt_color(&self.bgr, &mut self.rgb, COLOR_BGR2RGB, 0)
                .map_err(|e| Error::OpenCv("cvt_color", e))?;
            mat_to_frame(&self.rgb).map(Some)
        }
    }
}
