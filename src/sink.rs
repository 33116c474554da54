use crate::{buffer::Buffer, error::Error, render::Frame, topology::SinkSpec};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const FPS_INTERVAL: Duration = Duration::from_secs(1);

/// Consumes finished frames.
pub(crate) trait Sink: Send {
    /// Present a frame; `false` means the viewer asked to stop.
    fn show(&mut self, frame: &Frame) -> Result<bool, Error>;
}

/// Discards frames, counting them.
#[derive(Debug, Default)]
pub(crate) struct NullSink {
    frames: u64,
}

impl NullSink {
    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }
}

impl Sink for NullSink {
    fn show(&mut self, _frame: &Frame) -> Result<bool, Error> {
        self.frames += 1;
        Ok(true)
    }
}

impl<S> Sink for &mut S
where
    S: Sink + ?Sized,
{
    fn show(&mut self, frame: &Frame) -> Result<bool, Error> {
        (**self).show(frame)
    }
}

#[cfg(feature = "gui")]
pub(crate) use highgui::HighGui;

#[cfg(feature = "gui")]
mod highgui {
    use super::Sink;
    use crate::{error::Error, render::Frame};
    use opencv::{
        core::{Mat, Mat_AUTO_STEP, Size, CV_8UC3},
        imgproc::{cvt_color, COLOR_RGB2BGR},
    };
    use std::convert::TryFrom;

    const Q_KEY: u8 = b'q';

    /// An OpenCV window; pressing `q` stops the pipeline.
    pub(crate) struct HighGui {
        window: String,
        wait_key_ms: i32,
        bgr: Mat,
    }

    impl HighGui {
        pub(crate) fn new(window: impl Into<String>, wait_key_ms: i32) -> Self {
            Self {
                window: window.into(),
                wait_key_ms,
                bgr: Mat::default(),
            }
        }
    }

    impl Sink for HighGui {
        fn show(&mut self, frame: &Frame) -> Result<bool, Error> {
            let (width, height) = frame.dimensions();
            let size = Size::new(
                i32::try_from(width).map_err(|e| Error::ConvertDimToI32(width, e))?,
                i32::try_from(height).map_err(|e| Error::ConvertDimToI32(height, e))?,
            );
            let mut bytes = frame.as_raw().clone();
            let rgb = unsafe {
                Mat::new_size_with_data(
                    size,
                    CV_8UC3,
                    bytes.as_mut_slice().as_mut_ptr().cast(),
                    Mat_AUTO_STEP,
                )
            }
            .map_err(|e| Error::OpenCv("Mat::new_size_with_data", e))?;
            cvt_color(&rgb, &mut self.bgr, COLOR_RGB2BGR, 0)
                .map_err(|e| Error::OpenCv("cvt_color", e))?;
            opencv::highgui::imshow(&self.window, &self.bgr)
                .map_err(|e| Error::OpenCv("imshow", e))?;
            let key = opencv::highgui::wait_key(self.wait_key_ms)
                .map_err(|e| Error::OpenCv("wait_key", e))?;
            Ok(key != i32::from(Q_KEY))
        }
    }
}

/// Frame rate over the whole run and over the last reporting interval.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub(crate) struct FpsMeasurement {
    pub(crate) fps: f64,
    pub(crate) average: f64,
    pub(crate) rendered: u64,
}

/// Final display sink: clock sync and fps measurement around a [`Sink`].
pub(crate) struct Display<S> {
    sink: S,
    sync: bool,
    signal_fps_measurements: bool,
    progress: Option<ProgressBar>,
    /// Wall time of the first rendered buffer and its timestamp.
    base: Option<(Instant, Duration)>,
    rendered: u64,
    last_report: Option<(Instant, u64)>,
    measurement: FpsMeasurement,
}

impl<S> Display<S>
where
    S: Sink,
{
    pub(crate) fn new(sink: S, spec: &SinkSpec) -> Self {
        let progress = if spec.text_overlay {
            Some(
                ProgressBar::new_spinner().with_style(
                    ProgressStyle::default_spinner()
                        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
                        .template("{prefix:.bold.dim} {spinner} {wide_msg}"),
                ),
            )
        } else {
            None
        };
        Self {
            sink,
            sync: spec.sync,
            signal_fps_measurements: spec.signal_fps_measurements,
            progress,
            base: None,
            rendered: 0,
            last_report: None,
            measurement: Default::default(),
        }
    }

    pub(crate) fn measurement(&self) -> FpsMeasurement {
        self.measurement
    }

    /// Present a buffer's payload; returns `false` once the sink wants to stop.
    pub(crate) fn render(&mut self, buffer: &Buffer) -> Result<bool, Error> {
        let frame = match buffer.payload.as_ref() {
            Some(frame) => frame,
            None => {
                trace!(message = "buffer without payload", seq = buffer.seq);
                return Ok(true);
            }
        };

        let now = Instant::now();
        let (start, first_pts) = *self.base.get_or_insert((now, buffer.pts));
        if self.sync {
            let due = start + buffer.pts.saturating_sub(first_pts);
            if let Some(wait) = due.checked_duration_since(now) {
                std::thread::sleep(wait);
            }
        }

        let keep_going = self.sink.show(frame)?;
        self.rendered += 1;
        self.measure();
        Ok(keep_going)
    }

    fn measure(&mut self) {
        let now = Instant::now();
        let (last, last_rendered) = *self.last_report.get_or_insert((now, 0));
        let since_last = now.duration_since(last);
        if since_last < FPS_INTERVAL {
            return;
        }

        let total = self
            .base
            .map(|(start, _)| now.duration_since(start))
            .unwrap_or_default();
        self.measurement = FpsMeasurement {
            fps: (self.rendered - last_rendered) as f64 / since_last.as_secs_f64(),
            average: self.rendered as f64 / total.as_secs_f64().max(f64::EPSILON),
            rendered: self.rendered,
        };
        self.last_report = Some((now, self.rendered));

        let FpsMeasurement {
            fps,
            average,
            rendered,
        } = self.measurement;
        if let Some(progress) = self.progress.as_ref() {
            progress.set_message(format!("FPS => current: {:.1}, average: {:.1}", fps, average));
            progress.inc(1);
        }
        if self.signal_fps_measurements {
            debug!(message = "fps measurement", fps, average, rendered);
        }
    }

    pub(crate) fn finish(self) -> S {
        if let Some(progress) = self.progress {
            progress.finish_and_clear();
        }
        self.sink
    }
}
