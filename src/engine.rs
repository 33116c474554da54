use crate::{buffer::Buffer, detection::Roi, error::Error, render::Frame, topology::InferenceSpec};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument};

/// The neural engine plus its post-process filter.
///
/// Receives a batch of network-sized frames and returns one region of
/// interest per frame, in the same order.
pub(crate) trait Network: Send {
    fn infer(&mut self, batch: &[Frame]) -> Result<Vec<Roi>, Error>;
}

impl<F> Network for F
where
    F: FnMut(&[Frame]) -> Result<Vec<Roi>, Error> + Send,
{
    fn infer(&mut self, batch: &[Frame]) -> Result<Vec<Roi>, Error> {
        self(batch)
    }
}

/// A network that never detects anything.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Idle;

impl Network for Idle {
    fn infer(&mut self, batch: &[Frame]) -> Result<Vec<Roi>, Error> {
        Ok(vec![Roi::default(); batch.len()])
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Timing {
    pub(crate) inference: Duration,
    pub(crate) batches: usize,
    pub(crate) failed_batches: usize,
}

/// Collects buffers into fixed-size batches and attaches the network's
/// detections to each one.
pub(crate) struct Engine<N> {
    network: N,
    batch_size: usize,
    pending: Vec<Buffer>,
    pub(crate) timing: Timing,
}

impl<N> Engine<N>
where
    N: Network,
{
    pub(crate) fn new(network: N, spec: &InferenceSpec) -> Result<Self, Error> {
        if spec.batch_size == 0 {
            return Err(Error::BatchSize);
        }
        Ok(Self {
            network,
            batch_size: spec.batch_size,
            pending: Vec::with_capacity(spec.batch_size),
            timing: Default::default(),
        })
    }

    /// Queue a buffer; returns the whole batch once it is full.
    pub(crate) fn push(&mut self, buffer: Buffer) -> Vec<Buffer> {
        self.pending.push(buffer);
        if self.pending.len() < self.batch_size {
            return Vec::new();
        }
        self.run()
    }

    /// Run whatever is left at end of stream.
    pub(crate) fn flush(&mut self) -> Vec<Buffer> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        self.run()
    }

    #[instrument(name = "Engine::run", skip(self), level = "debug")]
    fn run(&mut self) -> Vec<Buffer> {
        let mut batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));

        let start_inference = Instant::now();
        let result = self.infer(&batch);
        self.timing.inference += start_inference.elapsed();
        self.timing.batches += 1;

        match result {
            Ok(rois) => {
                for (buffer, roi) in batch.iter_mut().zip(rois) {
                    buffer.roi = roi;
                }
                debug!(message = "inferred batch", size = batch.len());
            }
            Err(error) => {
                // the buffers still reach the display, just without detections
                self.timing.failed_batches += 1;
                error!(message = "inference failed", size = batch.len(), %error);
            }
        }
        batch
    }

    fn infer(&mut self, batch: &[Buffer]) -> Result<Vec<Roi>, Error> {
        let frames = batch
            .iter()
            .filter_map(|buffer| buffer.payload.clone())
            .collect::<Vec<_>>();
        if frames.len() != batch.len() {
            return Err(Error::Network(format!(
                "{} of {} buffers carry no frame",
                batch.len() - frames.len(),
                batch.len()
            )));
        }
        let rois = self.network.infer(&frames)?;
        if rois.len() != batch.len() {
            return Err(Error::BatchResults {
                expected: batch.len(),
                got: rois.len(),
            });
        }
        Ok(rois)
    }
}
