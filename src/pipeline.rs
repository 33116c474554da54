use crate::{
    buffer::Buffer,
    callback::AppCallback,
    engine::{Engine, Network, Timing},
    error::Error,
    overlay,
    queue::{self, QueueSender},
    sink::{Display, FpsMeasurement, Sink},
    source::Source,
    topology::{
        QueueSpec, Topology, BYPASS_QUEUE, CALLBACK_QUEUE, INFERENCE_QUEUE, INFERRED_QUEUE,
    },
};
use crossbeam::channel::Receiver;
use image::imageops::{self, FilterType};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace};

/// Counters collected over one run.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Stats {
    pub(crate) captured: u64,
    pub(crate) rendered: u64,
    /// Buffers the bypass queue discarded under its leaky policy.
    pub(crate) bypass_dropped: u64,
    /// Inference results whose bypass twin had been dropped.
    pub(crate) unpaired: u64,
    pub(crate) timing: Timing,
    pub(crate) fps: FpsMeasurement,
}

/// Clears the shared running flag when a stage exits, however it exits.
struct StageGuard<'a> {
    stage: &'static str,
    running: &'a AtomicBool,
}

impl<'a> StageGuard<'a> {
    fn new(stage: &'static str, running: &'a AtomicBool) -> Self {
        debug!(message = "stage started", stage);
        Self { stage, running }
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        debug!(message = "stage exited", stage = self.stage);
    }
}

fn forward(queue: &mut QueueSender<Buffer>, buffers: Vec<Buffer>) -> Result<(), Error> {
    buffers.into_iter().try_for_each(|buffer| queue.push(buffer))
}

/// Pair bypass buffers with inference results by sequence number.
///
/// The merged buffer keeps the bypass payload and takes the inference
/// detections. Returns how many inference buffers had no bypass twin.
fn pair(
    bypass: Receiver<Buffer>,
    inferred: Receiver<Buffer>,
    merged: &mut QueueSender<Buffer>,
) -> u64 {
    let mut unpaired = 0;
    let mut inferred = inferred.into_iter().peekable();
    for mut buffer in bypass {
        while let Some(stale) = inferred.next_if(|other| other.seq < buffer.seq) {
            unpaired += 1;
            trace!(message = "discarding unpaired inference buffer", seq = stale.seq);
        }
        match inferred.next_if(|other| other.seq == buffer.seq) {
            Some(other) => buffer.roi = other.roi,
            None => trace!(message = "no inference result", seq = buffer.seq),
        }
        if let Err(error) = merged.push(buffer) {
            debug!(message = "downstream closed", %error);
            break;
        }
    }
    unpaired
}

/// Runs a validated [`Topology`] on threads, one per stage group.
pub(crate) struct Pipeline<'a> {
    topology: &'a Topology,
    running: Arc<AtomicBool>,
    overlay: bool,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(topology: &'a Topology, running: Arc<AtomicBool>) -> Self {
        Self {
            topology,
            running,
            overlay: true,
        }
    }

    /// Draw detection boxes on the outgoing frames.
    pub(crate) fn overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    fn queue(&self, name: &'static str) -> Result<QueueSpec, Error> {
        self.topology
            .queue(name)
            .copied()
            .ok_or(Error::MissingStage(name))
    }

    /// Stream until the source ends, the sink asks to stop, a stage fails, or
    /// the running flag is cleared.
    #[instrument(name = "Pipeline::run", skip_all)]
    pub(crate) fn run<Src, N, S>(
        &self,
        mut source: Src,
        network: N,
        sink: S,
        callback: &mut AppCallback,
    ) -> Result<Stats, Error>
    where
        Src: Source,
        N: Network,
        S: Sink,
    {
        let topology = self.topology;
        let running = &*self.running;
        let overlay = self.overlay;

        let caps = topology.network_caps()?;
        let (width, height) = (caps.width, caps.height);
        let interval = topology
            .framerate()
            .filter(|&(num, den)| num > 0 && den > 0)
            .map(|(num, den)| Duration::from_secs_f64(f64::from(den) / f64::from(num)));

        let bypass = topology.bypass_queue()?;
        let (mut bypass_tx, bypass_rx) =
            queue::bounded::<Buffer>(BYPASS_QUEUE, bypass.capacity, bypass.leaky);
        let spec = self.queue(INFERENCE_QUEUE)?;
        let (mut inference_tx, inference_rx) =
            queue::bounded::<Buffer>(INFERENCE_QUEUE, spec.capacity, spec.leaky);
        let spec = self.queue(INFERRED_QUEUE)?;
        let (mut inferred_tx, inferred_rx) =
            queue::bounded::<Buffer>(INFERRED_QUEUE, spec.capacity, spec.leaky);
        let spec = self.queue(CALLBACK_QUEUE)?;
        let (mut merged_tx, merged_rx) =
            queue::bounded::<Buffer>(CALLBACK_QUEUE, spec.capacity, spec.leaky);

        let mut engine = Engine::new(network, topology.inference()?)?;
        let mut display = Display::new(sink, topology.sink()?);

        info!(
            message = "starting pipeline",
            source = %topology.source(),
            width,
            height
        );

        crossbeam::thread::scope(|scope| {
            let source_stage = scope.spawn(move |_| -> Result<(u64, u64), Error> {
                let _guard = StageGuard::new("source", running);
                let start = Instant::now();
                let mut seq = 0;
                while running.load(Ordering::SeqCst) {
                    let frame = match source.read().map_err(|e| Error::ReadFrame(Box::new(e)))? {
                        Some(frame) => frame,
                        None => {
                            info!(message = "end of stream", frames = seq);
                            break;
                        }
                    };
                    let frame = if frame.dimensions() != (width, height) {
                        imageops::resize(&frame, width, height, FilterType::Triangle)
                    } else {
                        frame
                    };
                    let pts = match interval {
                        Some(interval) => interval.mul_f64(seq as f64),
                        None => start.elapsed(),
                    };
                    let buffer = Buffer::new(seq, pts, frame);
                    seq += 1;

                    if bypass_tx.is_full() {
                        trace!(
                            message = "queue full",
                            queue = bypass_tx.name(),
                            len = bypass_tx.len(),
                            leaky = %bypass.leaky
                        );
                    }

                    if let Err(error) = bypass_tx
                        .push(buffer.clone())
                        .and_then(|()| inference_tx.push(buffer))
                    {
                        debug!(message = "downstream closed", %error);
                        break;
                    }
                }
                Ok((seq, bypass_tx.dropped()))
            });

            let inference_stage = scope.spawn(move |_| {
                let _guard = StageGuard::new("inference", running);
                for buffer in inference_rx {
                    let batch = engine.push(buffer);
                    if let Err(error) = forward(&mut inferred_tx, batch) {
                        debug!(message = "downstream closed", %error);
                        return engine.timing;
                    }
                }
                if let Err(error) = forward(&mut inferred_tx, engine.flush()) {
                    debug!(message = "downstream closed", %error);
                }
                engine.timing
            });

            let mux_stage = scope.spawn(move |_| {
                let _guard = StageGuard::new("muxer", running);
                pair(bypass_rx, inferred_rx, &mut merged_tx)
            });

            let post_stage = scope.spawn(move |_| -> Result<(u64, FpsMeasurement), Error> {
                let _guard = StageGuard::new("post", running);
                let mut rendered = 0;
                for mut buffer in merged_rx {
                    callback.on_buffer(Some(&mut buffer));
                    if overlay {
                        if let Some(frame) = buffer.payload.as_mut() {
                            overlay::draw_detections(frame, &buffer.roi);
                        }
                    }
                    let keep_going = display
                        .render(&buffer)
                        .map_err(|e| Error::ShowFrame(Box::new(e)))?;
                    rendered += 1;
                    if !keep_going {
                        info!(message = "display closed", rendered);
                        break;
                    }
                }
                let fps = display.measurement();
                display.finish();
                Ok((rendered, fps))
            });

            let (rendered, fps) = post_stage
                .join()
                .map_err(|_| Error::StagePanicked("post"))??;
            let unpaired = mux_stage
                .join()
                .map_err(|_| Error::StagePanicked("muxer"))?;
            let timing = inference_stage
                .join()
                .map_err(|_| Error::StagePanicked("inference"))?;
            let (captured, bypass_dropped) = source_stage
                .join()
                .map_err(|_| Error::StagePanicked("source"))??;

            Ok(Stats {
                captured,
                rendered,
                bypass_dropped,
                unpaired,
                timing,
                fps,
            })
        })
        .map_err(|_| Error::StagePanicked("pipeline"))?
    }
}

#[cfg(test)]
mod tests {
    use super::{pair, Pipeline};
    use crate::{
        buffer::Buffer,
        callback::AppCallback,
        config::PipelineConfig,
        detection::{BoundingBox, Detection, Landmark, Landmarks, Roi},
        error::Error,
        mapper::Mapper,
        queue::{self, Leaky},
        render::{Frame, Renderer},
        sink::Sink,
        skeleton::{JointKind, Point, NUM_JOINTS},
        source::{Source, TestPattern},
        topology::{SourceKind, Topology, TopologyBuilder},
    };
    use image::Rgb;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    #[derive(Default)]
    struct Collect {
        frames: Vec<Frame>,
        stop_after: Option<usize>,
    }

    impl Sink for Collect {
        fn show(&mut self, frame: &Frame) -> Result<bool, Error> {
            self.frames.push(frame.clone());
            Ok(self.stop_after.map_or(true, |n| self.frames.len() < n))
        }
    }

    fn topology() -> Topology {
        let config = PipelineConfig {
            sync: false,
            ..PipelineConfig::default()
        };
        TopologyBuilder::new(&config)
            .skip_artifact_check()
            .build(&SourceKind::Rpi)
            .unwrap()
    }

    fn callback() -> AppCallback {
        AppCallback::new(Mapper::new(1280, 720), Renderer::new(1280, 720))
    }

    fn centered(batch: &[Frame]) -> Result<Vec<Roi>, Error> {
        Ok(batch
            .iter()
            .map(|frame| {
                assert_eq!(frame.dimensions(), (640, 640));
                Roi::new(vec![Detection::new(
                    "person",
                    0.9,
                    BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                )
                .with_landmarks(Landmarks::new(vec![Landmark::new(0.5, 0.5); NUM_JOINTS]))])
            })
            .collect())
    }

    #[test]
    fn end_to_end() {
        let topology = topology();
        let mut sink = Collect::default();
        let mut callback = callback();
        let stats = Pipeline::new(&topology, Arc::new(AtomicBool::new(true)))
            .run(
                TestPattern::new(320, 180).frames(10),
                centered,
                &mut sink,
                &mut callback,
            )
            .unwrap();

        assert_eq!(stats.captured, 10);
        assert_eq!(stats.rendered, 10);
        assert_eq!(stats.bypass_dropped, 0);
        assert_eq!(stats.unpaired, 0);
        assert_eq!(stats.timing.batches, 5);
        assert_eq!(callback.frame_count(), 10);
        assert_eq!(
            callback.skeleton().get(JointKind::Nose),
            Point::new(640, 360)
        );

        assert_eq!(sink.frames.len(), 10);
        let last = sink.frames.last().unwrap();
        assert_eq!(last.dimensions(), (1280, 720));
        // detection box outline from the overlay
        assert_eq!(*last.get_pixel(0, 0), Rgb([0, 255, 0]));
    }

    #[test]
    fn far_off_detections_do_not_stop_the_run() {
        let topology = topology();
        let mut sink = Collect::default();
        let mut callback = callback();
        let far_off = |batch: &[Frame]| -> Result<Vec<Roi>, Error> {
            let roi = Roi::new(vec![Detection::new(
                "person",
                0.9,
                BoundingBox::new(1e7, 0.0, 1e7, 0.5),
            )
            .with_landmarks(Landmarks::new(vec![Landmark::new(1e9, 1e9); NUM_JOINTS]))]);
            Ok(vec![roi; batch.len()])
        };
        let stats = Pipeline::new(&topology, Arc::new(AtomicBool::new(true)))
            .run(
                TestPattern::new(640, 640).frames(4),
                far_off,
                &mut sink,
                &mut callback,
            )
            .unwrap();
        assert_eq!(stats.captured, 4);
        assert_eq!(stats.rendered, 4);
        assert_eq!(sink.frames.len(), 4);
        assert_eq!(callback.frame_count(), 4);
    }

    #[test]
    fn partial_batch_is_flushed() {
        let topology = topology();
        let mut sink = Collect::default();
        let mut callback = callback();
        let stats = Pipeline::new(&topology, Arc::new(AtomicBool::new(true)))
            .overlay(false)
            .run(
                TestPattern::new(640, 640).frames(5),
                centered,
                &mut sink,
                &mut callback,
            )
            .unwrap();
        assert_eq!(stats.rendered, 5);
        assert_eq!(stats.timing.batches, 3);
        let reference = callback.render();
        assert_eq!(sink.frames.last().unwrap().as_raw(), reference.as_raw());
    }

    #[test]
    fn sink_stop_shuts_everything_down() {
        let topology = topology();
        let running = Arc::new(AtomicBool::new(true));
        let mut sink = Collect {
            stop_after: Some(3),
            ..Collect::default()
        };
        let mut callback = callback();
        let stats = Pipeline::new(&topology, running.clone())
            .run(
                TestPattern::new(640, 640),
                crate::engine::Idle,
                &mut sink,
                &mut callback,
            )
            .unwrap();
        assert_eq!(stats.rendered, 3);
        assert_eq!(sink.frames.len(), 3);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn cleared_flag_reads_nothing() {
        let topology = topology();
        let mut sink = Collect::default();
        let stats = Pipeline::new(&topology, Arc::new(AtomicBool::new(false)))
            .run(
                TestPattern::new(640, 640),
                crate::engine::Idle,
                &mut sink,
                &mut callback(),
            )
            .unwrap();
        assert_eq!(stats.captured, 0);
        assert!(sink.frames.is_empty());
    }

    struct Broken;

    impl Source for Broken {
        fn read(&mut self) -> Result<Option<Frame>, Error> {
            Err(Error::EmptyDevice)
        }
    }

    #[test]
    fn source_failure_is_reported() {
        let topology = topology();
        let result = Pipeline::new(&topology, Arc::new(AtomicBool::new(true))).run(
            Broken,
            crate::engine::Idle,
            Collect::default(),
            &mut callback(),
        );
        assert!(matches!(result, Err(Error::ReadFrame(_))));
    }

    #[test]
    fn muxer_discards_results_without_bypass_twin() {
        let buffer = |seq: u64, label: &str| {
            let mut buffer = Buffer::new(seq, Duration::ZERO, Frame::new(1, 1));
            buffer.roi = Roi::new(vec![Detection::new(label, 1.0, BoundingBox::default())]);
            buffer
        };

        let (mut bypass_tx, bypass_rx) = queue::bounded("bypass", 8, Leaky::No);
        let (mut inferred_tx, inferred_rx) = queue::bounded("inferred", 8, Leaky::No);
        let (mut merged_tx, merged_rx) = queue::bounded("merged", 8, Leaky::No);
        for seq in [0, 2, 3] {
            let mut bypass = buffer(seq, "bypass");
            bypass.roi = Roi::default();
            bypass_tx.push(bypass).unwrap();
        }
        for seq in 0..4 {
            inferred_tx.push(buffer(seq, "inferred")).unwrap();
        }
        drop(bypass_tx);
        drop(inferred_tx);

        assert_eq!(pair(bypass_rx, inferred_rx, &mut merged_tx), 1);
        drop(merged_tx);
        let merged = merged_rx.iter().collect::<Vec<_>>();
        assert_eq!(
            merged.iter().map(|b| b.seq).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        assert!(merged
            .iter()
            .all(|b| b.roi.detections()[0].label == "inferred"));
    }
}
