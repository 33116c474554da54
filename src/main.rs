use anyhow::{anyhow, Context, Result};
use callback::AppCallback;
use config::PipelineConfig;
use mapper::Mapper;
use pipeline::{Pipeline, Stats};
use queue::Leaky;
use render::Renderer;
use skeleton::{Point, Skeleton};
use std::{
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use structopt::StructOpt;
use topology::{SourceKind, Topology, TopologyBuilder};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;

mod buffer;
mod callback;
mod config;
mod detection;
mod engine;
mod error;
mod mapper;
mod overlay;
mod pipeline;
mod queue;
mod render;
mod sink;
mod skeleton;
mod source;
mod topology;

/// `NAME=X,Y` starting position for one joint.
#[derive(Debug, Clone)]
struct JointOverride {
    name: String,
    point: Point,
}

impl FromStr for JointOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, xy) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=X,Y, got {:?}", s))?;
        let (x, y) = xy
            .split_once(',')
            .ok_or_else(|| anyhow!("expected X,Y, got {:?}", xy))?;
        Ok(Self {
            name: name.trim().to_owned(),
            point: Point::new(
                x.trim().parse().context("invalid x coordinate")?,
                y.trim().parse().context("invalid y coordinate")?,
            ),
        })
    }
}

#[derive(structopt::StructOpt)]
struct Opt {
    /// Video source: `rpi` for the board camera, otherwise a V4L2 device path.
    #[structopt(short, long, default_value = "rpi")]
    input: SourceKind,

    /// Show the measured frame rate.
    #[structopt(short = "-f", long)]
    show_fps: bool,

    /// Render frames as soon as they arrive instead of on their timestamp.
    #[structopt(long)]
    disable_sync: bool,

    #[structopt(long, default_value = "xvimagesink")]
    video_sink: String,

    /// Compiled pose network.
    #[structopt(long, default_value = "resources/yolov8s_pose_h8l_pi.hef")]
    hef_path: PathBuf,

    /// Shared object exporting the post-process filter.
    #[structopt(long, default_value = "resources/libyolov8pose_post.so")]
    postprocess_so: PathBuf,

    #[structopt(short, long, default_value = "2")]
    batch_size: usize,

    /// Bypass queue policy when full: no, upstream or downstream.
    #[structopt(long, default_value = "no")]
    bypass_leaky: Leaky,

    #[structopt(long, default_value = "20")]
    bypass_capacity: usize,

    /// Stop after this many frames.
    #[structopt(short = "-n", long)]
    frames: Option<u64>,

    /// Do not draw detection boxes on the output.
    #[structopt(long)]
    no_overlay: bool,

    /// Starting joint position, e.g. `left_wrist=60,400`. Repeatable.
    #[structopt(short, long = "joint")]
    joints: Vec<JointOverride>,

    /// Print the launch description and exit.
    #[structopt(long)]
    print_pipeline: bool,

    /// Write the pipeline graph in Graphviz format.
    #[structopt(long)]
    dump_dot: Option<PathBuf>,

    /// Do not require the model and post-process library to exist.
    #[structopt(long)]
    skip_artifact_check: bool,

    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,
}

impl Opt {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            hef_path: self.hef_path.clone(),
            postprocess_so: self.postprocess_so.clone(),
            video_sink: self.video_sink.clone(),
            sync: !self.disable_sync,
            show_fps: self.show_fps,
            bypass_capacity: self.bypass_capacity,
            bypass_leaky: self.bypass_leaky,
            overlay: !self.no_overlay,
            ..PipelineConfig::default()
        }
    }
}

#[cfg(not(feature = "gui"))]
fn stream(
    pipeline: &Pipeline<'_>,
    topology: &Topology,
    frames: Option<u64>,
    callback: &mut AppCallback,
) -> Result<Stats> {
    use sink::NullSink;
    use source::TestPattern;

    let caps = topology.capture_caps()?;
    let mut source = TestPattern::new(caps.width, caps.height);
    if let Some(frames) = frames {
        source = source.frames(frames);
    }
    tracing::warn!(
        message = "built without the gui feature, streaming a test pattern",
        input = %topology.source()
    );

    let mut sink = NullSink::default();
    let stats = pipeline
        .run(source, engine::Idle, &mut sink, callback)
        .context("pipeline failed")?;
    debug!(message = "null sink finished", frames = sink.frames());
    Ok(stats)
}

#[cfg(feature = "gui")]
fn stream(
    pipeline: &Pipeline<'_>,
    topology: &Topology,
    frames: Option<u64>,
    callback: &mut AppCallback,
) -> Result<Stats> {
    use sink::HighGui;
    use source::Camera;

    let mut source = Camera::open(topology.source(), topology.capture_caps()?)
        .context("failed opening capture device")?;
    if let Some(frames) = frames {
        source = source.frames(frames);
    }
    pipeline
        .run(
            source,
            engine::Idle,
            HighGui::new("kinetic-pose", 1),
            callback,
        )
        .context("pipeline failed")
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let config = opt.config();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(opt.log_level),
    )?;

    let mut builder = TopologyBuilder::new(&config);
    if opt.skip_artifact_check {
        builder = builder.skip_artifact_check();
    }
    let topology = builder
        .build(&opt.input)
        .context("failed constructing pipeline")?;

    if let Some(path) = opt.dump_dot.as_ref() {
        std::fs::write(path, topology.to_dot())
            .with_context(|| format!("failed writing pipeline graph to {}", path.display()))?;
        info!(message = "wrote pipeline graph", path = %path.display());
    }

    if opt.print_pipeline {
        info!(message = "pipeline", launch = %topology);
        println!("{}", topology);
        return Ok(());
    }

    let mut skeleton = Skeleton::default();
    for JointOverride { name, point } in &opt.joints {
        skeleton
            .set_by_name(name, *point)
            .with_context(|| format!("failed seeding joint {:?}", name))?;
    }
    let mut callback = AppCallback::new(
        Mapper::new(config.canvas_width, config.canvas_height),
        Renderer::new(config.canvas_width, config.canvas_height),
    )
    .with_skeleton(skeleton);

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();

    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    let pipeline = Pipeline::new(&topology, running).overlay(config.overlay);
    let stats = stream(&pipeline, &topology, opt.frames, &mut callback)?;

    info!(
        message = "pipeline finished",
        captured = stats.captured,
        rendered = stats.rendered,
        callbacks = callback.frame_count(),
        bypass_dropped = stats.bypass_dropped,
        unpaired = stats.unpaired,
        batches = stats.timing.batches,
        failed_batches = stats.timing.failed_batches,
        inference_ms = stats.timing.inference.as_millis() as u64,
        average_fps = stats.fps.average
    );
    for (kind, point) in callback.skeleton().iter() {
        debug!(message = "final joint", joint = %kind, x = point.x, y = point.y);
    }

    Ok(())
}
