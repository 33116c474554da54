use crate::{config::PipelineConfig, error::Error, queue::Leaky};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    path::PathBuf,
    str::FromStr,
};
use tracing::{debug, instrument};

pub(crate) const BYPASS_QUEUE: &str = "bypass_queue";
pub(crate) const INFERENCE_QUEUE: &str = "queue_hailonet";
pub(crate) const INFERRED_QUEUE: &str = "queue_hmuc";
pub(crate) const CALLBACK_QUEUE: &str = "queue_user_callback";
pub(crate) const CALLBACK: &str = "identity_callback";

const TEE: &str = "t";
const MUXER: &str = "hmux";
const BYPASS_PAD: &str = "sink_0";
const INFERENCE_PAD: &str = "sink_1";
const FRAMERATE: (u32, u32) = (30, 1);

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceKind {
    /// The board's fixed camera.
    Rpi,
    /// A V4L2 capture device such as a USB webcam.
    Usb { device: PathBuf },
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(Error::EmptyDevice),
            "rpi" => Ok(Self::Rpi),
            device => Ok(Self::Usb {
                device: PathBuf::from(device),
            }),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpi => f.write_str("rpi"),
            Self::Usb { device } => write!(f, "{}", device.display()),
        }
    }
}

/// Raw video caps between two stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Caps {
    pub(crate) format: Option<String>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) framerate: Option<(u32, u32)>,
    pub(crate) pixel_aspect_ratio: Option<(u32, u32)>,
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("video/x-raw")?;
        if let Some(format) = &self.format {
            write!(f, ", format={}", format)?;
        }
        write!(f, ", width={}, height={}", self.width, self.height)?;
        if let Some((num, den)) = self.framerate {
            write!(f, ", framerate={}/{}", num, den)?;
        }
        if let Some((num, den)) = self.pixel_aspect_ratio {
            write!(f, ", pixel-aspect-ratio={}/{}", num, den)?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct QueueSpec {
    pub(crate) capacity: usize,
    pub(crate) leaky: Leaky,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InferenceSpec {
    pub(crate) hef_path: PathBuf,
    pub(crate) batch_size: usize,
    pub(crate) force_writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilterSpec {
    pub(crate) function_name: String,
    pub(crate) so_path: PathBuf,
    pub(crate) qos: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SinkSpec {
    pub(crate) video_sink: String,
    pub(crate) sync: bool,
    pub(crate) text_overlay: bool,
    pub(crate) signal_fps_measurements: bool,
}

/// A processing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Element {
    LibcameraSrc,
    V4l2Src { device: PathBuf },
    Caps(Caps),
    Queue(QueueSpec),
    VideoScale { n_threads: Option<u32> },
    VideoConvert { n_threads: u32, qos: Option<bool> },
    Tee,
    Muxer,
    Inference(InferenceSpec),
    Filter(FilterSpec),
    /// The point where the frame callback runs.
    Identity,
    Overlay,
    DisplaySink(SinkSpec),
}

impl Element {
    pub(crate) fn factory(&self) -> &'static str {
        match self {
            Self::LibcameraSrc => "libcamerasrc",
            Self::V4l2Src { .. } => "v4l2src",
            Self::Caps(_) => "capsfilter",
            Self::Queue(_) => "queue",
            Self::VideoScale { .. } => "videoscale",
            Self::VideoConvert { .. } => "videoconvert",
            Self::Tee => "tee",
            Self::Muxer => "hailomuxer",
            Self::Inference(_) => "hailonet",
            Self::Filter(_) => "hailofilter",
            Self::Identity => "identity",
            Self::Overlay => "hailooverlay",
            Self::DisplaySink(_) => "fpsdisplaysink",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) element: Element,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.name;
        match &self.element {
            Element::Caps(caps) => write!(f, "{}", caps),
            Element::V4l2Src { device } => {
                write!(f, "v4l2src device={} name={}", device.display(), name)
            }
            Element::Queue(QueueSpec { capacity, leaky }) => write!(
                f,
                "queue name={} leaky={} max-size-buffers={} max-size-bytes=0 max-size-time=0",
                name, leaky, capacity
            ),
            Element::VideoScale { n_threads } => {
                write!(f, "videoscale name={}", name)?;
                if let Some(n_threads) = n_threads {
                    write!(f, " n-threads={}", n_threads)?;
                }
                Ok(())
            }
            Element::VideoConvert { n_threads, qos } => {
                write!(f, "videoconvert name={} n-threads={}", name, n_threads)?;
                if let Some(qos) = qos {
                    write!(f, " qos={}", qos)?;
                }
                Ok(())
            }
            Element::Inference(InferenceSpec {
                hef_path,
                batch_size,
                force_writable,
            }) => write!(
                f,
                "hailonet name={} hef-path={} batch-size={} force-writable={}",
                name,
                hef_path.display(),
                batch_size,
                force_writable
            ),
            Element::Filter(FilterSpec {
                function_name,
                so_path,
                qos,
            }) => write!(
                f,
                "hailofilter name={} function-name={} so-path={} qos={}",
                name,
                function_name,
                so_path.display(),
                qos
            ),
            Element::DisplaySink(SinkSpec {
                video_sink,
                sync,
                text_overlay,
                signal_fps_measurements,
            }) => write!(
                f,
                "fpsdisplaysink name={} video-sink={} sync={} text-overlay={} signal-fps-measurements={}",
                name, video_sink, sync, text_overlay, signal_fps_measurements
            ),
            element => write!(f, "{} name={}", element.factory(), name),
        }
    }
}

/// A directed buffer link, optionally onto a named request pad.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) pad: Option<&'static str>,
}

/// Immutable description of the whole processing graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Topology {
    source: SourceKind,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Where a launch-description segment starts.
enum Segment {
    Root(usize),
    Branch(usize, usize),
}

impl Topology {
    pub(crate) fn source(&self) -> &SourceKind {
        &self.source
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }

    pub(crate) fn node(&self, name: &str) -> Option<&Node> {
        self.position(name).map(|id| &self.nodes[id])
    }

    fn outgoing(&self, id: usize) -> impl Iterator<Item = (usize, &Edge)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, edge)| edge.from == id)
    }

    fn incoming(&self, id: usize) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |edge| edge.to == id)
    }

    fn find<'a, T>(&'a self, f: impl FnMut(&'a Element) -> Option<T>) -> Option<T> {
        self.nodes.iter().map(|node| &node.element).find_map(f)
    }

    pub(crate) fn queue(&self, name: &str) -> Option<&QueueSpec> {
        match &self.node(name)?.element {
            Element::Queue(spec) => Some(spec),
            _ => None,
        }
    }

    /// The queue feeding the muxer's bypass pad.
    pub(crate) fn bypass_queue(&self) -> Result<&QueueSpec, Error> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.element == Element::Muxer)
            .flat_map(|(id, _)| self.incoming(id))
            .filter(|edge| edge.pad == Some(BYPASS_PAD))
            .find_map(|edge| match &self.nodes[edge.from].element {
                Element::Queue(spec) => Some(spec),
                _ => None,
            })
            .ok_or(Error::MissingStage("bypass queue"))
    }

    pub(crate) fn inference(&self) -> Result<&InferenceSpec, Error> {
        self.find(|element| match element {
            Element::Inference(spec) => Some(spec),
            _ => None,
        })
        .ok_or(Error::MissingStage("inference"))
    }

    pub(crate) fn filter(&self) -> Result<&FilterSpec, Error> {
        self.find(|element| match element {
            Element::Filter(spec) => Some(spec),
            _ => None,
        })
        .ok_or(Error::MissingStage("post-process filter"))
    }

    pub(crate) fn sink(&self) -> Result<&SinkSpec, Error> {
        self.find(|element| match element {
            Element::DisplaySink(spec) => Some(spec),
            _ => None,
        })
        .ok_or(Error::MissingStage("display sink"))
    }

    /// Caps negotiated right after the capture element.
    pub(crate) fn capture_caps(&self) -> Result<&Caps, Error> {
        self.find(|element| match element {
            Element::Caps(caps) => Some(caps),
            _ => None,
        })
        .ok_or(Error::MissingStage("capture caps"))
    }

    /// Caps of the frames entering the tee, i.e. the network input.
    pub(crate) fn network_caps(&self) -> Result<&Caps, Error> {
        let tee = self
            .nodes
            .iter()
            .position(|node| node.element == Element::Tee)
            .ok_or(Error::MissingStage("tee"))?;
        self.incoming(tee)
            .find_map(|edge| match &self.nodes[edge.from].element {
                Element::Caps(caps) => Some(caps),
                _ => None,
            })
            .ok_or(Error::MissingStage("network caps"))
    }

    /// Nominal capture rate, when the caps pin one.
    pub(crate) fn framerate(&self) -> Option<(u32, u32)> {
        self.find(|element| match element {
            Element::Caps(Caps {
                framerate: Some(rate),
                ..
            }) => Some(*rate),
            _ => None,
        })
    }

    fn degrees(&self) -> (Vec<usize>, Vec<usize>) {
        let mut fanin = vec![0; self.nodes.len()];
        let mut fanout = vec![0; self.nodes.len()];
        for edge in &self.edges {
            fanout[edge.from] += 1;
            fanin[edge.to] += 1;
        }
        (fanin, fanout)
    }

    fn reachable_from(&self, start: usize) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            stack.extend(self.outgoing(id).map(|(_, edge)| edge.to));
        }
        seen
    }

    /// Check that the graph is one the runtime can execute.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(Error::DuplicateNode(node.name.clone()));
            }
        }

        if let Some(edge) = self
            .edges
            .iter()
            .find(|edge| edge.from >= self.nodes.len() || edge.to >= self.nodes.len())
        {
            return Err(Error::UnknownNode(format!("#{}", edge.from.max(edge.to))));
        }

        let (fanin, fanout) = self.degrees();

        let roots = (0..self.nodes.len())
            .filter(|&id| fanin[id] == 0)
            .collect::<Vec<_>>();
        if roots.len() != 1 {
            return Err(Error::Roots(roots.len()));
        }
        let sinks = fanout.iter().filter(|&&n| n == 0).count();
        if sinks != 1 {
            return Err(Error::Sinks(sinks));
        }

        for (id, node) in self.nodes.iter().enumerate() {
            let (expected_in, expected_out) = match node.element {
                Element::Tee => (1, 2),
                Element::Muxer => (2, 1),
                Element::LibcameraSrc | Element::V4l2Src { .. } => (0, 1),
                Element::DisplaySink(_) => (1, 0),
                _ => (1, 1),
            };
            if fanin[id] != expected_in {
                return Err(Error::Fanin {
                    node: node.name.clone(),
                    expected: expected_in,
                    got: fanin[id],
                });
            }
            if fanout[id] != expected_out {
                return Err(Error::Fanout {
                    node: node.name.clone(),
                    expected: expected_out,
                    got: fanout[id],
                });
            }
            if node.element == Element::Muxer {
                for pad in [BYPASS_PAD, INFERENCE_PAD] {
                    if !self.incoming(id).any(|edge| edge.pad == Some(pad)) {
                        return Err(Error::MuxerPad {
                            node: node.name.clone(),
                            pad,
                        });
                    }
                }
            }
            if let Element::Queue(QueueSpec { capacity: 0, .. }) = node.element {
                return Err(Error::QueueCapacity(node.name.clone()));
            }
        }

        let reachable = self.reachable_from(roots[0]);
        if let Some(id) = reachable.iter().position(|&seen| !seen) {
            return Err(Error::Unreachable(self.nodes[id].name.clone()));
        }

        let muxer = self
            .nodes
            .iter()
            .position(|node| node.element == Element::Muxer)
            .ok_or(Error::MissingStage("muxer"))?;
        let downstream = self.reachable_from(muxer);
        let callbacks = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.element == Element::Identity)
            .collect::<Vec<_>>();
        if callbacks.len() != 1 || !callbacks.iter().all(|(id, _)| downstream[*id]) {
            return Err(Error::CallbackPoint(
                callbacks.iter().filter(|(id, _)| downstream[*id]).count(),
            ));
        }

        let batch_size = self.inference()?.batch_size;
        if batch_size == 0 {
            return Err(Error::BatchSize);
        }
        // the muxer waits on a full batch while the bypass path keeps filling
        let capacity = self.bypass_queue()?.capacity;
        if capacity < batch_size {
            return Err(Error::BypassCapacity {
                capacity,
                batch_size,
            });
        }

        Ok(())
    }

    /// Render the graph in Graphviz dot syntax.
    pub(crate) fn to_dot(&self) -> String {
        let mut dot = String::from("digraph pipeline {\n  rankdir=LR;\n");
        for node in &self.nodes {
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}\"];\n",
                node.name,
                node.element.factory(),
                node.name
            ));
        }
        for edge in &self.edges {
            let (from, to) = (&self.nodes[edge.from].name, &self.nodes[edge.to].name);
            match edge.pad {
                Some(pad) => dot.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    from, to, pad
                )),
                None => dot.push_str(&format!("  \"{}\" -> \"{}\";\n", from, to)),
            }
        }
        dot.push_str("}\n");
        dot
    }
}

/// Launch description: fan-in nodes are declared up front, every extra
/// branch continues from a `name.` reference.
impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fanin, _) = self.degrees();
        let mut parts = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(id, _)| fanin[*id] > 1)
            .map(|(_, node)| node.to_string())
            .collect::<Vec<_>>();

        let mut pending = (0..self.nodes.len())
            .filter(|&id| fanin[id] == 0)
            .map(Segment::Root)
            .collect::<VecDeque<_>>();
        let mut opened = vec![false; self.nodes.len()];

        while let Some(segment) = pending.pop_front() {
            let (mut chain, mut current, mut next) = match segment {
                Segment::Root(id) => (self.nodes[id].to_string(), id, None),
                Segment::Branch(id, edge) => {
                    (format!("{}.", self.nodes[id].name), id, Some(edge))
                }
            };

            loop {
                let edge = match next.take() {
                    Some(edge) => edge,
                    None => {
                        let mut outgoing = self.outgoing(current).map(|(index, _)| index);
                        match outgoing.next() {
                            Some(first) => {
                                pending.extend(
                                    outgoing.map(|index| Segment::Branch(current, index)),
                                );
                                first
                            }
                            None => break,
                        }
                    }
                };

                let Edge { to, pad, .. } = self.edges[edge];
                if fanin[to] > 1 {
                    chain.push_str(&format!(" ! {}.{}", self.nodes[to].name, pad.unwrap_or("")));
                    if !std::mem::replace(&mut opened[to], true) {
                        pending.extend(
                            self.outgoing(to)
                                .map(|(index, _)| Segment::Branch(to, index)),
                        );
                    }
                    break;
                }
                chain.push_str(&format!(" ! {}", self.nodes[to]));
                current = to;
            }
            parts.push(chain);
        }

        f.write_str(&parts.join(" "))
    }
}

/// Incrementally assembles a [`Topology`].
struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    counters: HashMap<&'static str, usize>,
}

impl Graph {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            counters: HashMap::new(),
        }
    }

    fn add(&mut self, name: Option<&str>, element: Element) -> Result<usize, Error> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => {
                let counter = self.counters.entry(element.factory()).or_default();
                let name = format!("{}{}", element.factory(), counter);
                *counter += 1;
                name
            }
        };
        if self.nodes.iter().any(|node| node.name == name) {
            return Err(Error::DuplicateNode(name));
        }
        self.nodes.push(Node { name, element });
        Ok(self.nodes.len() - 1)
    }

    fn link(&mut self, from: usize, to: usize, pad: Option<&'static str>) {
        self.edges.push(Edge { from, to, pad });
    }

    /// Append `elements` one after another downstream of `from`.
    fn chain(
        &mut self,
        from: usize,
        elements: impl IntoIterator<Item = (Option<&'static str>, Element)>,
    ) -> Result<usize, Error> {
        elements.into_iter().try_fold(from, |previous, (name, element)| {
            let id = self.add(name, element)?;
            self.link(previous, id, None);
            Ok(id)
        })
    }
}

/// Builds the pose pipeline for a source.
pub(crate) struct TopologyBuilder<'a> {
    config: &'a PipelineConfig,
    check_artifacts: bool,
}

impl<'a> TopologyBuilder<'a> {
    pub(crate) fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            check_artifacts: true,
        }
    }

    /// Do not require the model and post-process library on disk.
    pub(crate) fn skip_artifact_check(mut self) -> Self {
        self.check_artifacts = false;
        self
    }

    fn queue(&self, name: &'static str) -> (Option<&'static str>, Element) {
        (
            Some(name),
            Element::Queue(QueueSpec {
                capacity: self.config.queue_capacity,
                leaky: Leaky::No,
            }),
        )
    }

    fn network_caps(&self) -> Caps {
        Caps {
            format: Some(self.config.network_format.clone()),
            width: self.config.network_width,
            height: self.config.network_height,
            framerate: None,
            pixel_aspect_ratio: None,
        }
    }

    fn check(&self, source: &SourceKind) -> Result<(), Error> {
        let config = self.config;
        if let SourceKind::Usb { device } = source {
            if device.as_os_str().is_empty() {
                return Err(Error::EmptyDevice);
            }
        }
        if config.batch_size == 0 {
            return Err(Error::BatchSize);
        }
        if config.post_function_name.is_empty() {
            return Err(Error::EmptyFunctionName);
        }
        if self.check_artifacts {
            for (what, path) in [
                ("model", &config.hef_path),
                ("post-process library", &config.postprocess_so),
            ] {
                if !path.is_file() {
                    return Err(Error::MissingArtifact {
                        what,
                        path: path.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Capture element through to the caps the tee sees.
    fn source_chain(&self, graph: &mut Graph, source: &SourceKind) -> Result<usize, Error> {
        let config = self.config;
        match source {
            SourceKind::Rpi => {
                let src = graph.add(Some("src_0"), Element::LibcameraSrc)?;
                graph.chain(
                    src,
                    vec![
                        (
                            None,
                            Element::Caps(Caps {
                                format: Some(config.network_format.clone()),
                                width: 1536,
                                height: 864,
                                framerate: None,
                                pixel_aspect_ratio: None,
                            }),
                        ),
                        self.queue("queue_src_scale"),
                        (None, Element::VideoScale { n_threads: None }),
                        (
                            None,
                            Element::Caps(Caps {
                                framerate: Some(FRAMERATE),
                                ..self.network_caps()
                            }),
                        ),
                    ],
                )
            }
            SourceKind::Usb { device } => {
                let src = graph.add(
                    Some("src_0"),
                    Element::V4l2Src {
                        device: device.clone(),
                    },
                )?;
                graph.chain(
                    src,
                    vec![
                        (
                            None,
                            Element::Caps(Caps {
                                format: None,
                                width: 640,
                                height: 480,
                                framerate: Some(FRAMERATE),
                                pixel_aspect_ratio: None,
                            }),
                        ),
                        self.queue("queue_scale"),
                        (None, Element::VideoScale { n_threads: Some(2) }),
                        self.queue("queue_src_convert"),
                        (
                            Some("src_convert"),
                            Element::VideoConvert {
                                n_threads: 3,
                                qos: Some(false),
                            },
                        ),
                        (
                            None,
                            Element::Caps(Caps {
                                pixel_aspect_ratio: Some((1, 1)),
                                ..self.network_caps()
                            }),
                        ),
                    ],
                )
            }
        }
    }

    #[instrument(name = "TopologyBuilder::build", skip(self), level = "debug")]
    pub(crate) fn build(&self, source: &SourceKind) -> Result<Topology, Error> {
        self.check(source)?;
        let config = self.config;
        let mut graph = Graph::new();

        let muxer = graph.add(Some(MUXER), Element::Muxer)?;
        let last = self.source_chain(&mut graph, source)?;
        let tee = graph.chain(last, vec![(Some(TEE), Element::Tee)])?;

        let bypass = graph.add(
            Some(BYPASS_QUEUE),
            Element::Queue(QueueSpec {
                capacity: config.bypass_capacity,
                leaky: config.bypass_leaky,
            }),
        )?;
        graph.link(tee, bypass, None);
        graph.link(bypass, muxer, Some(BYPASS_PAD));

        let (name, element) = self.queue(INFERENCE_QUEUE);
        let inference = graph.add(name, element)?;
        graph.link(tee, inference, None);
        let filtered = graph.chain(
            inference,
            vec![
                (
                    None,
                    Element::VideoConvert {
                        n_threads: 3,
                        qos: None,
                    },
                ),
                (
                    None,
                    Element::Inference(InferenceSpec {
                        hef_path: config.hef_path.clone(),
                        batch_size: config.batch_size,
                        force_writable: true,
                    }),
                ),
                self.queue("queue_hailofilter"),
                (
                    None,
                    Element::Filter(FilterSpec {
                        function_name: config.post_function_name.clone(),
                        so_path: config.postprocess_so.clone(),
                        qos: false,
                    }),
                ),
                self.queue(INFERRED_QUEUE),
            ],
        )?;
        graph.link(filtered, muxer, Some(INFERENCE_PAD));

        let (name, element) = self.queue("queue_hailo_python");
        let merged = graph.add(name, element)?;
        graph.link(muxer, merged, None);
        graph.chain(
            merged,
            vec![
                self.queue(CALLBACK_QUEUE),
                (Some(CALLBACK), Element::Identity),
                self.queue("queue_hailooverlay"),
                (None, Element::Overlay),
                self.queue("queue_videoconvert"),
                (
                    None,
                    Element::VideoConvert {
                        n_threads: 3,
                        qos: Some(false),
                    },
                ),
                self.queue("queue_hailo_display"),
                (
                    Some("hailo_display"),
                    Element::DisplaySink(SinkSpec {
                        video_sink: config.video_sink.clone(),
                        sync: config.sync,
                        text_overlay: config.show_fps,
                        signal_fps_measurements: true,
                    }),
                ),
            ],
        )?;

        let topology = Topology {
            source: source.clone(),
            nodes: graph.nodes,
            edges: graph.edges,
        };
        topology.validate()?;
        debug!(
            message = "built pipeline",
            nodes = topology.nodes().len(),
            edges = topology.edges().len()
        );
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Edge, Element, QueueSpec, SourceKind, Topology, TopologyBuilder, BYPASS_QUEUE, CALLBACK,
        INFERENCE_QUEUE,
    };
    use crate::{config::PipelineConfig, error::Error, queue::Leaky};
    use std::path::PathBuf;

    fn build(config: &PipelineConfig, source: &str) -> Result<Topology, Error> {
        TopologyBuilder::new(config)
            .skip_artifact_check()
            .build(&source.parse()?)
    }

    fn usb() -> Topology {
        build(&PipelineConfig::default(), "/dev/video0").unwrap()
    }

    #[test]
    fn parse_source() {
        assert_eq!("rpi".parse::<SourceKind>().unwrap(), SourceKind::Rpi);
        assert_eq!(
            "/dev/video2".parse::<SourceKind>().unwrap(),
            SourceKind::Usb {
                device: PathBuf::from("/dev/video2")
            }
        );
        assert!(matches!("  ".parse::<SourceKind>(), Err(Error::EmptyDevice)));
    }

    #[test]
    fn bypass_queue_holds_twenty() {
        let topology = usb();
        assert_eq!(
            topology.bypass_queue().unwrap(),
            &QueueSpec {
                capacity: 20,
                leaky: Leaky::No
            }
        );
        assert_eq!(topology.queue(BYPASS_QUEUE).unwrap().capacity, 20);
        assert_eq!(topology.queue(INFERENCE_QUEUE).unwrap().capacity, 3);
        assert!(topology.queue(CALLBACK).is_none());
    }

    #[test]
    fn both_sources_share_the_downstream_graph() {
        let config = PipelineConfig::default();
        let rpi = build(&config, "rpi").unwrap();
        let usb = build(&config, "/dev/video0").unwrap();

        let tail = |topology: &Topology| {
            let tee = topology
                .nodes()
                .iter()
                .position(|node| node.element == Element::Tee)
                .unwrap();
            topology.nodes()[tee..]
                .iter()
                .map(|node| node.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(tail(&rpi), tail(&usb));

        let (rpi_caps, usb_caps) = (rpi.network_caps().unwrap(), usb.network_caps().unwrap());
        assert_eq!(rpi_caps.format, usb_caps.format);
        assert_eq!(rpi_caps.format.as_deref(), Some("RGB"));
        assert_eq!((rpi_caps.width, rpi_caps.height), (640, 640));
        assert_eq!((usb_caps.width, usb_caps.height), (640, 640));
        // rpi fixes the rate after scaling, usb fixes the pixel aspect ratio
        assert_eq!(rpi_caps.framerate, Some((30, 1)));
        assert_eq!(rpi_caps.pixel_aspect_ratio, None);
        assert_eq!(usb_caps.framerate, None);
        assert_eq!(usb_caps.pixel_aspect_ratio, Some((1, 1)));

        assert_eq!(rpi.capture_caps().unwrap().width, 1536);
        assert_eq!(usb.capture_caps().unwrap().height, 480);
        assert_eq!(rpi.framerate(), Some((30, 1)));
        assert_eq!(usb.framerate(), Some((30, 1)));
    }

    #[test]
    fn launch_description() {
        let description = build(&PipelineConfig::default(), "rpi").unwrap().to_string();
        assert!(description.starts_with(
            "hailomuxer name=hmux libcamerasrc name=src_0 ! video/x-raw, format=RGB, width=1536, height=864 ! queue name=queue_src_scale"
        ));

        let order = [
            "tee name=t ! queue name=bypass_queue leaky=no max-size-buffers=20",
            " ! hmux.sink_0 t. ! queue name=queue_hailonet",
            "hailonet name=hailonet0 hef-path=resources/yolov8s_pose_h8l_pi.hef batch-size=2 force-writable=true",
            "hailofilter name=hailofilter0 function-name=filter so-path=resources/libyolov8pose_post.so qos=false",
            " ! hmux.sink_1 hmux. ! queue name=queue_hailo_python",
            "identity name=identity_callback ! queue name=queue_hailooverlay",
            " ! hailooverlay name=hailooverlay0 ! queue name=queue_videoconvert",
            "videoconvert name=videoconvert1 n-threads=3 qos=false",
            "fpsdisplaysink name=hailo_display video-sink=xvimagesink sync=true text-overlay=false signal-fps-measurements=true",
        ];
        let mut rest = description.as_str();
        for part in order.iter() {
            let at = rest
                .find(part)
                .unwrap_or_else(|| panic!("{:?} missing from {:?}", part, description));
            rest = &rest[at + part.len()..];
        }
        assert!(rest.is_empty(), "trailing {:?}", rest);
    }

    #[test]
    fn usb_source_chain() {
        let description = usb().to_string();
        assert!(description.contains(
            "v4l2src device=/dev/video0 name=src_0 ! video/x-raw, width=640, height=480, framerate=30/1"
        ));
        assert!(description.contains("videoscale name=videoscale0 n-threads=2"));
        assert!(description.contains("videoconvert name=src_convert n-threads=3 qos=false"));
        assert!(description
            .contains("video/x-raw, format=RGB, width=640, height=640, pixel-aspect-ratio=1/1 ! tee"));
    }

    #[test]
    fn dot_lists_every_edge() {
        let topology = usb();
        let dot = topology.to_dot();
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("\"bypass_queue\" -> \"hmux\" [label=\"sink_0\"];"));
        assert!(dot.contains("\"queue_hmuc\" -> \"hmux\" [label=\"sink_1\"];"));
        assert_eq!(dot.matches(" -> ").count(), topology.edges().len());
    }

    #[test]
    fn config_flows_into_stages() {
        let config = PipelineConfig {
            batch_size: 4,
            sync: false,
            show_fps: true,
            bypass_leaky: Leaky::Downstream,
            ..PipelineConfig::default()
        };
        let topology = build(&config, "rpi").unwrap();
        assert_eq!(topology.inference().unwrap().batch_size, 4);
        assert!(topology.inference().unwrap().force_writable);
        assert_eq!(topology.filter().unwrap().function_name, "filter");
        let sink = topology.sink().unwrap();
        assert!(!sink.sync);
        assert!(sink.text_overlay);
        assert_eq!(topology.bypass_queue().unwrap().leaky, Leaky::Downstream);
    }

    #[test]
    fn construction_failures() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(build(&config, "rpi"), Err(Error::BatchSize)));

        let config = PipelineConfig {
            batch_size: 21,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            build(&config, "rpi"),
            Err(Error::BypassCapacity {
                capacity: 20,
                batch_size: 21
            })
        ));

        let config = PipelineConfig {
            post_function_name: String::new(),
            ..PipelineConfig::default()
        };
        assert!(matches!(build(&config, "rpi"), Err(Error::EmptyFunctionName)));

        let config = PipelineConfig {
            queue_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(build(&config, "rpi"), Err(Error::QueueCapacity(_))));

        assert!(matches!(
            TopologyBuilder::new(&PipelineConfig::default())
                .skip_artifact_check()
                .build(&SourceKind::Usb {
                    device: PathBuf::new()
                }),
            Err(Error::EmptyDevice)
        ));
    }

    #[test]
    fn missing_artifacts_are_fatal() {
        let config = PipelineConfig {
            hef_path: PathBuf::from("/nonexistent/model.hef"),
            ..PipelineConfig::default()
        };
        match TopologyBuilder::new(&config).build(&SourceKind::Rpi) {
            Err(Error::MissingArtifact { what, path }) => {
                assert_eq!(what, "model");
                assert_eq!(path, PathBuf::from("/nonexistent/model.hef"));
            }
            other => panic!("expected MissingArtifact, got {:?}", other),
        }

        let dir = std::env::temp_dir().join(format!("kinetic-pose-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let hef_path = dir.join("model.hef");
        let postprocess_so = dir.join("libpost.so");
        std::fs::write(&hef_path, b"hef").unwrap();
        std::fs::write(&postprocess_so, b"so").unwrap();
        let config = PipelineConfig {
            hef_path,
            postprocess_so,
            ..PipelineConfig::default()
        };
        let built = TopologyBuilder::new(&config).build(&SourceKind::Rpi);
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(built.is_ok());
    }

    #[test]
    fn validate_rejects_broken_graphs() {
        let topology = usb();

        let mut duplicate = topology.clone();
        duplicate.nodes[1].name = "t".to_owned();
        assert!(matches!(duplicate.validate(), Err(Error::DuplicateNode(name)) if name == "t"));

        // cut the inference branch off the muxer
        let mut cut = topology.clone();
        cut.edges.retain(|edge| edge.pad != Some("sink_1"));
        assert!(matches!(cut.validate(), Err(Error::Sinks(2))));

        // a second callback point
        let mut extra = topology.clone();
        let overlay = extra
            .nodes
            .iter()
            .position(|node| node.element == Element::Overlay)
            .unwrap();
        extra.nodes[overlay].element = Element::Identity;
        assert!(matches!(extra.validate(), Err(Error::CallbackPoint(2))));

        // both branches on the same pad
        let mut pads = topology.clone();
        for edge in pads.edges.iter_mut() {
            if edge.pad == Some("sink_1") {
                edge.pad = Some("sink_0");
            }
        }
        assert!(matches!(
            pads.validate(),
            Err(Error::MuxerPad { pad: "sink_1", .. })
        ));

        let mut dangling = topology;
        let n = dangling.nodes.len();
        dangling.edges.push(Edge {
            from: 0,
            to: n,
            pad: None,
        });
        assert!(matches!(dangling.validate(), Err(Error::UnknownNode(_))));
    }
}
