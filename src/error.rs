use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("unknown joint name: {0:?}")]
    UnknownJoint(String),

    #[error("failed to convert usize value to joint kind: {0}")]
    ConvertUSizeToJointKind(usize),

    #[error("expected {expected} landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },

    #[error("capture device path is empty")]
    EmptyDevice,

    #[error("{what} not found at {path:?}")]
    MissingArtifact { what: &'static str, path: PathBuf },

    #[error("post-process function name is empty")]
    EmptyFunctionName,

    #[error("batch size must be at least 1")]
    BatchSize,

    #[error("bypass queue holds {capacity} buffers but the inference batch needs {batch_size}")]
    BypassCapacity { capacity: usize, batch_size: usize },

    #[error("queue {0:?} must hold at least one buffer")]
    QueueCapacity(String),

    #[error("duplicate pipeline node name: {0:?}")]
    DuplicateNode(String),

    #[error("no pipeline node named {0:?}")]
    UnknownNode(String),

    #[error("expected exactly one source node, found {0}")]
    Roots(usize),

    #[error("expected exactly one sink node, found {0}")]
    Sinks(usize),

    #[error("node {node:?} must have {expected} outgoing links, has {got}")]
    Fanout {
        node: String,
        expected: usize,
        got: usize,
    },

    #[error("node {node:?} must have {expected} incoming links, has {got}")]
    Fanin {
        node: String,
        expected: usize,
        got: usize,
    },

    #[error("muxer {node:?} is missing a link on pad {pad}")]
    MuxerPad { node: String, pad: &'static str },

    #[error("node {0:?} is not reachable from the source")]
    Unreachable(String),

    #[error("expected exactly one callback point downstream of the muxer, found {0}")]
    CallbackPoint(usize),

    #[error("pipeline has no {0} stage")]
    MissingStage(&'static str),

    #[error("unknown leaky policy: {0:?}")]
    UnknownLeaky(String),

    #[error("network returned {got} results for a batch of {expected} frames")]
    BatchResults { expected: usize, got: usize },

    #[error("network failed to run inference: {0}")]
    Network(String),

    #[error("queue {0:?} is disconnected")]
    Disconnected(&'static str),

    #[error("pipeline stage {0:?} panicked")]
    StagePanicked(&'static str),

    #[error("failed to read frame from source")]
    ReadFrame(#[source] Box<Error>),

    #[error("failed to show frame")]
    ShowFrame(#[source] Box<Error>),

    #[cfg(feature = "gui")]
    #[error("failed to construct frame of {width}x{height} from raw bytes")]
    FrameFromRaw { width: u32, height: u32 },

    #[cfg(feature = "gui")]
    #[error("failed to open capture device {0:?}")]
    OpenCapture(String),

    #[cfg(feature = "gui")]
    #[error("opencv call failed: {0}")]
    OpenCv(&'static str, #[source] opencv::Error),

    #[cfg(feature = "gui")]
    #[error("failed to convert dimension {0} to i32")]
    ConvertDimToI32(u32, #[source] std::num::TryFromIntError),
}
