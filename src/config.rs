use crate::queue::Leaky;
use std::path::PathBuf;

pub(crate) const CANVAS_WIDTH: u32 = 1280;
pub(crate) const CANVAS_HEIGHT: u32 = 720;

pub(crate) const DEFAULT_HEF_PATH: &str = "resources/yolov8s_pose_h8l_pi.hef";
pub(crate) const DEFAULT_POSTPROCESS_SO: &str = "resources/libyolov8pose_post.so";
pub(crate) const DEFAULT_POST_FUNCTION: &str = "filter";
pub(crate) const DEFAULT_VIDEO_SINK: &str = "xvimagesink";

/// Everything the topology builder and the runtime need to know.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PipelineConfig {
    /// Input resolution of the pose network.
    pub(crate) network_width: u32,
    pub(crate) network_height: u32,
    pub(crate) network_format: String,
    pub(crate) batch_size: usize,
    /// Compiled network the accelerator loads.
    pub(crate) hef_path: PathBuf,
    /// Shared object exporting the post-process filter.
    pub(crate) postprocess_so: PathBuf,
    pub(crate) post_function_name: String,
    pub(crate) video_sink: String,
    pub(crate) sync: bool,
    pub(crate) show_fps: bool,
    pub(crate) bypass_capacity: usize,
    pub(crate) bypass_leaky: Leaky,
    /// Capacity of every other queue in the graph.
    pub(crate) queue_capacity: usize,
    /// Size of the character canvas, independent of the network input.
    pub(crate) canvas_width: u32,
    pub(crate) canvas_height: u32,
    /// Draw detection boxes over the outgoing frame.
    pub(crate) overlay: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            network_width: 640,
            network_height: 640,
            network_format: "RGB".to_owned(),
            batch_size: 2,
            hef_path: PathBuf::from(DEFAULT_HEF_PATH),
            postprocess_so: PathBuf::from(DEFAULT_POSTPROCESS_SO),
            post_function_name: DEFAULT_POST_FUNCTION.to_owned(),
            video_sink: DEFAULT_VIDEO_SINK.to_owned(),
            sync: true,
            show_fps: false,
            bypass_capacity: 20,
            bypass_leaky: Leaky::No,
            queue_capacity: 3,
            canvas_width: CANVAS_WIDTH,
            canvas_height: CANVAS_HEIGHT,
            overlay: true,
        }
    }
}
