use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skelcap_source::{frame_interval_ticks, FrameSize, Timestamp, COLOR_FRAME, DEPTH_FRAME};

use crate::cloud::Intrinsics;
use crate::relay::DEFAULT_CAPACITY;
use crate::sink::video_path;
use crate::{RecordError, Result};

/// Everything the recorder needs, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Session identifier, also the stem of every output file.
    pub session_id: String,
    /// Target frame rate of both video streams.
    pub fps: f64,
    /// Show converted frames in a live preview window.
    pub show_capture: bool,
    /// Directory receiving video, point cloud and session dump.
    pub output_dir: PathBuf,
    /// Native color sensor resolution (YUY2).
    pub color_size: FrameSize,
    /// Native depth / body-index resolution.
    pub depth_size: FrameSize,
    /// Depth camera pinhole calibration.
    pub intrinsics: Intrinsics,
    /// 4×4 row-major camera transform, applied as the extrinsic when reprojecting.
    pub camera: [f32; 16],
    /// Frames in flight per relay.
    pub relay_capacity: usize,
    /// Fourcc of the AVI writers (OpenCV backend only).
    pub codec: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            session_id: "rec_now".into(),
            fps: 5.0,
            show_capture: false,
            output_dir: PathBuf::from("."),
            color_size: COLOR_FRAME,
            depth_size: DEPTH_FRAME,
            intrinsics: Intrinsics::default(),
            camera: IDENTITY_ROW_MAJOR,
            relay_capacity: DEFAULT_CAPACITY,
            codec: "FFV1".into(),
        }
    }
}

pub(crate) const IDENTITY_ROW_MAJOR: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

impl RecorderConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(crate::io_error(path))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RecordError::InvalidConfig(msg));

        if self.session_id.trim().is_empty() {
            return bad("session id is empty".into());
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return bad(format!("fps must be positive, got {}", self.fps));
        }
        if self.color_size.is_empty() || self.depth_size.is_empty() {
            return bad("frame sizes must be non-empty".into());
        }
        if self.color_size.width % 2 != 0 {
            return bad(format!("YUY2 color width must be even, got {}", self.color_size.width));
        }
        if self.color_output_size().is_empty() {
            return bad(format!("color size {:?} too small to halve", self.color_size));
        }
        if self.relay_capacity == 0 {
            return bad("relay capacity must be at least 1".into());
        }
        if !(self.intrinsics.fx > 0.0 && self.intrinsics.fy > 0.0) {
            return bad(format!("focal lengths must be positive: {:?}", self.intrinsics));
        }
        if self.codec.chars().count() != 4 {
            return bad(format!("codec must be a fourcc, got {:?}", self.codec));
        }
        Ok(())
    }

    /// Minimum spacing between accepted frames, in device ticks.
    pub fn frame_interval(&self) -> Timestamp {
        frame_interval_ticks(self.fps)
    }

    /// The color stream is stored at half the sensor resolution.
    pub fn color_output_size(&self) -> FrameSize {
        self.color_size.scaled_down(2)
    }

    pub fn color_video_path(&self) -> PathBuf {
        video_path(&self.output_dir, &self.session_id, "color")
    }

    pub fn depth_video_path(&self) -> PathBuf {
        video_path(&self.output_dir, &self.session_id, "depth")
    }

    pub fn point_cloud_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.ply", self.session_id))
    }

    pub fn session_dump_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.json", self.session_id))
    }
}
