// skelcap-record/src/lib.rs
// ============================================================
// Capture-to-storage core for skelcap
// Sensor callbacks are throttled per stream, copied into
// recycled frame buffers and relayed over bounded SPSC queues
// to one consumer thread per video stream, which converts,
// previews and appends each frame to its video sink.
// ------------------------------------------------------------
// Public API:
//   * Recorder::start(config)  – open sinks, spawn consumers
//   * Recorder::handle(event)  – producer-side callback entry
//   * Recorder::finish()       – stop, drain, join, report
//   * Reprojector / write_ply  – masked depth → point cloud
// ------------------------------------------------------------
// Build notes
//   * Default sinks write lossless PNG sequences (pure Rust).
//   * `--features opencv` switches to cv::VideoWriter AVI files
//     and enables the highgui live preview.
// ============================================================

//! skelcap – recording layer
//!
//! Threading: the thread that calls the `on_*` callbacks is the producer.
//! It owns the per-stream [`RateGate`]s and the sending halves of the two
//! [`relay`]s, so no timestamp log is ever touched from two threads.  Two
//! consumer threads (`skelcap-color`, `skelcap-depth`) drain the relays
//! until the session's liveness flag clears.  Skeleton samples skip the
//! relays and are appended to the shared [`Session`] directly.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod cloud;
mod config;
mod gate;
mod preview;
mod recorder;
pub mod relay;
mod session;
pub mod sink;
mod transcode;

pub use cloud::{write_ply, write_ply_file, Intrinsics, Mat4, Point, Reprojector};
pub use config::RecorderConfig;
pub use gate::RateGate;
pub use preview::Preview;
pub use recorder::{Recorder, RecordingReport, StopHandle};
pub use session::{wall_clock_micros, Recording, Session};
pub use sink::{PixelLayout, SinkSpec, VideoSink};
pub use transcode::{
    CloudOutcome, ColorTranscoder, DepthTranscoder, FrameProcessor, PointCloudDump, StreamReport,
    StreamState, StreamStatus,
};

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("invalid recorder configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Convert(#[from] skelcap_convert::ConvertError),
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    Cv(#[from] opencv::Error),
    #[error("video writer for {0:?} could not be opened")]
    SinkUnavailable(PathBuf),
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecordError>;

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RecordError + '_ {
    move |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    }
}
