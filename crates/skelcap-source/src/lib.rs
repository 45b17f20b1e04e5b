// skelcap-source/src/lib.rs
// ============================================================
// Sensor-facing vocabulary for skelcap
// Describes what a depth/color/body-tracking sensor hands to
// the recorder: frame geometry, skeleton samples and the
// borrowed per-callback events.
// ------------------------------------------------------------
// Public API:
//   * SourceEvent      – one sensor callback (skeleton / color / depth+mask)
//   * FrameSource      – anything that can emit SourceEvents
//   * SyntheticSource  – deterministic stand-in sensor
// ------------------------------------------------------------
// Build notes
//   * No hardware bindings live here; a device adapter only has
//     to implement `FrameSource`.
// ============================================================

//! skelcap – sensor source layer
//!
//! Buffers inside a [`SourceEvent`] are borrowed: they are only valid for
//! the duration of the callback that receives them, exactly like the
//! underlying device SDK buffers.  Consumers copy whatever they keep.

use thiserror::Error;

mod event;
mod geometry;
pub mod skeleton;
mod synthetic;

pub use event::{FrameSource, SourceEvent};
pub use geometry::{
    frame_interval_ticks, FrameSize, Timestamp, COLOR_BYTES_PER_PIXEL, COLOR_FRAME, DEPTH_FRAME,
    TICKS_PER_SECOND,
};
pub use skeleton::{SkeletonSample, BACKGROUND, FOREGROUND};
pub use synthetic::{SyntheticConfig, SyntheticSource};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
    #[error("sensor disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;
