//! skelcap-convert – pixel transforms between sensor layouts and storable frames.
//!
//! Frames travel as `ndarray::Array3<u8>` in (H, W, C) order:
//!   * raw color     – C = 2, YUY2 (Y0 U Y1 V per pixel pair)
//!   * encoded color – C = 3, RGB, half resolution
//!   * depth + mask  – C = 3, (mask, depth low byte, depth high byte)

use thiserror::Error;

pub mod color;
pub mod depth;

pub use color::{load_yuy2, yuy2_frame, ColorConverter};
pub use depth::{
    depth_mask_frame, depth_meters, flip_horizontal, pack_depth_and_mask, unpack_depth_and_mask,
};

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("resize failed: {0}")]
    Resize(#[from] resize::Error),
    #[error("frame shape mismatch: expected {expected:?}, got {got:?}")]
    Shape {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    #[error("frame buffer is not contiguous")]
    Layout,
}

pub type Result<T> = std::result::Result<T, ConvertError>;

pub(crate) fn check_shape(got: (usize, usize, usize), expected: (usize, usize, usize)) -> Result<()> {
    if got != expected {
        return Err(ConvertError::Shape { expected, got });
    }
    Ok(())
}
