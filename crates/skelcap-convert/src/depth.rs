//! Depth + body-index packing.
//!
//! The producer interleaves the 1-byte mask and the two bytes of the 16-bit
//! depth sample into one 3-channel frame, (mask, low, high), so the pair can
//! be relayed and encoded as a single lossless image.

use ndarray::{s, Array2, Array3, ArrayView3, Zip};
use skelcap_source::FrameSize;

use crate::{ConvertError, Result};

pub const MASK_CHANNEL: usize = 0;
pub const DEPTH_LOW_CHANNEL: usize = 1;
pub const DEPTH_HIGH_CHANNEL: usize = 2;

/// Empty packed depth+mask frame.
pub fn depth_mask_frame(size: FrameSize) -> Array3<u8> {
    Array3::zeros((size.height as usize, size.width as usize, 3))
}

/// Pack a depth plane and a mask plane into `out`.
///
/// Pixels beyond the end of either source slice are written as zero, so a
/// short sensor buffer is never over-read.
pub fn pack_depth_and_mask(depth: &[u16], mask: &[u8], out: &mut Array3<u8>) -> Result<()> {
    let dst = out.as_slice_mut().ok_or(ConvertError::Layout)?;
    for (idx, px) in dst.chunks_exact_mut(3).enumerate() {
        let d = depth.get(idx).copied().unwrap_or(0);
        px[MASK_CHANNEL] = mask.get(idx).copied().unwrap_or(0);
        px[DEPTH_LOW_CHANNEL] = (d & 0xFF) as u8;
        px[DEPTH_HIGH_CHANNEL] = (d >> 8) as u8;
    }
    Ok(())
}

/// Split a packed frame back into its mask plane and 16-bit depth plane.
pub fn unpack_depth_and_mask(frame: ArrayView3<'_, u8>) -> (Array2<u8>, Array2<u16>) {
    let mask = frame.slice(s![.., .., MASK_CHANNEL]).to_owned();
    let mut depth = Array2::<u16>::zeros(mask.raw_dim());
    Zip::from(&mut depth)
        .and(frame.slice(s![.., .., DEPTH_LOW_CHANNEL]))
        .and(frame.slice(s![.., .., DEPTH_HIGH_CHANNEL]))
        .for_each(|d, &lo, &hi| *d = u16::from_le_bytes([lo, hi]));
    (mask, depth)
}

/// Millimeters → meters.
pub fn depth_meters(depth_mm: u16) -> f32 {
    depth_mm as f32 * 0.001
}

/// Mirror a frame left-to-right without copying.
pub fn flip_horizontal<'a>(frame: ArrayView3<'a, u8>) -> ArrayView3<'a, u8> {
    frame.slice_move(s![.., ..;-1, ..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_restores_planes() {
        let size = FrameSize::new(3, 2);
        let depth = [0u16, 1, 255, 256, 4500, u16::MAX];
        let mask = [0u8, 0xFF, 0, 0xFF, 7, 0xFF];
        let mut frame = depth_mask_frame(size);
        pack_depth_and_mask(&depth, &mask, &mut frame).unwrap();

        assert_eq!(frame[[1, 1, DEPTH_LOW_CHANNEL]], (4500 & 0xFF) as u8);
        assert_eq!(frame[[1, 1, DEPTH_HIGH_CHANNEL]], (4500 >> 8) as u8);

        let (m, d) = unpack_depth_and_mask(frame.view());
        assert_eq!(m.as_slice().unwrap(), &mask);
        assert_eq!(d.as_slice().unwrap(), &depth);
    }

    #[test]
    fn short_planes_leave_zeros() {
        let mut frame = depth_mask_frame(FrameSize::new(2, 2));
        frame.fill(9);
        pack_depth_and_mask(&[300], &[0xFF, 0xFF], &mut frame).unwrap();
        let (m, d) = unpack_depth_and_mask(frame.view());
        assert_eq!(m.as_slice().unwrap(), &[0xFF, 0xFF, 0, 0]);
        assert_eq!(d.as_slice().unwrap(), &[300, 0, 0, 0]);
    }

    #[test]
    fn flip_mirrors_columns() {
        let mut frame = depth_mask_frame(FrameSize::new(3, 1));
        frame[[0, 0, 0]] = 1;
        frame[[0, 2, 0]] = 3;
        let flipped = flip_horizontal(frame.view());
        assert_eq!(flipped[[0, 0, 0]], 3);
        assert_eq!(flipped[[0, 2, 0]], 1);
    }

    #[test]
    fn millimeters_to_meters() {
        assert!((depth_meters(1500) - 1.5).abs() < 1e-6);
        assert_eq!(depth_meters(0), 0.0);
    }
}
