use ndarray::{Array3, ArrayView3};
use resize::{formats, Pixel, Resizer, Type};
use rgb::FromSlice;
use skelcap_source::{FrameSize, COLOR_BYTES_PER_PIXEL};

use crate::{check_shape, ConvertError, Result};

/// Empty YUY2 frame of the given sensor size.
pub fn yuy2_frame(size: FrameSize) -> Array3<u8> {
    Array3::zeros((size.height as usize, size.width as usize, COLOR_BYTES_PER_PIXEL))
}

/// Copy a raw YUY2 sensor buffer into `frame`.
///
/// Only the overlapping prefix is copied; a short buffer leaves the tail
/// untouched and a long one is truncated.  Returns the number of bytes copied.
pub fn load_yuy2(data: &[u8], frame: &mut Array3<u8>) -> Result<usize> {
    let dst = frame.as_slice_mut().ok_or(ConvertError::Layout)?;
    let n = dst.len().min(data.len());
    dst[..n].copy_from_slice(&data[..n]);
    Ok(n)
}

/// YUY2 → RGB, then a linear (triangle) downscale to the output size.
///
/// The resampler and its filter tables are built once, for the fixed
/// source and destination sizes.
pub struct ColorConverter {
    src: FrameSize,
    dst: FrameSize,
    rgb: Vec<u8>,
    resizer: Option<Resizer<formats::Rgb<u8, u8>>>,
}

impl ColorConverter {
    pub fn new(src: FrameSize, dst: FrameSize) -> Result<Self> {
        let resizer = if src == dst {
            None
        } else {
            Some(resize::new(
                src.width as usize,
                src.height as usize,
                dst.width as usize,
                dst.height as usize,
                Pixel::RGB8,
                Type::Triangle,
            )?)
        };
        Ok(Self {
            src,
            dst,
            rgb: vec![0; src.pixels() * 3],
            resizer,
        })
    }

    /// Converter producing the half-resolution stream.
    pub fn half(src: FrameSize) -> Result<Self> {
        Self::new(src, src.scaled_down(2))
    }

    pub fn output_size(&self) -> FrameSize {
        self.dst
    }

    pub fn convert(&mut self, yuy2: ArrayView3<'_, u8>) -> Result<Array3<u8>> {
        let mut out = Array3::zeros((self.dst.height as usize, self.dst.width as usize, 3));
        self.convert_into(yuy2, &mut out)?;
        Ok(out)
    }

    pub fn convert_into(&mut self, yuy2: ArrayView3<'_, u8>, out: &mut Array3<u8>) -> Result<()> {
        let (w, h) = (self.src.width as usize, self.src.height as usize);
        check_shape(yuy2.dim(), (h, w, COLOR_BYTES_PER_PIXEL))?;
        check_shape(out.dim(), (self.dst.height as usize, self.dst.width as usize, 3))?;

        // 1. YUY2 → RGB at sensor resolution
        let raw = yuy2.as_standard_layout();
        let raw = raw.as_slice().ok_or(ConvertError::Layout)?;
        yuy2_to_rgb(raw, w, h, &mut self.rgb);

        // 2. Linear downscale (resize crate)
        let dst = out.as_slice_mut().ok_or(ConvertError::Layout)?;
        match self.resizer.as_mut() {
            None => dst.copy_from_slice(&self.rgb),
            Some(resizer) => resizer.resize(self.rgb.as_rgb(), dst.as_rgb_mut())?,
        }
        Ok(())
    }
}

/// Packed YUY2 4:2:2 → RGB24 conversion (BT.601, full range).
fn yuy2_to_rgb(yuy2: &[u8], w: usize, h: usize, out: &mut [u8]) {
    for j in 0..h {
        let row = &yuy2[j * w * 2..(j + 1) * w * 2];
        for (pair, px) in row.chunks_exact(4).enumerate() {
            let u = px[1] as f32 - 128.0;
            let v = px[3] as f32 - 128.0;
            for (k, y) in [px[0], px[2]].into_iter().enumerate() {
                let y_val = y as f32;
                let r = (y_val + 1.402 * v).clamp(0.0, 255.0);
                let g = (y_val - 0.344_13 * u - 0.714_14 * v).clamp(0.0, 255.0);
                let b = (y_val + 1.772 * u).clamp(0.0, 255.0);

                let base = (j * w + pair * 2 + k) * 3;
                out[base] = r as u8;
                out[base + 1] = g as u8;
                out[base + 2] = b as u8;
            }
        }
    }
}
