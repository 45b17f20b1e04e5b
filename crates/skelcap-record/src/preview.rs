use log::warn;
use ndarray::ArrayView3;

use crate::sink::PixelLayout;

/// Non-blocking live preview window for one stream.
///
/// Needs the `opencv` feature; otherwise a requested preview is reported
/// once and ignored.  A preview that fails at runtime disables itself.
pub struct Preview {
    window: &'static str,
    #[cfg_attr(not(feature = "opencv"), allow(dead_code))]
    layout: PixelLayout,
    enabled: bool,
    #[cfg(feature = "opencv")]
    mat: Option<opencv::core::Mat>,
}

impl Preview {
    pub fn new(window: &'static str, layout: PixelLayout, requested: bool) -> Self {
        let enabled = requested && cfg!(feature = "opencv");
        if requested && !enabled {
            warn!("Live preview of {window} requested but skelcap was built without the `opencv` feature");
        }
        Self {
            window,
            layout,
            enabled,
            #[cfg(feature = "opencv")]
            mat: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn show(&mut self, frame: ArrayView3<'_, u8>) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.render(frame) {
            warn!("Disabling {} preview: {e}", self.window);
            self.enabled = false;
        }
    }

    #[cfg(not(feature = "opencv"))]
    fn render(&mut self, _frame: ArrayView3<'_, u8>) -> crate::Result<()> {
        Ok(())
    }

    #[cfg(feature = "opencv")]
    fn render(&mut self, frame: ArrayView3<'_, u8>) -> crate::Result<()> {
        use opencv::{
            core::{Mat, Scalar, CV_8UC3},
            highgui,
            prelude::*,
        };

        let (h, w, _) = frame.dim();
        let fits = self
            .mat
            .as_ref()
            .is_some_and(|m| m.rows() as usize == h && m.cols() as usize == w);
        if !fits {
            self.mat = Some(Mat::new_rows_cols_with_default(
                h as i32,
                w as i32,
                CV_8UC3,
                Scalar::all(0.0),
            )?);
        }
        let Some(mat) = self.mat.as_mut() else {
            return Ok(());
        };
        let dst = mat.data_bytes_mut()?;
        for (px, src) in dst.chunks_exact_mut(3).zip(frame.rows()) {
            match self.layout {
                PixelLayout::Rgb => {
                    px[0] = src[2];
                    px[1] = src[1];
                    px[2] = src[0];
                }
                PixelLayout::Packed => {
                    px[0] = src[0];
                    px[1] = src[1];
                    px[2] = src[2];
                }
            }
        }
        highgui::imshow(self.window, &*mat)?;
        highgui::wait_key(1)?;
        Ok(())
    }
}
