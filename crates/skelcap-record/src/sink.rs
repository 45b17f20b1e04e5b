//! Append-only video sinks, one per camera stream.
//!
//! A sink that fails to open is not an error for the session: the failure
//! is logged once and every later write is a no-op, so capture and
//! conversion keep running without disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use skelcap_source::FrameSize;

use crate::{io_error, Result};

/// What the three channels of a frame mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// Photometric RGB.
    Rgb,
    /// Structural packing (mask, depth low, depth high); never color-converted.
    Packed,
}

/// Parameters a sink is opened with at session start.
#[derive(Debug, Clone)]
pub struct SinkSpec {
    pub label: &'static str,
    pub path: PathBuf,
    pub fps: f64,
    pub size: FrameSize,
    pub layout: PixelLayout,
    pub codec: String,
}

/// Backend that actually stores frames.
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: ArrayView3<'_, u8>) -> Result<()>;

    /// Flush and close.  Called once.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Output location of a stream's video for the compiled-in backend.
pub fn video_path(dir: &Path, session_id: &str, stream: &str) -> PathBuf {
    if cfg!(feature = "opencv") {
        dir.join(format!("{session_id}.{stream}.avi"))
    } else {
        dir.join(format!("{session_id}.{stream}"))
    }
}

pub struct VideoSink {
    label: &'static str,
    path: PathBuf,
    writer: Option<Box<dyn FrameWriter>>,
    written: u64,
}

impl VideoSink {
    /// Open the compiled-in backend.  Never fails: an unusable path yields a
    /// disabled sink.
    pub fn open(spec: &SinkSpec) -> Self {
        match open_writer(spec) {
            Ok(writer) => {
                info!(
                    "Opened {} video {:?} ({}x{} @ {} fps)",
                    spec.label, spec.path, spec.size.width, spec.size.height, spec.fps
                );
                Self::with_writer(spec.label, spec.path.clone(), writer)
            }
            Err(e) => {
                error!("Could not open {} video file {:?}: {e}", spec.label, spec.path);
                Self::disabled(spec.label, spec.path.clone())
            }
        }
    }

    pub fn with_writer(label: &'static str, path: PathBuf, writer: Box<dyn FrameWriter>) -> Self {
        Self {
            label,
            path,
            writer: Some(writer),
            written: 0,
        }
    }

    pub fn disabled(label: &'static str, path: PathBuf) -> Self {
        Self {
            label,
            path,
            writer: None,
            written: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Append a frame.  `Ok(false)` when the sink is disabled.
    pub fn write(&mut self, frame: ArrayView3<'_, u8>) -> Result<bool> {
        match self.writer.as_mut() {
            None => Ok(false),
            Some(w) => {
                w.write_frame(frame)?;
                self.written += 1;
                Ok(true)
            }
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut w) => {
                w.finish()?;
                info!("Closed {} video after {} frames", self.label, self.written);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing {} video {:?} failed: {e}", self.label, self.path);
        }
    }
}

#[cfg(not(feature = "opencv"))]
fn open_writer(spec: &SinkSpec) -> Result<Box<dyn FrameWriter>> {
    Ok(Box::new(ImageSequenceWriter::open(spec)?))
}

#[cfg(feature = "opencv")]
fn open_writer(spec: &SinkSpec) -> Result<Box<dyn FrameWriter>> {
    Ok(Box::new(cv::CvVideoWriter::open(spec)?))
}

/// Contents of `sequence.json` beside the frames of an image-sequence video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub codec: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub frames: u64,
}

/// Lossless PNG-per-frame video: `<dir>/000000.png`, `000001.png`, …
pub struct ImageSequenceWriter {
    dir: PathBuf,
    manifest: SequenceManifest,
}

impl ImageSequenceWriter {
    pub const MANIFEST: &'static str = "sequence.json";

    pub fn open(spec: &SinkSpec) -> Result<Self> {
        fs::create_dir_all(&spec.path).map_err(io_error(&spec.path))?;
        let writer = Self {
            dir: spec.path.clone(),
            manifest: SequenceManifest {
                codec: "png".into(),
                fps: spec.fps,
                width: spec.size.width,
                height: spec.size.height,
                layout: spec.layout,
                frames: 0,
            },
        };
        // Writing the manifest up front surfaces an unwritable directory at open time.
        writer.write_manifest()?;
        Ok(writer)
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index:06}.png"))
    }

    fn write_manifest(&self) -> Result<()> {
        let path = self.dir.join(Self::MANIFEST);
        let json = serde_json::to_vec_pretty(&self.manifest)?;
        fs::write(&path, json).map_err(io_error(&path))
    }
}

impl FrameWriter for ImageSequenceWriter {
    fn write_frame(&mut self, frame: ArrayView3<'_, u8>) -> Result<()> {
        let (w, h) = (self.manifest.width as usize, self.manifest.height as usize);
        if frame.dim() != (h, w, 3) {
            return Err(skelcap_convert::ConvertError::Shape {
                expected: (h, w, 3),
                got: frame.dim(),
            }
            .into());
        }
        let data = frame.as_standard_layout();
        let bytes = data.as_slice().ok_or(skelcap_convert::ConvertError::Layout)?;

        image::save_buffer_with_format(
            self.frame_path(self.manifest.frames),
            bytes,
            self.manifest.width,
            self.manifest.height,
            image::ColorType::Rgb8,
            image::ImageFormat::Png,
        )?;
        self.manifest.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.write_manifest()
    }
}

#[cfg(feature = "opencv")]
mod cv {
    use ndarray::ArrayView3;
    use opencv::{
        core::{Mat, Scalar, Size, CV_8UC3},
        prelude::*,
        videoio::VideoWriter,
    };

    use super::{FrameWriter, PixelLayout, SinkSpec};
    use crate::{RecordError, Result};

    /// `cv::VideoWriter` AVI backend.
    pub struct CvVideoWriter {
        writer: VideoWriter,
        mat: Mat,
        layout: PixelLayout,
    }

    impl CvVideoWriter {
        pub fn open(spec: &SinkSpec) -> Result<Self> {
            let cc: Vec<char> = spec.codec.chars().collect();
            if cc.len() != 4 {
                return Err(RecordError::InvalidConfig(format!("fourcc {:?}", spec.codec)));
            }
            let fourcc = VideoWriter::fourcc(cc[0], cc[1], cc[2], cc[3])?;
            let path = spec
                .path
                .to_str()
                .ok_or_else(|| RecordError::SinkUnavailable(spec.path.clone()))?;
            let (w, h) = (spec.size.width as i32, spec.size.height as i32);

            let writer = VideoWriter::new(path, fourcc, spec.fps, Size::new(w, h), true)?;
            if !writer.is_opened()? {
                return Err(RecordError::SinkUnavailable(spec.path.clone()));
            }
            let mat = Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(0.0))?;
            Ok(Self {
                writer,
                mat,
                layout: spec.layout,
            })
        }
    }

    impl FrameWriter for CvVideoWriter {
        fn write_frame(&mut self, frame: ArrayView3<'_, u8>) -> Result<()> {
            let dst = self.mat.data_bytes_mut()?;
            if dst.len() != frame.len() {
                return Err(skelcap_convert::ConvertError::Shape {
                    expected: (self.mat.rows() as usize, self.mat.cols() as usize, 3),
                    got: frame.dim(),
                }
                .into());
            }
            for (px, src) in dst.chunks_exact_mut(3).zip(frame.rows()) {
                match self.layout {
                    // BGR order for OpenCV
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
            self.writer.write(&self.mat)?;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.writer.release()?;
            Ok(())
        }
    }
}

#[cfg(all(test, not(feature = "opencv")))]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn spec(dir: &Path) -> SinkSpec {
        SinkSpec {
            label: "color",
            path: dir.join("rec.color"),
            fps: 5.0,
            size: FrameSize::new(4, 2),
            layout: PixelLayout::Rgb,
            codec: "FFV1".into(),
        }
    }

    #[test]
    fn writes_png_sequence_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = spec(tmp.path());
        let mut sink = VideoSink::open(&spec);
        assert!(sink.is_open());

        let frame = Array3::<u8>::from_elem((2, 4, 3), 77);
        assert!(sink.write(frame.view()).unwrap());
        assert!(sink.write(frame.view()).unwrap());
        sink.close().unwrap();

        assert!(spec.path.join("000000.png").is_file());
        assert!(spec.path.join("000001.png").is_file());
        let img = image::open(spec.path.join("000001.png")).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(3, 1).0, [77, 77, 77]);

        let manifest: SequenceManifest = serde_json::from_slice(
            &fs::read(spec.path.join(ImageSequenceWriter::MANIFEST)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.frames, 2);
        assert_eq!(manifest.codec, "png");
    }

    #[test]
    fn unwritable_path_disables_sink() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let spec = spec(blocker.path());
        let mut sink = VideoSink::open(&spec);
        assert!(!sink.is_open());

        let frame = Array3::<u8>::zeros((2, 4, 3));
        assert!(!sink.write(frame.view()).unwrap());
        assert_eq!(sink.frames_written(), 0);
    }

    #[test]
    fn wrong_shape_is_a_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = VideoSink::open(&spec(tmp.path()));
        let frame = Array3::<u8>::zeros((3, 3, 3));
        assert!(sink.write(frame.view()).is_err());
    }
}
