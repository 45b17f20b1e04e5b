use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};
use ndarray::Array3;
use skelcap_convert::{depth_mask_frame, load_yuy2, pack_depth_and_mask, yuy2_frame, ColorConverter};
use skelcap_source::{SkeletonSample, SourceEvent, Timestamp};

use crate::cloud::{mat4_from_row_major, Reprojector};
use crate::config::RecorderConfig;
use crate::gate::RateGate;
use crate::preview::Preview;
use crate::relay::{self, RelaySender};
use crate::session::{Recording, Session};
use crate::sink::{PixelLayout, SinkSpec, VideoSink};
use crate::transcode::{
    spawn_consumer, ColorTranscoder, DepthTranscoder, StreamReport, StreamState, StreamStatus,
};
use crate::Result;

type Frame = Array3<u8>;

/// Everything a finished session produced.
#[derive(Debug, Clone)]
pub struct RecordingReport {
    pub recording: Recording,
    pub color: StreamReport,
    pub depth: StreamReport,
}

/// Clears the session's liveness flag from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    session: Arc<Session>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.session.set_live(false);
    }
}

/// Producer-side state of one video stream.
struct StreamFeed {
    label: &'static str,
    gate: RateGate,
    tx: RelaySender<Frame>,
    shape: (usize, usize, usize),
    status: StreamStatus,
    worker: Option<JoinHandle<StreamReport>>,
    closed_logged: bool,
}

impl StreamFeed {
    fn new(
        label: &'static str,
        gate: RateGate,
        tx: RelaySender<Frame>,
        shape: (usize, usize, usize),
        status: StreamStatus,
    ) -> Self {
        Self {
            label,
            gate,
            tx,
            shape,
            status,
            worker: None,
            closed_logged: false,
        }
    }

    /// Gate check plus relay state.  A closed relay drops the frame.
    fn admits(&mut self, ts: Timestamp) -> bool {
        if !self.gate.admits(ts) {
            return false;
        }
        if self.tx.is_closed() {
            self.log_closed();
            return false;
        }
        true
    }

    /// A recycled buffer of the right shape, or a fresh one.
    fn buffer(&mut self) -> Frame {
        match self.tx.take_spare() {
            Some(frame) if frame.dim() == self.shape => frame,
            _ => Array3::zeros(self.shape),
        }
    }

    fn send(&mut self, ts: Timestamp, frame: Frame) {
        match self.tx.push(frame) {
            Ok(()) => self.gate.accept(ts),
            Err(_) => self.log_closed(),
        }
    }

    fn log_closed(&mut self) {
        if !self.closed_logged {
            self.closed_logged = true;
            warn!(
                "{} consumer is no longer running ({:?}); dropping its frames",
                self.label,
                self.status.get()
            );
        }
    }

    fn join(&mut self) -> Option<StreamReport> {
        let worker = self.worker.take()?;
        let report = worker.join().unwrap_or_else(|_| {
            self.status.set(StreamState::Faulted);
            let mut report = StreamReport::new(self.label);
            report.state = StreamState::Faulted;
            report
        });
        Some(report)
    }
}

/// Capture-to-storage session.
///
/// The thread calling the `on_*` callbacks (or [`handle`](Self::handle)) is
/// the producer.  Video frames that pass their stream's rate gate are copied
/// into relay buffers and handed to the consumer threads; skeleton samples
/// go straight to the [`Session`].
pub struct Recorder {
    config: RecorderConfig,
    session: Arc<Session>,
    color: StreamFeed,
    depth: StreamFeed,
}

impl Recorder {
    pub fn start(config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let color_out = config.color_output_size();
        let converter = ColorConverter::new(config.color_size, color_out)?;
        if !relay::is_lock_free() {
            warn!("Frame relay atomics are not lock-free on this target; expect higher latency");
        }

        let session = Session::new(config.session_id.clone(), config.camera);
        session.set_live(true);
        info!(
            "Starting session {} at {} fps into {:?}",
            config.session_id, config.fps, config.output_dir
        );

        let color_sink = VideoSink::open(&SinkSpec {
            label: "color",
            path: config.color_video_path(),
            fps: config.fps,
            size: color_out,
            layout: PixelLayout::Rgb,
            codec: config.codec.clone(),
        });
        let depth_sink = VideoSink::open(&SinkSpec {
            label: "depth",
            path: config.depth_video_path(),
            fps: config.fps,
            size: config.depth_size,
            layout: PixelLayout::Packed,
            codec: config.codec.clone(),
        });

        let color_proc = ColorTranscoder::new(
            converter,
            Preview::new("Color", PixelLayout::Rgb, config.show_capture),
            color_sink,
        );
        let depth_proc = DepthTranscoder::new(
            Reprojector::new(&config.intrinsics, config.depth_size)
                .with_extrinsic(mat4_from_row_major(&config.camera)),
            config.point_cloud_path(),
            Preview::new("Depth", PixelLayout::Packed, config.show_capture),
            depth_sink,
        );

        let (color_tx, color_rx) = relay::bounded(config.relay_capacity);
        let (depth_tx, depth_rx) = relay::bounded(config.relay_capacity);
        let mut color = StreamFeed::new(
            "color",
            RateGate::new(config.frame_interval()),
            color_tx,
            yuy2_frame(config.color_size).dim(),
            StreamStatus::new(),
        );
        let mut depth = StreamFeed::new(
            "depth",
            RateGate::new(config.frame_interval()),
            depth_tx,
            depth_mask_frame(config.depth_size).dim(),
            StreamStatus::new(),
        );

        let spawned = spawn_consumer(color_rx, color_proc, session.clone(), color.status.clone())
            .and_then(|c| {
                color.worker = Some(c);
                spawn_consumer(depth_rx, depth_proc, session.clone(), depth.status.clone())
            });
        match spawned {
            Ok(d) => depth.worker = Some(d),
            Err(e) => {
                // Lets an already running color consumer exit.
                session.set_live(false);
                return Err(e);
            }
        }

        Ok(Self {
            config,
            session,
            color,
            depth,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            session: self.session.clone(),
        }
    }

    /// Clear liveness.  Consumers drain what they already hold and exit.
    pub fn stop(&self) {
        self.session.set_live(false);
    }

    pub fn color_state(&self) -> StreamState {
        self.color.status.get()
    }

    pub fn depth_state(&self) -> StreamState {
        self.depth.status.get()
    }

    /// Accepted color frame timestamps so far.
    pub fn color_timestamps(&self) -> &[Timestamp] {
        self.color.gate.accepted()
    }

    /// Accepted depth frame timestamps so far.
    pub fn depth_timestamps(&self) -> &[Timestamp] {
        self.depth.gate.accepted()
    }

    pub fn on_skeleton(&self, sample: &SkeletonSample) {
        if self.session.is_live() {
            self.session.record_skeleton(sample);
        }
    }

    /// Raw YUY2 color buffer from the sensor.  Only valid for this call.
    pub fn on_color(&mut self, timestamp: Timestamp, data: &[u8]) {
        if !self.session.is_live() || !self.color.admits(timestamp) {
            return;
        }
        let mut frame = self.color.buffer();
        if data.len() < frame.len() {
            frame.fill(0);
        }
        if let Err(e) = load_yuy2(data, &mut frame) {
            warn!("Dropping color frame {timestamp}: {e}");
            return;
        }
        self.color.send(timestamp, frame);
    }

    /// Depth (mm) and body-index planes from the sensor.  Only valid for this call.
    pub fn on_depth_and_mask(&mut self, timestamp: Timestamp, depth: &[u16], mask: &[u8]) {
        if !self.session.is_live() || !self.depth.admits(timestamp) {
            return;
        }
        let mut frame = self.depth.buffer();
        if let Err(e) = pack_depth_and_mask(depth, mask, &mut frame) {
            warn!("Dropping depth frame {timestamp}: {e}");
            return;
        }
        self.depth.send(timestamp, frame);
    }

    pub fn handle(&mut self, event: SourceEvent<'_>) {
        match event {
            SourceEvent::Skeleton(sample) => self.on_skeleton(sample),
            SourceEvent::Color { timestamp, data } => self.on_color(timestamp, data),
            SourceEvent::DepthAndMask {
                timestamp,
                depth,
                mask,
            } => self.on_depth_and_mask(timestamp, depth, mask),
        }
    }

    /// Stop, wait for both consumers, and collect the session.
    pub fn finish(mut self) -> RecordingReport {
        self.stop();
        let color = self
            .color
            .join()
            .unwrap_or_else(|| StreamReport::new("color"));
        let depth = self
            .depth
            .join()
            .unwrap_or_else(|| StreamReport::new("depth"));
        let recording = self
            .session
            .snapshot(self.color.gate.take_log(), self.depth.gate.take_log());
        info!(
            "Session {} finished: {} skeletons, {} color / {} depth frames",
            recording.id,
            recording.skeletons.len(),
            recording.color_timestamps.len(),
            recording.depth_timestamps.len()
        );
        RecordingReport {
            recording,
            color,
            depth,
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.session.set_live(false);
        self.color.join();
        self.depth.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skelcap_source::FrameSize;

    fn small_config(dir: &std::path::Path) -> RecorderConfig {
        RecorderConfig {
            session_id: "unit".into(),
            output_dir: dir.to_path_buf(),
            color_size: FrameSize::new(8, 4),
            depth_size: FrameSize::new(4, 4),
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let cfg = RecorderConfig {
            fps: -1.0,
            ..Default::default()
        };
        assert!(Recorder::start(cfg).is_err());
    }

    #[test]
    fn producer_gates_and_logs_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(small_config(tmp.path())).unwrap();
        let color = vec![128u8; 8 * 4 * 2];
        for ts in [0, 10, 2_100_000, 2_200_000] {
            rec.on_color(ts, &color);
        }
        assert_eq!(rec.color_timestamps(), &[0, 2_100_000]);
        assert!(rec.depth_timestamps().is_empty());

        let report = rec.finish();
        assert_eq!(report.recording.color_timestamps, vec![0, 2_100_000]);
        assert_eq!(report.color.state, StreamState::Stopped);
    }

    #[test]
    fn frames_after_stop_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(small_config(tmp.path())).unwrap();
        rec.stop_handle().stop();
        assert!(!rec.is_live());
        rec.on_color(0, &[0u8; 64]);
        rec.on_depth_and_mask(0, &[1000; 16], &[0xFF; 16]);
        rec.on_skeleton(&SkeletonSample::new(1, 0));

        let report = rec.finish();
        assert!(report.recording.color_timestamps.is_empty());
        assert!(report.recording.depth_timestamps.is_empty());
        assert!(report.recording.skeletons.is_empty());
    }

    #[test]
    fn short_buffers_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(small_config(tmp.path())).unwrap();
        rec.on_color(0, &[255u8; 3]);
        rec.on_depth_and_mask(0, &[1000; 2], &[]);
        let report = rec.finish();
        assert_eq!(report.recording.color_timestamps, vec![0]);
        assert_eq!(report.recording.depth_timestamps, vec![0]);
    }
}
