//! Consumer side of the pipeline: one thread per video stream drains its
//! relay, converts each frame and appends it to the stream's sink.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use ndarray::Array3;
use skelcap_convert::ColorConverter;

use crate::cloud::{write_ply_file, Reprojector};
use crate::preview::Preview;
use crate::relay::RelayReceiver;
use crate::session::Session;
use crate::sink::VideoSink;
use crate::{RecordError, Result};

/// Longest a consumer parks on an empty relay before re-checking liveness.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Back-to-back per-frame errors after which a consumer gives up.
pub const MAX_CONSECUTIVE_FAULTS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StreamState {
    #[default]
    Running = 0,
    /// Exited normally after the session stopped.
    Stopped = 1,
    /// Exited early; its remaining frames were not processed.
    Faulted = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StreamState::Running,
            1 => StreamState::Stopped,
            _ => StreamState::Faulted,
        }
    }
}

/// Consumer state shared with the producer and the shutdown path.
#[derive(Debug, Clone, Default)]
pub struct StreamStatus(Arc<AtomicU8>);

impl StreamStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Result of the one-shot point-cloud dump.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudOutcome {
    Written { path: PathBuf, points: usize },
    Failed { path: PathBuf, reason: String },
}

/// The depth consumer dumps exactly one point cloud per session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PointCloudDump {
    #[default]
    Pending,
    Done(CloudOutcome),
}

impl PointCloudDump {
    pub fn is_done(&self) -> bool {
        matches!(self, PointCloudDump::Done(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub stream: &'static str,
    pub frames_processed: u64,
    pub frames_written: u64,
    pub frames_failed: u64,
    pub state: StreamState,
    /// Depth stream only.
    pub point_cloud: Option<CloudOutcome>,
}

impl StreamReport {
    pub fn new(stream: &'static str) -> Self {
        Self {
            stream,
            frames_processed: 0,
            frames_written: 0,
            frames_failed: 0,
            state: StreamState::Running,
            point_cloud: None,
        }
    }
}

/// Per-frame work of one consumer.
pub trait FrameProcessor: Send {
    /// Stream label, also the consumer thread suffix.
    fn stream(&self) -> &'static str;

    fn process(&mut self, frame: &Array3<u8>) -> Result<()>;

    /// Called once after the loop exits.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn report(&self, report: &mut StreamReport);
}

/// YUY2 → half-resolution RGB → preview → sink.
pub struct ColorTranscoder {
    converter: ColorConverter,
    rgb: Array3<u8>,
    preview: Preview,
    sink: VideoSink,
}

impl ColorTranscoder {
    pub fn new(converter: ColorConverter, preview: Preview, sink: VideoSink) -> Self {
        let out = converter.output_size();
        Self {
            converter,
            rgb: Array3::zeros((out.height as usize, out.width as usize, 3)),
            preview,
            sink,
        }
    }
}

impl FrameProcessor for ColorTranscoder {
    fn stream(&self) -> &'static str {
        "color"
    }

    fn process(&mut self, frame: &Array3<u8>) -> Result<()> {
        self.converter.convert_into(frame.view(), &mut self.rgb)?;
        self.preview.show(self.rgb.view());
        self.sink.write(self.rgb.view())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.close()
    }

    fn report(&self, report: &mut StreamReport) {
        report.frames_written = self.sink.frames_written();
    }
}

/// Packed depth+mask frames go to the sink unchanged; the first one is
/// also reprojected into the session's point cloud.
pub struct DepthTranscoder {
    reprojector: Reprojector,
    cloud_path: PathBuf,
    cloud: PointCloudDump,
    preview: Preview,
    sink: VideoSink,
}

impl DepthTranscoder {
    pub fn new(reprojector: Reprojector, cloud_path: PathBuf, preview: Preview, sink: VideoSink) -> Self {
        Self {
            reprojector,
            cloud_path,
            cloud: PointCloudDump::Pending,
            preview,
            sink,
        }
    }

    pub fn point_cloud(&self) -> &PointCloudDump {
        &self.cloud
    }

    fn dump_point_cloud(&self, frame: &Array3<u8>) -> CloudOutcome {
        let written = self
            .reprojector
            .reproject(frame.view())
            .and_then(|points| write_ply_file(&self.cloud_path, &points));
        match written {
            Ok(points) => {
                info!("Wrote {points} points to {:?}", self.cloud_path);
                CloudOutcome::Written {
                    path: self.cloud_path.clone(),
                    points,
                }
            }
            Err(e) => {
                error!("Could not write point cloud {:?}: {e}", self.cloud_path);
                CloudOutcome::Failed {
                    path: self.cloud_path.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl FrameProcessor for DepthTranscoder {
    fn stream(&self) -> &'static str {
        "depth"
    }

    fn process(&mut self, frame: &Array3<u8>) -> Result<()> {
        if let PointCloudDump::Pending = self.cloud {
            self.cloud = PointCloudDump::Done(self.dump_point_cloud(frame));
        }
        self.preview.show(frame.view());
        self.sink.write(frame.view())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.close()
    }

    fn report(&self, report: &mut StreamReport) {
        report.frames_written = self.sink.frames_written();
        if let PointCloudDump::Done(outcome) = &self.cloud {
            report.point_cloud = Some(outcome.clone());
        }
    }
}

/// Drain `rx` until the session stops.
///
/// Liveness is sampled before each drain pass, so frames enqueued after the
/// last sample may or may not be processed.  Exiting drops `rx`, which
/// closes the relay for the producer.
pub fn run_consumer<P: FrameProcessor>(
    mut rx: RelayReceiver<Array3<u8>>,
    mut processor: P,
    session: Arc<Session>,
    status: StreamStatus,
) -> StreamReport {
    let stream = processor.stream();
    let mut report = StreamReport::new(stream);
    let mut consecutive = 0u32;
    status.set(StreamState::Running);

    'poll: loop {
        let live = session.is_live();

        while let Some(frame) = rx.pop() {
            match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&frame))) {
                Ok(Ok(())) => {
                    report.frames_processed += 1;
                    consecutive = 0;
                }
                Ok(Err(e)) => {
                    report.frames_failed += 1;
                    consecutive += 1;
                    warn!("Skipping {stream} frame: {e}");
                    if consecutive >= MAX_CONSECUTIVE_FAULTS {
                        error!("Stopping {stream} consumer after {consecutive} consecutive failures");
                        status.set(StreamState::Faulted);
                        break 'poll;
                    }
                }
                Err(_) => {
                    report.frames_failed += 1;
                    error!("Stopping {stream} consumer: panic while processing a frame");
                    status.set(StreamState::Faulted);
                    break 'poll;
                }
            }
            rx.recycle(frame);
        }

        if !live || rx.is_disconnected() {
            break;
        }
        rx.wait(POLL_INTERVAL);
    }

    let pending = rx.len();
    drop(rx);
    if pending > 0 {
        debug!("{stream} consumer left {pending} queued frames");
    }

    match panic::catch_unwind(AssertUnwindSafe(|| processor.finish())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Finalizing {stream} stream failed: {e}"),
        Err(_) => {
            error!("Finalizing {stream} stream panicked");
            status.set(StreamState::Faulted);
        }
    }
    if status.get() == StreamState::Running {
        status.set(StreamState::Stopped);
    }

    processor.report(&mut report);
    report.state = status.get();
    info!(
        "{stream} consumer exited: {} processed, {} written, {} failed ({:?})",
        report.frames_processed, report.frames_written, report.frames_failed, report.state
    );
    report
}

/// Run [`run_consumer`] on a thread named `skelcap-<stream>`.
pub fn spawn_consumer<P: FrameProcessor + 'static>(
    rx: RelayReceiver<Array3<u8>>,
    processor: P,
    session: Arc<Session>,
    status: StreamStatus,
) -> Result<JoinHandle<StreamReport>> {
    thread::Builder::new()
        .name(format!("skelcap-{}", processor.stream()))
        .spawn(move || run_consumer(rx, processor, session, status))
        .map_err(RecordError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IDENTITY_ROW_MAJOR;
    use crate::relay;

    /// Counts frames; fails on frames whose first byte is 1, panics on 2.
    struct Scripted {
        seen: Vec<u8>,
        finished: bool,
    }

    impl FrameProcessor for Scripted {
        fn stream(&self) -> &'static str {
            "test"
        }

        fn process(&mut self, frame: &Array3<u8>) -> Result<()> {
            let tag = frame[[0, 0, 0]];
            match tag {
                1 => Err(RecordError::InvalidConfig("bad frame".into())),
                2 => panic!("boom"),
                _ => {
                    self.seen.push(tag);
                    Ok(())
                }
            }
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }

        fn report(&self, report: &mut StreamReport) {
            report.frames_written = self.seen.len() as u64;
        }
    }

    fn tagged(tag: u8) -> Array3<u8> {
        Array3::from_elem((1, 1, 3), tag)
    }

    fn scripted() -> Scripted {
        Scripted {
            seen: Vec::new(),
            finished: false,
        }
    }

    #[test]
    fn drains_queue_before_exiting() {
        let session = Session::new("t", IDENTITY_ROW_MAJOR);
        let (mut tx, rx) = relay::bounded(8);
        for tag in [0, 0, 0] {
            tx.push(tagged(tag)).unwrap();
        }
        // Not live: one drain pass, then exit.
        let status = StreamStatus::new();
        let report = run_consumer(rx, scripted(), session, status.clone());
        assert_eq!(report.frames_processed, 3);
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.state, StreamState::Stopped);
        assert_eq!(status.get(), StreamState::Stopped);
        assert!(tx.is_closed());
    }

    #[test]
    fn bad_frame_is_skipped() {
        let session = Session::new("t", IDENTITY_ROW_MAJOR);
        let (mut tx, rx) = relay::bounded(8);
        for tag in [0, 1, 0] {
            tx.push(tagged(tag)).unwrap();
        }
        let report = run_consumer(rx, scripted(), session, StreamStatus::new());
        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.frames_failed, 1);
        assert_eq!(report.state, StreamState::Stopped);
    }

    #[test]
    fn persistent_failures_fault_the_stream() {
        let session = Session::new("t", IDENTITY_ROW_MAJOR);
        let (mut tx, rx) = relay::bounded(32);
        for _ in 0..MAX_CONSECUTIVE_FAULTS + 4 {
            tx.push(tagged(1)).unwrap();
        }
        let report = run_consumer(rx, scripted(), session, StreamStatus::new());
        assert_eq!(report.frames_failed, MAX_CONSECUTIVE_FAULTS as u64);
        assert_eq!(report.state, StreamState::Faulted);
        assert!(tx.is_closed());
    }

    #[test]
    fn panic_is_contained() {
        let session = Session::new("t", IDENTITY_ROW_MAJOR);
        let (mut tx, rx) = relay::bounded(8);
        for tag in [0, 2, 0] {
            tx.push(tagged(tag)).unwrap();
        }
        let handle = spawn_consumer(rx, scripted(), session, StreamStatus::new()).unwrap();
        assert_eq!(handle.thread().name(), Some("skelcap-test"));
        let report = handle.join().unwrap();
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.state, StreamState::Faulted);
    }

    #[test]
    fn live_consumer_waits_for_frames() {
        let session = Session::new("t", IDENTITY_ROW_MAJOR);
        session.set_live(true);
        let (mut tx, rx) = relay::bounded(8);
        let handle = spawn_consumer(rx, scripted(), session.clone(), StreamStatus::new()).unwrap();

        tx.push(tagged(0)).unwrap();
        while !tx.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        session.set_live(false);
        let report = handle.join().unwrap();
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.state, StreamState::Stopped);
    }

    #[test]
    fn point_cloud_comes_from_first_depth_frame_only() {
        use crate::cloud::Intrinsics;
        use crate::sink::PixelLayout;
        use skelcap_convert::{depth_mask_frame, pack_depth_and_mask};
        use skelcap_source::{FrameSize, BACKGROUND, FOREGROUND};

        let tmp = tempfile::tempdir().unwrap();
        let size = FrameSize::new(4, 4);
        let cloud_path = tmp.path().join("once.ply");
        let mut depth = DepthTranscoder::new(
            Reprojector::new(&Intrinsics::default(), size),
            cloud_path.clone(),
            Preview::new("Depth", PixelLayout::Packed, false),
            VideoSink::disabled("depth", tmp.path().join("once.depth")),
        );
        assert_eq!(depth.point_cloud(), &PointCloudDump::Pending);

        let mut empty = depth_mask_frame(size);
        pack_depth_and_mask(&[0; 16], &[BACKGROUND; 16], &mut empty).unwrap();
        let mut subject = depth_mask_frame(size);
        pack_depth_and_mask(&[1000; 16], &[FOREGROUND; 16], &mut subject).unwrap();

        depth.process(&empty).unwrap();
        depth.process(&subject).unwrap();

        let first = CloudOutcome::Written {
            path: cloud_path.clone(),
            points: 0,
        };
        assert_eq!(depth.point_cloud(), &PointCloudDump::Done(first.clone()));
        let ply = std::fs::read_to_string(&cloud_path).unwrap();
        assert!(ply.lines().any(|l| l == "element vertex 0"));
        assert_eq!(ply.lines().count(), 7);

        let mut report = StreamReport::new("depth");
        depth.report(&mut report);
        assert_eq!(report.point_cloud, Some(first));
        assert_eq!(report.frames_written, 0);
    }
}
