//! Shared recording aggregate.
//!
//! Field ownership is split by writer:
//!   * skeleton path (producer thread): samples and start/end times
//!   * controlling thread: the liveness flag
//!   * per-stream timestamp logs live in the producer's rate gates and are
//!     only merged in when the session is finished
//!
//! [`Recording`] is the plain, serializable snapshot written as the session dump.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skelcap_source::{SkeletonSample, Timestamp};

use crate::{io_error, Result};

/// Microseconds since the Unix epoch.
pub fn wall_clock_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[derive(Debug, Default)]
struct SkeletonLog {
    start_time: u64,
    end_time: u64,
    samples: Vec<SkeletonSample>,
}

/// Live session handle, shared between the producer, the consumers and the
/// controlling thread through an `Arc`.
#[derive(Debug)]
pub struct Session {
    id: String,
    camera: [f32; 16],
    live: AtomicBool,
    skeletons: Mutex<SkeletonLog>,
}

impl Session {
    pub fn new(id: impl Into<String>, camera: [f32; 16]) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            camera,
            live: AtomicBool::new(false),
            skeletons: Mutex::new(SkeletonLog::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn camera(&self) -> [f32; 16] {
        self.camera
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    /// Append a sample stamped with the current wall clock.
    pub fn record_skeleton(&self, sample: &SkeletonSample) {
        self.record_skeleton_at(sample, wall_clock_micros());
    }

    /// Append a sample that arrived at `now_us`.  The first sample fixes the
    /// start time; every sample moves the end time.
    pub fn record_skeleton_at(&self, sample: &SkeletonSample, now_us: u64) {
        let mut log = self.skeletons.lock();
        if log.samples.is_empty() {
            log.start_time = now_us;
        }
        log.samples.push(sample.clone());
        log.end_time = now_us;
    }

    pub fn start_time(&self) -> u64 {
        self.skeletons.lock().start_time
    }

    pub fn end_time(&self) -> u64 {
        self.skeletons.lock().end_time
    }

    pub fn skeleton_count(&self) -> usize {
        self.skeletons.lock().samples.len()
    }

    /// Copy of everything recorded so far, joined with the stream timestamp logs.
    pub fn snapshot(
        &self,
        color_timestamps: Vec<Timestamp>,
        depth_timestamps: Vec<Timestamp>,
    ) -> Recording {
        let log = self.skeletons.lock();
        Recording {
            id: self.id.clone(),
            camera: self.camera,
            start_time: log.start_time,
            end_time: log.end_time,
            skeletons: log.samples.clone(),
            color_timestamps,
            depth_timestamps,
            is_live: self.is_live(),
            is_loaded: false,
        }
    }
}

/// Session dump: skeleton stream plus accepted color/depth frame timestamps.
/// The frames themselves live in the video files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    /// 4×4 row-major camera transform.
    pub camera: [f32; 16],
    /// Wall clock at the first skeleton sample, microseconds.
    pub start_time: u64,
    /// Wall clock at the latest skeleton sample, microseconds.
    pub end_time: u64,
    pub skeletons: Vec<SkeletonSample>,
    pub color_timestamps: Vec<Timestamp>,
    pub depth_timestamps: Vec<Timestamp>,

    #[serde(skip)]
    pub is_live: bool,
    #[serde(skip)]
    pub is_loaded: bool,
}

impl Recording {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(io_error(path))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n").map_err(io_error(path))?;
        out.flush().map_err(io_error(path))?;
        info!(
            "Saved session {} ({} skeletons) to {:?}",
            self.id,
            self.skeletons.len(),
            path
        );
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(io_error(path))?;
        let mut rec: Recording = serde_json::from_reader(BufReader::new(file))?;
        rec.is_loaded = true;
        rec.is_live = false;
        Ok(rec)
    }

    pub fn duration_micros(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}
