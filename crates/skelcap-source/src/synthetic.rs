//! Deterministic stand-in sensor.
//!
//! Produces a drifting luma gradient on the color stream, a foreground disc
//! on the depth+mask stream and one tracked body, at a fixed source rate.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::skeleton::{JointType, TrackingState, BACKGROUND, FOREGROUND};
use crate::{
    FrameSize, FrameSource, Result, SkeletonSample, SourceError, SourceEvent, Timestamp,
    COLOR_BYTES_PER_PIXEL, COLOR_FRAME, DEPTH_FRAME, TICKS_PER_SECOND,
};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Rate at which the fake sensor fires its callbacks.
    pub fps: f64,
    pub color: FrameSize,
    pub depth: FrameSize,
    /// Stop after this many ticks; `None` runs until dropped.
    pub ticks: Option<u64>,
    /// Sleep between ticks so callbacks arrive at wall-clock pace.
    pub realtime: bool,
    pub seed: u64,
    /// Distance of the foreground disc, millimeters.
    pub subject_depth_mm: u16,
    /// Distance of the background wall, millimeters.
    pub background_depth_mm: u16,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            color: COLOR_FRAME,
            depth: DEPTH_FRAME,
            ticks: None,
            realtime: false,
            seed: 0x5eed,
            subject_depth_mm: 1800,
            background_depth_mm: 4000,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    tick: u64,
    rng: StdRng,
    color: Vec<u8>,
    depth: Vec<u16>,
    mask: Vec<u8>,
    body: SkeletonSample,
    started: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(SourceError::InvalidConfig(format!("source fps {}", config.fps)));
        }
        if config.color.is_empty() || config.depth.is_empty() {
            return Err(SourceError::InvalidConfig("empty frame size".into()));
        }
        if config.color.width % 2 != 0 {
            return Err(SourceError::InvalidConfig(format!(
                "YUY2 width must be even, got {}",
                config.color.width
            )));
        }

        debug!(
            "Synthetic sensor: {}x{} color, {}x{} depth at {} fps",
            config.color.width, config.color.height, config.depth.width, config.depth.height, config.fps
        );
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            color: vec![0; config.color.pixels() * COLOR_BYTES_PER_PIXEL],
            depth: vec![0; config.depth.pixels()],
            mask: vec![BACKGROUND; config.depth.pixels()],
            body: SkeletonSample::new(1, 0),
            tick: 0,
            rng,
            started: None,
            config,
        })
    }

    pub fn ticks_emitted(&self) -> u64 {
        self.tick
    }

    fn timestamp(&self) -> Timestamp {
        (self.tick as f64 * TICKS_PER_SECOND as f64 / self.config.fps) as Timestamp
    }

    fn fill_color(&mut self) {
        let w = self.config.color.width as usize;
        let shift = self.tick as usize;
        for (row, line) in self.color.chunks_exact_mut(w * COLOR_BYTES_PER_PIXEL).enumerate() {
            // Y0 U Y1 V
            for (pair, px) in line.chunks_exact_mut(4).enumerate() {
                let x = pair * 2;
                px[0] = ((x + shift) % 256) as u8;
                px[1] = (row % 256) as u8;
                px[2] = ((x + 1 + shift) % 256) as u8;
                px[3] = 128;
            }
        }
    }

    fn fill_depth(&mut self) {
        let FrameSize { width, height } = self.config.depth;
        let (w, h) = (width as f32, height as f32);
        let radius = w.min(h) * 0.25;
        let cx = w * 0.5 + (self.tick as f32 * 0.1).sin() * radius * 0.5;
        let cy = h * 0.5;

        for j in 0..height as usize {
            for i in 0..width as usize {
                let idx = j * width as usize + i;
                let (dx, dy) = (i as f32 - cx, j as f32 - cy);
                if dx * dx + dy * dy <= radius * radius {
                    self.mask[idx] = FOREGROUND;
                    self.depth[idx] = self.config.subject_depth_mm;
                } else {
                    self.mask[idx] = BACKGROUND;
                    self.depth[idx] = self.config.background_depth_mm;
                }
            }
        }
    }

    fn update_body(&mut self, timestamp: Timestamp) {
        self.body.timestamp = timestamp;
        for joint in JointType::ALL {
            let base = joint.index() as f32 * 0.05;
            let jitter: f32 = self.rng.gen_range(-0.005..0.005);
            self.body.set_joint(
                joint,
                [base - 0.6 + jitter, 0.9 - base + jitter, 1.8 + jitter],
                TrackingState::Tracked,
            );
            self.body.joint_orientations[joint.index()] = [0.0, 0.0, 0.0, 1.0];
        }
        let lean: f32 = self.rng.gen_range(-0.1..0.1);
        self.body.set_lean(lean, 0.0, TrackingState::Tracked);
    }

    fn pace(&mut self) {
        if !self.config.realtime {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_secs_f64(self.tick as f64 / self.config.fps);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn poll(&mut self, emit: &mut dyn FnMut(SourceEvent<'_>)) -> Result<bool> {
        if self.config.ticks.is_some_and(|limit| self.tick >= limit) {
            debug!("Synthetic sensor exhausted after {} ticks", self.tick);
            return Ok(false);
        }
        self.pace();

        let timestamp = self.timestamp();
        self.fill_color();
        self.fill_depth();
        self.update_body(timestamp);

        emit(SourceEvent::Color {
            timestamp,
            data: &self.color,
        });
        emit(SourceEvent::DepthAndMask {
            timestamp,
            depth: &self.depth,
            mask: &self.mask,
        });
        emit(SourceEvent::Skeleton(&self.body));

        self.tick += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            color: FrameSize::new(8, 4),
            depth: FrameSize::new(8, 8),
            ticks: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn emits_three_streams_per_tick() {
        let mut src = SyntheticSource::new(small()).unwrap();
        let mut kinds = Vec::new();
        while src
            .poll(&mut |ev| {
                kinds.push(match ev {
                    SourceEvent::Skeleton(_) => 's',
                    SourceEvent::Color { data, .. } => {
                        assert_eq!(data.len(), 8 * 4 * 2);
                        'c'
                    }
                    SourceEvent::DepthAndMask { depth, mask, .. } => {
                        assert_eq!(depth.len(), mask.len());
                        'd'
                    }
                })
            })
            .unwrap()
        {}
        assert_eq!(kinds.iter().collect::<String>(), "cdscdscds");
        assert_eq!(src.ticks_emitted(), 3);
    }

    #[test]
    fn timestamps_follow_source_rate() {
        let mut src = SyntheticSource::new(small()).unwrap();
        let mut stamps = Vec::new();
        while src
            .poll(&mut |ev| {
                if let SourceEvent::Color { timestamp, .. } = ev {
                    stamps.push(timestamp);
                }
            })
            .unwrap()
        {}
        assert_eq!(stamps, vec![0, 333_333, 666_666]);
    }

    #[test]
    fn disc_is_foreground() {
        let mut src = SyntheticSource::new(small()).unwrap();
        let mut fg = 0;
        src.poll(&mut |ev| {
            if let SourceEvent::DepthAndMask { mask, depth, .. } = ev {
                for (m, d) in mask.iter().zip(depth) {
                    if *m == FOREGROUND {
                        fg += 1;
                        assert_eq!(*d, 1800);
                    }
                }
            }
        })
        .unwrap();
        assert!(fg > 0);
    }

    #[test]
    fn rejects_odd_color_width() {
        let cfg = SyntheticConfig {
            color: FrameSize::new(7, 4),
            ..small()
        };
        assert!(SyntheticSource::new(cfg).is_err());
    }
}
