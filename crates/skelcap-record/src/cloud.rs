//! Masked depth → camera-space point cloud.
//!
//! Pipeline for one packed depth+mask frame:
//!   1. ray table: K⁻¹ · (i, j, 0, 1) for every pixel, z taken as unit depth
//!   2. mirror the frame left-to-right (sensor convention)
//!   3. split mask / depth, depth mm → m
//!   4. keep foreground pixels with a return, scale ray by depth, apply the
//!      extrinsic, homogeneous divide
//!   5. ASCII PLY, points in row-major scan order of the mirrored frame

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use skelcap_convert::{depth_meters, flip_horizontal, unpack_depth_and_mask, ConvertError};
use skelcap_source::{FrameSize, FOREGROUND};

use crate::{io_error, Result};

/// Row-major 4×4 matrix.
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

pub fn mat4_from_row_major(m: &[f32; 16]) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for (r, row) in out.iter_mut().enumerate() {
        row.copy_from_slice(&m[r * 4..r * 4 + 4]);
    }
    out
}

pub fn transform(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (r, row) in m.iter().enumerate() {
        out[r] = row[0] * v[0] + row[1] * v[1] + row[2] * v[2] + row[3] * v[3];
    }
    out
}

/// Pinhole calibration of the depth camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for Intrinsics {
    /// Factory calibration of the 512×424 time-of-flight sensor.
    fn default() -> Self {
        Self {
            fx: 365.456,
            fy: 365.456,
            cx: 254.878,
            cy: 205.395,
        }
    }
}

impl Intrinsics {
    /// Projection with the principal point in the translation column.
    pub fn matrix(&self) -> Mat4 {
        [
            [self.fx, 0.0, 0.0, self.cx],
            [0.0, self.fy, 0.0, self.cy],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Closed-form inverse of [`matrix`](Self::matrix).
    pub fn inverse(&self) -> Mat4 {
        [
            [1.0 / self.fx, 0.0, 0.0, -self.cx / self.fx],
            [0.0, 1.0 / self.fy, 0.0, -self.cy / self.fy],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

pub struct Reprojector {
    size: FrameSize,
    rays: Vec<[f32; 3]>,
    extrinsic: Mat4,
}

impl Reprojector {
    pub fn new(intrinsics: &Intrinsics, size: FrameSize) -> Self {
        let inv = intrinsics.inverse();
        let mut rays = Vec::with_capacity(size.pixels());
        for j in 0..size.height {
            for i in 0..size.width {
                let p = transform(&inv, [i as f32, j as f32, 0.0, 1.0]);
                rays.push([p[0] / p[3], p[1] / p[3], 1.0]);
            }
        }
        Self {
            size,
            rays,
            extrinsic: IDENTITY,
        }
    }

    pub fn with_extrinsic(mut self, extrinsic: Mat4) -> Self {
        self.extrinsic = extrinsic;
        self
    }

    /// Camera-space ray through pixel `(i, j)` at one meter of depth.
    pub fn ray(&self, i: usize, j: usize) -> [f32; 3] {
        self.rays[j * self.size.width as usize + i]
    }

    pub fn reproject(&self, frame: ArrayView3<'_, u8>) -> Result<Vec<Point>> {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        if frame.dim() != (h, w, 3) {
            return Err(ConvertError::Shape {
                expected: (h, w, 3),
                got: frame.dim(),
            }
            .into());
        }

        let (mask, depth) = unpack_depth_and_mask(flip_horizontal(frame));
        let mut points = Vec::new();
        for ((j, i), &m) in mask.indexed_iter() {
            if m != FOREGROUND {
                continue;
            }
            let d = depth[[j, i]];
            if d == 0 {
                continue;
            }
            let d = depth_meters(d);
            let ray = self.ray(i, j);
            let p = transform(&self.extrinsic, [ray[0] * d, ray[1] * d, ray[2] * d, 1.0]);
            if p[3] == 0.0 {
                continue;
            }
            points.push(Point {
                x: p[0] / p[3],
                y: p[1] / p[3],
                z: p[2] / p[3],
            });
        }
        Ok(points)
    }
}

/// ASCII PLY with x/y/z float vertices.
pub fn write_ply<W: Write>(mut out: W, points: &[Point]) -> io::Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", points.len())?;
    writeln!(out, "property float x")?;
    writeln!(out, "property float y")?;
    writeln!(out, "property float z")?;
    writeln!(out, "end_header")?;
    for p in points {
        writeln!(out, "{} {} {}", p.x, p.y, p.z)?;
    }
    Ok(())
}

pub fn write_ply_file(path: &Path, points: &[Point]) -> Result<usize> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut out = BufWriter::new(file);
    write_ply(&mut out, points).map_err(io_error(path))?;
    out.flush().map_err(io_error(path))?;
    Ok(points.len())
}
