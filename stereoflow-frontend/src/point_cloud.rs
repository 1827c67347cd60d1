//! Colored point cloud keyed by quantized position
//!
//! Positions are snapped to a 1 µm grid to form the map key, so two points
//! closer than that are treated as the same coordinate and the later insert
//! replaces the earlier one. Colors are never averaged.

use std::collections::HashMap;
use std::io::{self, Write};

use image::Rgb;
use nalgebra::Point3;

/// Grid spacing used to build map keys (meters)
const KEY_QUANTUM: f64 = 1e-6;

/// A single reconstructed point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    /// Position in the left camera frame (meters)
    pub position: Point3<f64>,
    /// Color sampled from the reference image
    pub color: Rgb<u8>,
}

/// Mapping from 3D coordinate to color
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    points: HashMap<[i64; 3], CloudPoint>,
}

fn key_of(position: &Point3<f64>) -> [i64; 3] {
    [
        (position.x / KEY_QUANTUM).round() as i64,
        (position.y / KEY_QUANTUM).round() as i64,
        (position.z / KEY_QUANTUM).round() as i64,
    ]
}

impl PointCloud {
    /// Create an empty point cloud
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct coordinates
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Insert a point, returning the point it replaced at the same coordinate
    pub fn insert(&mut self, position: Point3<f64>, color: Rgb<u8>) -> Option<CloudPoint> {
        self.points
            .insert(key_of(&position), CloudPoint { position, color })
    }

    /// Look up the point stored at `position`
    pub fn get(&self, position: &Point3<f64>) -> Option<&CloudPoint> {
        self.points.get(&key_of(position))
    }

    /// Iterate over all points in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &CloudPoint> {
        self.points.values()
    }

    /// Write the cloud as an ASCII PCD v0.7 file
    ///
    /// Colors are packed into a single `U` field as `0x00RRGGBB`. Points are
    /// written in key order so output is reproducible.
    pub fn write_pcd<W: Write>(&self, mut out: W) -> io::Result<()> {
        let mut keys: Vec<&[i64; 3]> = self.points.keys().collect();
        keys.sort_unstable();

        writeln!(out, "# .PCD v0.7 - Point Cloud Data file format")?;
        writeln!(out, "VERSION 0.7")?;
        writeln!(out, "FIELDS x y z rgb")?;
        writeln!(out, "SIZE 4 4 4 4")?;
        writeln!(out, "TYPE F F F U")?;
        writeln!(out, "COUNT 1 1 1 1")?;
        writeln!(out, "WIDTH {}", keys.len())?;
        writeln!(out, "HEIGHT 1")?;
        writeln!(out, "VIEWPOINT 0 0 0 1 0 0 0")?;
        writeln!(out, "POINTS {}", keys.len())?;
        writeln!(out, "DATA ascii")?;

        for key in keys {
            let point = &self.points[key];
            let Rgb([r, g, b]) = point.color;
            let packed = (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b);
            writeln!(
                out,
                "{:.6} {:.6} {:.6} {}",
                point.position.x, point.position.y, point.position.z, packed
            )?;
        }

        Ok(())
    }
}

impl Extend<CloudPoint> for PointCloud {
    fn extend<T: IntoIterator<Item = CloudPoint>>(&mut self, iter: T) {
        for point in iter {
            self.insert(point.position, point.color);
        }
    }
}
