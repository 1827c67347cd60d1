//! Stereo pair to colored point cloud
//!
//! Uses the pinhole model with the principal point approximated by the image
//! center:
//!   z = baseline * f / d
//!   x = (u - cx) * z / f
//!   y = (v - cy) * z / f

use nalgebra::Point3;
use tracing::debug;

use crate::color::ColorImage;
use crate::disparity::{DisparityConfig, DisparityMatcher};
use crate::error::FrontendError;
use crate::point_cloud::{CloudPoint, PointCloud};

/// Parameters for stereo reconstruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoConfig {
    /// Distance between the two camera centers (meters)
    pub baseline: f64,
    /// Focal length (pixels)
    pub focal_length: f64,
    /// Disparity search parameters
    pub disparity: DisparityConfig,
}

impl StereoConfig {
    pub fn new(baseline: f64, focal_length: f64) -> Self {
        Self {
            baseline,
            focal_length,
            disparity: DisparityConfig::default(),
        }
    }
}

/// Converts accepted disparities into 3D points
#[derive(Debug, Clone)]
pub struct DepthProjector {
    baseline: f64,
    focal_length: f64,
    matcher: DisparityMatcher,
}

impl DepthProjector {
    /// Create a projector
    ///
    /// `baseline` and `focal_length` are expected to be positive; that is
    /// checked by configuration validation before this point.
    pub fn new(config: StereoConfig) -> Self {
        Self {
            baseline: config.baseline,
            focal_length: config.focal_length,
            matcher: DisparityMatcher::new(config.disparity),
        }
    }

    pub fn matcher(&self) -> &DisparityMatcher {
        &self.matcher
    }

    /// Depth for a disparity in pixels
    pub fn depth(&self, disparity: f64) -> f64 {
        (self.baseline * self.focal_length) / disparity
    }

    /// Back-project pixel `(x, y)` with disparity `disparity` in an image of
    /// `width` x `height`
    pub fn project(&self, disparity: f64, x: u32, y: u32, width: u32, height: u32) -> Point3<f64> {
        let cx = f64::from(width) / 2.0;
        let cy = f64::from(height) / 2.0;
        let z = self.depth(disparity);
        Point3::new(
            (f64::from(x) - cx) * z / self.focal_length,
            (f64::from(y) - cy) * z / self.focal_length,
            z,
        )
    }

    /// Reconstruct a point cloud from a rectified pair
    ///
    /// Fails with [`FrontendError::DimensionMismatch`] before any matching if
    /// the images differ in size. Matches are inserted in row-major order, so the
    /// result equals a sequential scan.
    pub fn reconstruct<L, R>(&self, left: &L, right: &R) -> Result<PointCloud, FrontendError>
    where
        L: ColorImage + ?Sized,
        R: ColorImage + ?Sized,
    {
        let (width, height) = left.size();
        if left.size() != right.size() {
            return Err(FrontendError::dimension_mismatch(left.size(), right.size()));
        }

        let points = self.matcher.map_matches(left, right, |m| CloudPoint {
            position: self.project(f64::from(m.disparity), m.x, m.y, width, height),
            color: left.rgb8(m.x, m.y),
        });

        let mut cloud = PointCloud::new();
        cloud.extend(points);

        debug!(width, height, points = cloud.len(), "stereo reconstruction finished");
        Ok(cloud)
    }
}
