//! Stereoflow frontend: dense stereo reconstruction and sparse optical flow
//!
//! This crate provides single-pixel disparity search with pinhole
//! back-projection into colored point clouds, and Shi-Tomasi corners with
//! pyramidal Lucas-Kanade tracking for frame-to-frame velocity estimates.

pub mod color;
pub mod corners;
pub mod depth;
pub mod disparity;
pub mod error;
pub mod lk_tracker;
pub mod motion;
pub mod point_cloud;
pub mod tracker;

pub use color::{to_luma8, ColorImage, Rgb16Image, Rgba16Image};
pub use corners::{Corner, CornerDetector};
pub use depth::{DepthProjector, StereoConfig};
pub use disparity::{Disparity, DisparityConfig, DisparityMatcher};
pub use error::FrontendError;
pub use lk_tracker::{LKConfig, LKTracker, TrackResult};
pub use motion::{compute_flow, normalize_angle, FlowEstimator, MotionEstimate, MotionEstimator};
pub use point_cloud::{CloudPoint, PointCloud};
pub use tracker::{Correspondence, FeatureTracker, TrackerConfig};

/// Reconstruct a point cloud from a rectified stereo pair
pub fn stereo_to_point_cloud<L, R>(
    left: &L,
    right: &R,
    config: StereoConfig,
) -> Result<PointCloud, FrontendError>
where
    L: ColorImage + ?Sized,
    R: ColorImage + ?Sized,
{
    DepthProjector::new(config).reconstruct(left, right)
}
