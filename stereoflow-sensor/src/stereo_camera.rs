//! Stereo camera component producing colored point clouds

use stereoflow_frontend::{DepthProjector, PointCloud};
use tracing::debug;

use crate::config::StereoCameraConfig;
use crate::error::SensorError;
use crate::source::{Frame, FrameSource};

/// Capabilities reported by [`StereoCamera::properties`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraProperties {
    pub supports_pcd: bool,
}

/// Two frame sources combined into a point-cloud camera
pub struct StereoCamera<L, R> {
    config: StereoCameraConfig,
    projector: DepthProjector,
    left: L,
    right: R,
}

impl<L: FrameSource, R: FrameSource> StereoCamera<L, R> {
    /// Validates `config` and wires up both sources
    pub fn new(config: StereoCameraConfig, left: L, right: R) -> Result<Self, SensorError> {
        config.validate()?;
        let projector = DepthProjector::new(config.stereo_config());
        Ok(Self {
            config,
            projector,
            left,
            right,
        })
    }

    pub fn config(&self) -> &StereoCameraConfig {
        &self.config
    }

    /// Acquire both frames concurrently and reconstruct
    ///
    /// Source errors are returned as is, left first.
    pub fn next_point_cloud(&self) -> Result<PointCloud, SensorError> {
        let (left, right) = rayon::join(|| self.left.next_frame(), || self.right.next_frame());
        let (left, right) = (left?, right?);

        let cloud = self.projector.reconstruct(&left.image, &right.image)?;
        debug!(
            left = self.left.name(),
            right = self.right.name(),
            points = cloud.len(),
            "point cloud"
        );
        Ok(cloud)
    }

    /// The left camera's frame
    pub fn image(&self) -> Result<Frame, SensorError> {
        self.left.next_frame()
    }

    pub fn properties(&self) -> CameraProperties {
        CameraProperties { supports_pcd: true }
    }
}
