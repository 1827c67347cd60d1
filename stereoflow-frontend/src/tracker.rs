//! Sparse feature tracking between two frames
//!
//! Combines:
//! - Shi-Tomasi corner detection on the previous frame
//! - Pyramidal Lucas-Kanade to locate each corner in the current frame

use image::GrayImage;
use nalgebra::Point2;
use tracing::debug;

use crate::corners::CornerDetector;
use crate::lk_tracker::{LKConfig, LKTracker};

/// A corner in the previous frame and where it was found in the current one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Position in the previous frame (pixels)
    pub previous: Point2<f64>,
    /// Position in the current frame; equals `previous` when lost
    pub current: Point2<f64>,
    /// Whether the tracker located the corner
    pub tracked: bool,
}

impl Correspondence {
    pub fn tracked(previous: Point2<f64>, current: Point2<f64>) -> Self {
        Self {
            previous,
            current,
            tracked: true,
        }
    }

    /// Displacement `current - previous` in pixels
    pub fn displacement(&self) -> (f64, f64) {
        (
            self.current.x - self.previous.x,
            self.current.y - self.previous.y,
        )
    }
}

/// Configuration for the feature tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum number of corners detected in the previous frame
    pub max_corners: usize,
    /// Fraction of the strongest corner response a corner must reach
    pub quality_level: f32,
    /// Minimum distance between detected corners (pixels)
    pub min_distance: f32,
    /// Lucas-Kanade configuration
    pub lk_config: LKConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 10.0,
            lk_config: LKConfig::default(),
        }
    }
}

/// Detects corners in one frame and follows them into the next
#[derive(Debug, Clone)]
pub struct FeatureTracker {
    /// Corner detector
    detector: CornerDetector,
    /// LK optical flow tracker
    lk_tracker: LKTracker,
}

impl FeatureTracker {
    /// Create a new tracker with default configuration
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a new tracker with custom configuration
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            detector: CornerDetector::new(
                config.max_corners,
                config.quality_level,
                config.min_distance,
            ),
            lk_tracker: LKTracker::with_config(config.lk_config),
        }
    }

    /// One correspondence per corner detected in `prev`, tracked or lost
    ///
    /// An empty result means no corners were found: nothing to observe,
    /// which is not an error.
    pub fn track(&self, prev: &GrayImage, current: &GrayImage) -> Vec<Correspondence> {
        let corners = self.detector.detect(prev);
        if corners.is_empty() {
            debug!("no corners in previous frame");
            return Vec::new();
        }

        let results = self.lk_tracker.track_corners(prev, current, &corners);
        let correspondences: Vec<Correspondence> = corners
            .iter()
            .zip(&results)
            .map(|(corner, result)| Correspondence {
                previous: Point2::new(f64::from(corner.x), f64::from(corner.y)),
                current: Point2::new(
                    f64::from(result.position.0),
                    f64::from(result.position.1),
                ),
                tracked: result.success,
            })
            .collect();

        debug!(
            corners = corners.len(),
            tracked = correspondences.iter().filter(|c| c.tracked).count(),
            "feature tracking finished"
        );

        correspondences
    }
}

impl Default for FeatureTracker {
    fn default() -> Self {
        Self::new()
    }
}
