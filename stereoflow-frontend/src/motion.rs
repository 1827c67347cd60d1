//! Velocity from tracked correspondences
//!
//! Averages pixel displacement and rotation about the frame center over all
//! tracked correspondences, then turns them into rates:
//!   linear  = mean(dx, dy) / dt / focal_length
//!   angular = mean(angle change about center) / dt
//! No weighting and no outlier rejection.

use std::f64::consts::{PI, TAU};

use nalgebra::{Point2, Vector3};
use tracing::debug;

use crate::color::{to_luma8, ColorImage};
use crate::error::FrontendError;
use crate::tracker::{Correspondence, FeatureTracker};

/// Linear and angular velocity for one pair of frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEstimate {
    /// Approximate linear velocity; Z is always 0
    pub linear: Vector3<f64>,
    /// Angular velocity (rad/s); only Z is populated
    pub angular: Vector3<f64>,
    /// Number of tracked correspondences behind the estimate
    pub tracked: usize,
}

impl MotionEstimate {
    /// No observable motion
    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
            tracked: 0,
        }
    }
}

/// Wrap an angle into `(-PI, PI]`
///
/// Adds or subtracts full turns until in range, so inputs already in range
/// come back unchanged.
pub fn normalize_angle(mut angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    while angle > PI {
        angle -= TAU;
    }
    while angle <= -PI {
        angle += TAU;
    }
    angle
}

/// Aggregates correspondences into a [`MotionEstimate`]
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    focal_length: f64,
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FOCAL_LENGTH)
    }
}

impl MotionEstimator {
    pub const DEFAULT_FOCAL_LENGTH: f64 = 30.0;

    /// `focal_length` in pixels; non-positive values fall back to 30
    pub fn new(focal_length: f64) -> Self {
        let focal_length = if focal_length > 0.0 {
            focal_length
        } else {
            Self::DEFAULT_FOCAL_LENGTH
        };
        Self { focal_length }
    }

    pub fn focal_length(&self) -> f64 {
        self.focal_length
    }

    /// Estimate velocity from correspondences observed `dt` seconds apart
    ///
    /// Lost correspondences are ignored. Zero tracked correspondences give a
    /// zero estimate, not an error.
    pub fn estimate(
        &self,
        correspondences: &[Correspondence],
        center: Point2<f64>,
        dt: f64,
    ) -> Result<MotionEstimate, FrontendError> {
        if dt <= 0.0 || dt.is_nan() {
            return Err(FrontendError::InvalidDuration { seconds: dt });
        }

        let mut sum_dx = 0.0;
        let mut sum_dy = 0.0;
        let mut sum_angle = 0.0;
        let mut tracked = 0usize;

        for c in correspondences.iter().filter(|c| c.tracked) {
            let (dx, dy) = c.displacement();

            let prev_angle = (c.previous.y - center.y).atan2(c.previous.x - center.x);
            let next_angle = (c.current.y - center.y).atan2(c.current.x - center.x);

            sum_dx += dx;
            sum_dy += dy;
            sum_angle += normalize_angle(next_angle - prev_angle);
            tracked += 1;
        }

        if tracked == 0 {
            return Ok(MotionEstimate::zero());
        }

        let n = tracked as f64;
        let linear_x = sum_dx / n / dt / self.focal_length;
        let linear_y = sum_dy / n / dt / self.focal_length;
        let angular_z = sum_angle / n / dt;

        Ok(MotionEstimate {
            linear: Vector3::new(linear_x, linear_y, 0.0),
            angular: Vector3::new(0.0, 0.0, angular_z),
            tracked,
        })
    }
}

/// Feature tracking followed by motion estimation
#[derive(Debug, Clone, Default)]
pub struct FlowEstimator {
    tracker: FeatureTracker,
    motion: MotionEstimator,
}

impl FlowEstimator {
    pub fn new(tracker: FeatureTracker, motion: MotionEstimator) -> Self {
        Self { tracker, motion }
    }

    /// Velocity between `prev` and `current`, captured `dt` seconds apart
    ///
    /// `dt` and the frame sizes are checked before any image work. The
    /// rotation pivot is the center of `prev`.
    pub fn compute<P, C>(&self, prev: &P, current: &C, dt: f64) -> Result<MotionEstimate, FrontendError>
    where
        P: ColorImage + ?Sized,
        C: ColorImage + ?Sized,
    {
        if dt <= 0.0 || dt.is_nan() {
            return Err(FrontendError::InvalidDuration { seconds: dt });
        }
        if prev.size() != current.size() {
            return Err(FrontendError::dimension_mismatch(prev.size(), current.size()));
        }

        let prev_gray = to_luma8(prev);
        let current_gray = to_luma8(current);

        let correspondences = self.tracker.track(&prev_gray, &current_gray);
        debug!(count = correspondences.len(), "correspondences");

        let (width, height) = prev_gray.dimensions();
        let center = Point2::new(f64::from(width) / 2.0, f64::from(height) / 2.0);
        self.motion.estimate(&correspondences, center, dt)
    }
}

/// Velocity between two frames with the default tracker
pub fn compute_flow<P, C>(
    prev: &P,
    current: &C,
    dt: f64,
    focal_length: f64,
) -> Result<MotionEstimate, FrontendError>
where
    P: ColorImage + ?Sized,
    C: ColorImage + ?Sized,
{
    FlowEstimator::new(FeatureTracker::new(), MotionEstimator::new(focal_length))
        .compute(prev, current, dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::RgbImage;

    fn moved(points: &[(f64, f64)], f: impl Fn(f64, f64) -> (f64, f64)) -> Vec<Correspondence> {
        points
            .iter()
            .map(|&(x, y)| {
                let (nx, ny) = f(x, y);
                Correspondence::tracked(Point2::new(x, y), Point2::new(nx, ny))
            })
            .collect()
    }

    const POINTS: [(f64, f64); 4] = [(70.0, 50.0), (50.0, 70.0), (30.0, 50.0), (50.0, 30.0)];

    #[test]
    fn test_pure_translation() {
        let estimator = MotionEstimator::new(1.0);
        let correspondences = moved(&POINTS, |x, y| (x + 2.0, y));
        let estimate = estimator
            .estimate(&correspondences, Point2::new(50.0, 50.0), 1.0)
            .unwrap();

        assert_abs_diff_eq!(estimate.linear.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(estimate.linear.y, 0.0, epsilon = 1e-12);
        assert_eq!(estimate.linear.z, 0.0);
        assert_eq!(estimate.tracked, 4);
        // symmetric set: rotations of the four points cancel
        assert_abs_diff_eq!(estimate.angular.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_translation_scales_by_dt_and_focal_length() {
        let estimator = MotionEstimator::new(30.0);
        let correspondences = moved(&POINTS, |x, y| (x + 6.0, y - 3.0));
        let estimate = estimator
            .estimate(&correspondences, Point2::new(50.0, 50.0), 0.5)
            .unwrap();

        assert_abs_diff_eq!(estimate.linear.x, 6.0 / 0.5 / 30.0, epsilon = 1e-12);
        assert_abs_diff_eq!(estimate.linear.y, -3.0 / 0.5 / 30.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pure_rotation() {
        let (cx, cy, theta) = (50.0, 50.0, 0.1f64);
        let rotate = |x: f64, y: f64| {
            let (dx, dy) = (x - cx, y - cy);
            (
                cx + dx * theta.cos() - dy * theta.sin(),
                cy + dx * theta.sin() + dy * theta.cos(),
            )
        };
        let estimate = MotionEstimator::new(1.0)
            .estimate(&moved(&POINTS, rotate), Point2::new(cx, cy), 2.0)
            .unwrap();

        assert_abs_diff_eq!(estimate.linear.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.linear.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.angular.z, theta / 2.0, epsilon = 1e-9);
        assert_eq!(estimate.angular.x, 0.0);
        assert_eq!(estimate.angular.y, 0.0);
    }

    #[test]
    fn test_rotation_across_branch_cut() {
        // point just above the negative x axis moves just below it
        let c = Correspondence::tracked(Point2::new(-10.0, 0.1), Point2::new(-10.0, -0.1));
        let estimate = MotionEstimator::new(1.0)
            .estimate(&[c], Point2::origin(), 1.0)
            .unwrap();
        assert!(estimate.angular.z > 0.0 && estimate.angular.z < 0.1);
    }

    #[test]
    fn test_invalid_duration() {
        let estimator = MotionEstimator::default();
        let correspondences = moved(&POINTS, |x, y| (x + 1.0, y));
        for dt in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                estimator.estimate(&correspondences, Point2::origin(), dt),
                Err(FrontendError::InvalidDuration { .. })
            ));
            assert!(matches!(
                estimator.estimate(&[], Point2::origin(), dt),
                Err(FrontendError::InvalidDuration { .. })
            ));
        }
    }

    #[test]
    fn test_no_correspondences_is_zero() {
        let estimate = MotionEstimator::default()
            .estimate(&[], Point2::new(10.0, 10.0), 1.0)
            .unwrap();
        assert_eq!(estimate, MotionEstimate::zero());
    }

    #[test]
    fn test_lost_correspondences_are_ignored() {
        let mut correspondences = moved(&POINTS, |x, y| (x + 2.0, y));
        correspondences.push(Correspondence {
            previous: Point2::new(10.0, 10.0),
            current: Point2::new(90.0, 90.0),
            tracked: false,
        });
        let estimate = MotionEstimator::new(1.0)
            .estimate(&correspondences, Point2::new(50.0, 50.0), 1.0)
            .unwrap();
        assert_eq!(estimate.tracked, 4);
        assert_abs_diff_eq!(estimate.linear.x, 2.0, epsilon = 1e-12);

        let all_lost: Vec<_> = correspondences
            .iter()
            .map(|c| Correspondence { tracked: false, ..*c })
            .collect();
        let estimate = MotionEstimator::new(1.0)
            .estimate(&all_lost, Point2::new(50.0, 50.0), 1.0)
            .unwrap();
        assert_eq!(estimate, MotionEstimate::zero());
    }

    #[test]
    fn test_default_focal_length() {
        assert_eq!(MotionEstimator::new(0.0).focal_length(), 30.0);
        assert_eq!(MotionEstimator::new(-4.0).focal_length(), 30.0);
        assert_eq!(MotionEstimator::new(12.5).focal_length(), 12.5);
    }

    #[test]
    fn test_normalize_angle() {
        for a in [0.0, 1.0, -1.0, PI, -PI + 1e-9, 3.0] {
            assert_eq!(normalize_angle(a), a);
        }
        let eps = 0.01;
        assert_abs_diff_eq!(normalize_angle(PI + eps), -PI + eps, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(5.0 * TAU + 0.5), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(normalize_angle(-3.0 * TAU - 0.5), -0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_compute_flow_on_blank_frames() {
        let prev = RgbImage::new(64, 64);
        let current = RgbImage::new(64, 64);
        let estimate = compute_flow(&prev, &current, 1.0, 30.0).unwrap();
        assert_eq!(estimate, MotionEstimate::zero());

        assert!(matches!(
            compute_flow(&prev, &current, 0.0, 30.0),
            Err(FrontendError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_frames_of_different_size() {
        let prev = RgbImage::new(128, 128);
        let current = RgbImage::new(40, 40);
        assert_eq!(
            compute_flow(&prev, &current, 1.0, 30.0),
            Err(FrontendError::dimension_mismatch((128, 128), (40, 40)))
        );
    }
}
