//! Disparity search for rectified image pairs
//!
//! For each sampled pixel of the reference (left) image, walks the same row of
//! the target (right) image from the pixel's own column leftwards and keeps the
//! column with the lowest matching cost:
//! - Epipolar constraint: only the same row is searched (no vertical disparity)
//! - Cost: sum of absolute R, G, B differences of a single pixel, no window
//! - Ties resolve to the smallest disparity (strict `<` while scanning)

use rayon::prelude::*;

use crate::color::ColorImage;

/// Search and acceptance parameters for [`DisparityMatcher`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityConfig {
    /// Exclusive lower acceptance bound (pixels)
    pub min_disparity: f64,
    /// Exclusive upper acceptance bound, also the search radius (pixels)
    pub max_disparity: f64,
    /// Column stride of the search
    pub disparity_step: usize,
    /// Row and column stride over the reference image
    pub pixel_step: usize,
}

impl DisparityConfig {
    pub const DEFAULT_MIN_DISPARITY: f64 = 1.0;
    pub const DEFAULT_MAX_DISPARITY: f64 = 64.0;

    /// Replace non-positive fields with their defaults
    pub fn with_defaults(self) -> Self {
        Self {
            min_disparity: if self.min_disparity <= 0.0 {
                Self::DEFAULT_MIN_DISPARITY
            } else {
                self.min_disparity
            },
            max_disparity: if self.max_disparity <= 0.0 {
                Self::DEFAULT_MAX_DISPARITY
            } else {
                self.max_disparity
            },
            disparity_step: self.disparity_step.max(1),
            pixel_step: self.pixel_step.max(1),
        }
    }
}

impl Default for DisparityConfig {
    fn default() -> Self {
        Self {
            min_disparity: Self::DEFAULT_MIN_DISPARITY,
            max_disparity: Self::DEFAULT_MAX_DISPARITY,
            disparity_step: 1,
            pixel_step: 1,
        }
    }
}

/// An accepted disparity at a reference pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disparity {
    /// Column in the reference image
    pub x: u32,
    /// Row in both images
    pub y: u32,
    /// `x - x_target`, strictly inside the configured bounds
    pub disparity: u32,
}

/// Single-pixel SAD matcher along horizontal epipolar lines
#[derive(Debug, Clone)]
pub struct DisparityMatcher {
    config: DisparityConfig,
}

impl Default for DisparityMatcher {
    fn default() -> Self {
        Self::new(DisparityConfig::default())
    }
}

impl DisparityMatcher {
    /// Create a matcher; non-positive config fields fall back to defaults
    pub fn new(config: DisparityConfig) -> Self {
        Self {
            config: config.with_defaults(),
        }
    }

    /// Effective configuration after defaulting
    pub fn config(&self) -> &DisparityConfig {
        &self.config
    }

    /// Sum of absolute channel differences between `reference(x, y)` and
    /// `target(target_x, y)`
    pub fn pixel_cost<R, T>(reference: &R, target: &T, x: u32, y: u32, target_x: u32) -> u32
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
    {
        let a = reference.rgb16(x, y);
        let b = target.rgb16(target_x, y);
        a.iter()
            .zip(b.iter())
            .map(|(&p, &q)| u32::from(p.abs_diff(q)))
            .sum()
    }

    /// Lowest-cost disparity at `(x, y)` before the acceptance test
    ///
    /// Candidates are `x, x - step, x - 2*step, ...` down to
    /// `x - max_disparity`, clamped at column 0.
    pub fn search<R, T>(&self, reference: &R, target: &T, x: u32, y: u32) -> u32
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
    {
        let radius = self.config.max_disparity as u32;
        let lowest = x.saturating_sub(radius);

        let mut best_cost = u32::MAX;
        let mut best_disparity = 0;

        for target_x in (lowest..=x).rev().step_by(self.config.disparity_step) {
            let cost = Self::pixel_cost(reference, target, x, y, target_x);
            if cost < best_cost {
                best_cost = cost;
                best_disparity = x - target_x;
            }
        }

        best_disparity
    }

    /// Whether `disparity` lies strictly between the configured bounds
    pub fn is_accepted(&self, disparity: u32) -> bool {
        let d = f64::from(disparity);
        d > self.config.min_disparity && d < self.config.max_disparity
    }

    /// Accepted disparity at `(x, y)`, or `None` when the best match is
    /// outside the acceptance bounds
    pub fn best_disparity<R, T>(&self, reference: &R, target: &T, x: u32, y: u32) -> Option<u32>
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
    {
        let disparity = self.search(reference, target, x, y);
        self.is_accepted(disparity).then_some(disparity)
    }

    /// Accepted disparities of one sampled row, left to right
    pub fn match_row<R, T>(&self, reference: &R, target: &T, y: u32) -> Vec<Disparity>
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
    {
        let width = reference.size().0.min(target.size().0);
        (0..width)
            .step_by(self.config.pixel_step)
            .filter_map(|x| {
                self.best_disparity(reference, target, x, y)
                    .map(|disparity| Disparity { x, y, disparity })
            })
            .collect()
    }

    /// Accepted disparities over the sampled grid, in row-major order
    ///
    /// Only the region common to both images is visited; callers that need
    /// equal sizes check them beforehand.
    pub fn compute<R, T>(&self, reference: &R, target: &T) -> Vec<Disparity>
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
    {
        self.map_matches(reference, target, |m| m)
    }

    /// Apply `f` to every accepted disparity, rows in parallel
    ///
    /// Results come back in row-major order regardless of scheduling.
    pub fn map_matches<R, T, O, F>(&self, reference: &R, target: &T, f: F) -> Vec<O>
    where
        R: ColorImage + ?Sized,
        T: ColorImage + ?Sized,
        O: Send,
        F: Fn(Disparity) -> O + Sync,
    {
        let height = reference.size().1.min(target.size().1);
        let rows: Vec<u32> = (0..height).step_by(self.config.pixel_step).collect();

        rows.par_iter()
            .map(|&y| {
                self.match_row(reference, target, y)
                    .into_iter()
                    .map(&f)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}
