//! Shi-Tomasi corner detection
//!
//! Scores each pixel by the minimum eigenvalue of the structure tensor summed
//! over a 3x3 block of Sobel gradients, then:
//! 1. keeps 3x3 local maxima scoring at least `quality_level` times the best score
//! 2. walks them strongest first, dropping any closer than `min_distance` to one already kept
//! 3. stops after `max_corners`

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// A detected corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    /// X coordinate (column) in pixels
    pub x: f32,
    /// Y coordinate (row) in pixels
    pub y: f32,
    /// Minimum structure-tensor eigenvalue (higher = stronger corner)
    pub strength: f32,
}

/// Minimum-eigenvalue corner detector with greedy distance suppression
#[derive(Debug, Clone)]
pub struct CornerDetector {
    /// Maximum number of corners to return
    max_corners: usize,
    /// Fraction of the strongest response a corner must reach
    quality_level: f32,
    /// Minimum distance between returned corners (pixels)
    min_distance: f32,
    /// Half-size of the block the structure tensor is summed over
    block_radius: i32,
}

impl Default for CornerDetector {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 10.0,
            block_radius: 1,
        }
    }
}

impl CornerDetector {
    /// Create a detector with custom limits
    pub fn new(max_corners: usize, quality_level: f32, min_distance: f32) -> Self {
        Self {
            max_corners,
            quality_level,
            min_distance,
            ..Self::default()
        }
    }

    /// Detect corners, strongest first
    pub fn detect(&self, image: &GrayImage) -> Vec<Corner> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 || self.max_corners == 0 {
            return Vec::new();
        }

        let strength = self.strength_map(image);
        let best = strength.iter().copied().fold(0.0f32, f32::max);
        if best <= 0.0 {
            return Vec::new();
        }
        let threshold = best * self.quality_level;

        let (w, h) = (width as i32, height as i32);
        let at = |x: i32, y: i32| strength[(y * w + x) as usize];

        // Local maxima above the quality threshold, in row-major order
        let mut candidates: Vec<Corner> = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let value = at(x, y);
                if value <= 0.0 || value < threshold {
                    continue;
                }

                let mut is_max = true;
                'neighbors: for ny in (y - 1).max(0)..=(y + 1).min(h - 1) {
                    for nx in (x - 1).max(0)..=(x + 1).min(w - 1) {
                        if at(nx, ny) > value {
                            is_max = false;
                            break 'neighbors;
                        }
                    }
                }

                if is_max {
                    candidates.push(Corner {
                        x: x as f32,
                        y: y as f32,
                        strength: value,
                    });
                }
            }
        }

        // Stable sort keeps row-major order among equal strengths
        candidates.sort_by(|a, b| b.strength.total_cmp(&a.strength));

        let min_dist_sq = self.min_distance * self.min_distance;
        let mut corners: Vec<Corner> = Vec::with_capacity(self.max_corners.min(candidates.len()));
        for candidate in candidates {
            let crowded = corners.iter().any(|kept| {
                let dx = kept.x - candidate.x;
                let dy = kept.y - candidate.y;
                dx * dx + dy * dy < min_dist_sq
            });
            if crowded {
                continue;
            }

            corners.push(candidate);
            if corners.len() == self.max_corners {
                break;
            }
        }

        corners
    }

    /// Minimum-eigenvalue response for every pixel, row-major
    pub fn strength_map(&self, image: &GrayImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let (w, h) = (width as i32, height as i32);
        let r = self.block_radius;
        let mut out = Vec::with_capacity((width * height) as usize);

        for y in 0..h {
            for x in 0..w {
                let mut sxx = 0.0f32;
                let mut syy = 0.0f32;
                let mut sxy = 0.0f32;

                for dy in -r..=r {
                    for dx in -r..=r {
                        let px = (x + dx).clamp(0, w - 1) as u32;
                        let py = (y + dy).clamp(0, h - 1) as u32;
                        let ix = f32::from(gx.get_pixel(px, py).0[0]);
                        let iy = f32::from(gy.get_pixel(px, py).0[0]);
                        sxx += ix * ix;
                        syy += iy * iy;
                        sxy += ix * iy;
                    }
                }

                out.push(min_eigenvalue(sxx, sxy, syy));
            }
        }

        out
    }
}

/// Smaller eigenvalue of the symmetric matrix `[a b; b c]`
pub(crate) fn min_eigenvalue(a: f32, b: f32, c: f32) -> f32 {
    let half_trace = (a + c) / 2.0;
    let half_diff = (a - c) / 2.0;
    half_trace - (half_diff * half_diff + b * b).sqrt()
}
