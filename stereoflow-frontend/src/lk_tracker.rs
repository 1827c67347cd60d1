//! Lucas-Kanade optical flow tracker
//!
//! Implements pyramidal Lucas-Kanade for tracking features across frames.
//! Uses iterative refinement with a local window, coarse to fine.

use image::GrayImage;

use crate::corners::{min_eigenvalue, Corner};

/// Configuration for Lucas-Kanade tracker
#[derive(Debug, Clone)]
pub struct LKConfig {
    /// Size of the tracking window (half-width, so window is 2*win_size+1)
    pub win_size: usize,
    /// Maximum number of iterations per pyramid level
    pub max_iterations: usize,
    /// Convergence threshold (stop if motion < this)
    pub epsilon: f32,
    /// Maximum number of pyramid levels (1 = no pyramid)
    pub num_levels: usize,
    /// Minimum eigenvalue of the window's structure tensor, per window pixel
    pub min_eigenvalue: f32,
}

impl Default for LKConfig {
    fn default() -> Self {
        Self {
            win_size: 10,
            max_iterations: 30,
            epsilon: 0.01,
            num_levels: 4,
            min_eigenvalue: 1e-4,
        }
    }
}

/// Lucas-Kanade optical flow tracker
#[derive(Debug, Clone)]
pub struct LKTracker {
    config: LKConfig,
}

/// Result of tracking a single point
#[derive(Debug, Clone, Copy)]
pub struct TrackResult {
    /// New position after tracking (the input position when lost)
    pub position: (f32, f32),
    /// Whether tracking was successful
    pub success: bool,
    /// Mean absolute intensity difference over the window at the final position
    pub error: f32,
}

impl TrackResult {
    fn lost(position: (f32, f32)) -> Self {
        Self {
            position,
            success: false,
            error: f32::MAX,
        }
    }
}

/// Outcome of refinement on one pyramid level
enum LevelOutcome {
    Converged { position: (f32, f32), error: f32 },
    /// Window has too little texture to solve for motion
    Degenerate,
    /// Estimate left the image
    OutOfBounds,
}

impl LKTracker {
    /// Create a new LK tracker with default configuration
    pub fn new() -> Self {
        Self {
            config: LKConfig::default(),
        }
    }

    /// Create a new LK tracker with custom configuration
    pub fn with_config(config: LKConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LKConfig {
        &self.config
    }

    /// Track a set of points from prev_image to next_image
    pub fn track(
        &self,
        prev_image: &GrayImage,
        next_image: &GrayImage,
        points: &[(f32, f32)],
    ) -> Vec<TrackResult> {
        let prev_pyramid = self.build_pyramid(prev_image);
        let next_pyramid = self.build_pyramid(next_image);

        points
            .iter()
            .map(|&pt| self.track_point(&prev_pyramid, &next_pyramid, pt))
            .collect()
    }

    /// Track detected corners, one result per corner in the same order
    pub fn track_corners(
        &self,
        prev_image: &GrayImage,
        next_image: &GrayImage,
        corners: &[Corner],
    ) -> Vec<TrackResult> {
        let points: Vec<(f32, f32)> = corners.iter().map(|c| (c.x, c.y)).collect();
        self.track(prev_image, next_image, &points)
    }

    /// Build image pyramid
    ///
    /// Stops early once a level would be smaller than the tracking window.
    fn build_pyramid(&self, image: &GrayImage) -> Vec<GrayImage> {
        let window = (2 * self.config.win_size + 1) as u32;
        let mut pyramid = Vec::with_capacity(self.config.num_levels.max(1));
        pyramid.push(image.clone());

        while pyramid.len() < self.config.num_levels {
            let prev = &pyramid[pyramid.len() - 1];
            let (width, height) = prev.dimensions();
            if width / 2 < window || height / 2 < window {
                break;
            }
            let downsampled = downsample(prev);
            pyramid.push(downsampled);
        }

        pyramid
    }

    /// Track a single point through the pyramid
    fn track_point(
        &self,
        prev_pyramid: &[GrayImage],
        next_pyramid: &[GrayImage],
        point: (f32, f32),
    ) -> TrackResult {
        let (width, height) = prev_pyramid[0].dimensions();
        if !in_bounds(point, width, height) {
            return TrackResult::lost(point);
        }

        // Frames of different size can have pyramids of different depth
        let num_levels = prev_pyramid.len().min(next_pyramid.len());
        let mut flow = (0.0f32, 0.0f32);
        let mut error = 0.0f32;

        // Coarse to fine
        for level in (0..num_levels).rev() {
            let level_scale = (1 << level) as f32;
            let prev_pt = (point.0 / level_scale, point.1 / level_scale);
            let guess = (prev_pt.0 + flow.0, prev_pt.1 + flow.1);

            match self.track_at_level(&prev_pyramid[level], &next_pyramid[level], prev_pt, guess) {
                LevelOutcome::Converged {
                    position,
                    error: level_error,
                } => {
                    flow = (position.0 - prev_pt.0, position.1 - prev_pt.1);
                    error = level_error;
                }
                // Coarse levels can lack texture; carry the current estimate down
                LevelOutcome::Degenerate if level > 0 => {}
                LevelOutcome::Degenerate | LevelOutcome::OutOfBounds => {
                    return TrackResult::lost(point);
                }
            }

            // Scale flow for next (finer) level
            if level > 0 {
                flow.0 *= 2.0;
                flow.1 *= 2.0;
            }
        }

        let final_pos = (point.0 + flow.0, point.1 + flow.1);
        let (next_width, next_height) = next_pyramid[0].dimensions();
        if !in_bounds(final_pos, next_width, next_height) {
            return TrackResult::lost(point);
        }

        TrackResult {
            position: final_pos,
            success: true,
            error,
        }
    }

    /// Track at a single pyramid level using iterative Lucas-Kanade
    fn track_at_level(
        &self,
        prev_image: &GrayImage,
        next_image: &GrayImage,
        prev_pt: (f32, f32),
        init_guess: (f32, f32),
    ) -> LevelOutcome {
        let (width, height) = next_image.dimensions();
        let win = self.config.win_size as i32;
        let win_pixels = ((2 * win + 1) * (2 * win + 1)) as f32;

        // Template and gradients around the previous position
        let mut template = Vec::with_capacity(win_pixels as usize);
        let mut grad_x = Vec::with_capacity(win_pixels as usize);
        let mut grad_y = Vec::with_capacity(win_pixels as usize);
        let (mut gxx, mut gyy, mut gxy) = (0.0f32, 0.0f32, 0.0f32);

        for dy in -win..=win {
            for dx in -win..=win {
                let x = prev_pt.0 + dx as f32;
                let y = prev_pt.1 + dy as f32;

                let ix = (sample_bilinear(prev_image, x + 1.0, y)
                    - sample_bilinear(prev_image, x - 1.0, y))
                    / 2.0;
                let iy = (sample_bilinear(prev_image, x, y + 1.0)
                    - sample_bilinear(prev_image, x, y - 1.0))
                    / 2.0;

                template.push(sample_bilinear(prev_image, x, y));
                grad_x.push(ix);
                grad_y.push(iy);

                gxx += ix * ix;
                gyy += iy * iy;
                gxy += ix * iy;
            }
        }

        let det = gxx * gyy - gxy * gxy;
        if min_eigenvalue(gxx, gxy, gyy) / win_pixels < self.config.min_eigenvalue
            || det.abs() < f32::EPSILON
        {
            return LevelOutcome::Degenerate;
        }

        // Iterative refinement
        let mut cur_pos = init_guess;
        let mut error = 0.0f32;

        for _iter in 0..self.config.max_iterations {
            if !in_bounds(cur_pos, width, height) {
                return LevelOutcome::OutOfBounds;
            }

            // Mismatch vector: temporal difference weighted by spatial gradient
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut abs_sum = 0.0f32;
            let mut idx = 0;
            for dy in -win..=win {
                for dx in -win..=win {
                    let next_val =
                        sample_bilinear(next_image, cur_pos.0 + dx as f32, cur_pos.1 + dy as f32);
                    let diff = template[idx] - next_val;
                    bx += grad_x[idx] * diff;
                    by += grad_y[idx] * diff;
                    abs_sum += diff.abs();
                    idx += 1;
                }
            }
            error = abs_sum / win_pixels;

            // Solve 2x2 system: [gxx gxy; gxy gyy] * [dx; dy] = [bx; by]
            let dx = (gyy * bx - gxy * by) / det;
            let dy = (gxx * by - gxy * bx) / det;

            cur_pos.0 += dx;
            cur_pos.1 += dy;

            // Check convergence
            if dx * dx + dy * dy < self.config.epsilon * self.config.epsilon {
                break;
            }
        }

        if !in_bounds(cur_pos, width, height) {
            return LevelOutcome::OutOfBounds;
        }

        LevelOutcome::Converged {
            position: cur_pos,
            error,
        }
    }
}

impl Default for LKTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn in_bounds(pt: (f32, f32), width: u32, height: u32) -> bool {
    pt.0 >= 0.0 && pt.1 >= 0.0 && pt.0 <= width as f32 - 1.0 && pt.1 <= height as f32 - 1.0
}

/// Downsample image by 2x with a 2x2 box filter
fn downsample(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let new_width = width / 2;
    let new_height = height / 2;

    GrayImage::from_fn(new_width, new_height, |x, y| {
        let sx = x * 2;
        let sy = y * 2;

        let p00 = u32::from(image.get_pixel(sx, sy).0[0]);
        let p10 = u32::from(image.get_pixel((sx + 1).min(width - 1), sy).0[0]);
        let p01 = u32::from(image.get_pixel(sx, (sy + 1).min(height - 1)).0[0]);
        let p11 = u32::from(
            image
                .get_pixel((sx + 1).min(width - 1), (sy + 1).min(height - 1))
                .0[0],
        );

        image::Luma([((p00 + p10 + p01 + p11 + 2) / 4) as u8])
    })
}

/// Bilinear interpolation for subpixel sampling, clamped at the border
fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (width, height) = image.dimensions();

    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x.floor();
    let fy = y - y.floor();

    let clamp_x = |v: i32| v.clamp(0, width as i32 - 1) as u32;
    let clamp_y = |v: i32| v.clamp(0, height as i32 - 1) as u32;
    let (x0c, x1c) = (clamp_x(x0), clamp_x(x0 + 1));
    let (y0c, y1c) = (clamp_y(y0), clamp_y(y0 + 1));

    let p00 = f32::from(image.get_pixel(x0c, y0c).0[0]);
    let p10 = f32::from(image.get_pixel(x1c, y0c).0[0]);
    let p01 = f32::from(image.get_pixel(x0c, y1c).0[0]);
    let p11 = f32::from(image.get_pixel(x1c, y1c).0[0]);

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;

    top * (1.0 - fy) + bottom * fy
}
