//! Example: Reconstruct a point cloud from a rectified stereo pair
//!
//! Usage:
//!   cargo run --example stereo_cloud -- <left_image> <right_image> <baseline_m> <focal_px> [output_image]
//!
//! Prints depth statistics and saves a disparity visualization
//! (default "output_disparity.png").

use image::{Rgb, RgbImage};
use stereoflow_frontend::{DepthProjector, StereoConfig};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 5 {
        eprintln!(
            "Usage: {} <left_image> <right_image> <baseline_m> <focal_px> [output_image]",
            args[0]
        );
        std::process::exit(1);
    }

    let baseline: f64 = args[3].parse().expect("baseline must be a number");
    let focal_length: f64 = args[4].parse().expect("focal length must be a number");
    let output_path = args.get(5).map(|s| s.as_str()).unwrap_or("output_disparity.png");

    let left = image::open(&args[1]).expect("Failed to load left image");
    let right = image::open(&args[2]).expect("Failed to load right image");
    println!("Image size: {}x{}", left.width(), left.height());

    let projector = DepthProjector::new(StereoConfig::new(baseline, focal_length));

    let start = std::time::Instant::now();
    let disparities = projector.matcher().compute(&left, &right);
    println!("  {} accepted disparities in {:?}", disparities.len(), start.elapsed());

    let cloud = match projector.reconstruct(&left, &right) {
        Ok(cloud) => cloud,
        Err(e) => {
            eprintln!("Reconstruction failed: {}", e);
            std::process::exit(1);
        }
    };

    if !cloud.is_empty() {
        let depths: Vec<f64> = cloud.iter().map(|p| p.position.z).collect();
        let min_z = depths.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_z = depths.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg_z = depths.iter().sum::<f64>() / depths.len() as f64;

        println!("\nDepth statistics ({} points):", cloud.len());
        println!("  Min: {:.3} m", min_z);
        println!("  Max: {:.3} m", max_z);
        println!("  Avg: {:.3} m", avg_z);
    }

    // Disparity map: black = rejected, blue = far, red = close
    let max_disparity = projector.matcher().config().max_disparity as f32;
    let mut output = RgbImage::new(left.width(), left.height());
    for d in &disparities {
        output.put_pixel(d.x, d.y, disparity_color(d.disparity as f32 / max_disparity));
    }
    output.save(output_path).expect("Failed to save output image");
    println!("\nSaved disparity map to: {}", output_path);
}

/// Map normalized disparity [0, 1] to color (blue = far, red = close)
fn disparity_color(norm_disp: f32) -> Rgb<u8> {
    let r = (norm_disp * 255.0) as u8;
    let b = ((1.0 - norm_disp) * 255.0) as u8;
    let g = ((1.0 - (2.0 * norm_disp - 1.0).abs()) * 255.0) as u8;
    Rgb([r, g, b])
}
