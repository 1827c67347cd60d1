//! Example: Detect Shi-Tomasi corners and track them into a second frame
//!
//! Usage:
//!   cargo run --example detect_corners -- <prev_image> <current_image> [output_image]
//!
//! If no output path is given, saves to "output_flow.png"

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use stereoflow_frontend::{to_luma8, Correspondence, FeatureTracker};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <prev_image> <current_image> [output_image]", args[0]);
        eprintln!("\nThis example detects corners in the first image, tracks them into the");
        eprintln!("second with pyramidal Lucas-Kanade and draws the flow vectors.");
        std::process::exit(1);
    }

    let prev_path = &args[1];
    let current_path = &args[2];
    let output_path = args.get(3).map(|s| s.as_str()).unwrap_or("output_flow.png");

    let prev = match image::open(prev_path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Failed to load {}: {}", prev_path, e);
            std::process::exit(1);
        }
    };
    let current = match image::open(current_path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Failed to load {}: {}", current_path, e);
            std::process::exit(1);
        }
    };

    let prev_gray = to_luma8(&prev);
    let current_gray = to_luma8(&current);
    println!("Image size: {}x{}", prev_gray.width(), prev_gray.height());

    let tracker = FeatureTracker::new();
    let start = std::time::Instant::now();
    let correspondences = tracker.track(&prev_gray, &current_gray);
    let tracked = correspondences.iter().filter(|c| c.tracked).count();
    println!(
        "  {} corners, {} tracked in {:?}",
        correspondences.len(),
        tracked,
        start.elapsed()
    );

    println!("\nSaving visualization to: {}", output_path);
    let output = visualize_flow(&current.to_rgb8(), &correspondences);
    output.save(output_path).expect("Failed to save output image");
}

/// Draw each correspondence: green arrow when tracked, red circle when lost
fn visualize_flow(image: &RgbImage, correspondences: &[Correspondence]) -> RgbImage {
    let mut output = image.clone();

    for c in correspondences {
        let px = c.previous.x as f32;
        let py = c.previous.y as f32;

        if c.tracked {
            let cx = c.current.x as f32;
            let cy = c.current.y as f32;
            draw_line_segment_mut(&mut output, (px, py), (cx, cy), Rgb([0, 255, 0]));
            draw_hollow_circle_mut(&mut output, (cx as i32, cy as i32), 3, Rgb([0, 255, 0]));
        } else {
            draw_hollow_circle_mut(&mut output, (px as i32, py as i32), 4, Rgb([255, 0, 0]));
        }
    }

    output
}
