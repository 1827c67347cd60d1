//! Frame sources feeding the stereo camera and flow sensor

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use image::DynamicImage;
use tracing::trace;

use crate::error::SensorError;

/// A captured image and the time it was captured
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: DynamicImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    /// Frame stamped with the current time
    pub fn now(image: DynamicImage) -> Self {
        Self::new(image, Instant::now())
    }
}

/// Anything that yields frames on demand
pub trait FrameSource: Send + Sync {
    fn name(&self) -> &str;

    fn next_frame(&self) -> Result<Frame, SensorError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn next_frame(&self) -> Result<Frame, SensorError> {
        (**self).next_frame()
    }
}

fn read_image(path: &Path) -> Result<DynamicImage, SensorError> {
    image::open(path).map_err(SensorError::acquisition)
}

/// Re-reads a single image file on every call
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    name: String,
    path: PathBuf,
}

impl ImageFileSource {
    /// Source named after its path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&self) -> Result<Frame, SensorError> {
        let image = read_image(&self.path)?;
        Ok(Frame::now(image))
    }
}

/// Walks a fixed list of image files, one per call, wrapping around
#[derive(Debug)]
pub struct ImageSequenceSource {
    name: String,
    paths: Vec<PathBuf>,
    next: AtomicUsize,
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

impl ImageSequenceSource {
    /// Files are visited in sorted order
    pub fn new(name: impl Into<String>, mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        Self {
            name: name.into(),
            paths,
            next: AtomicUsize::new(0),
        }
    }

    /// All image files directly inside `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, SensorError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| SensorError::io(dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SensorError::io(dir, e))?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }

        Ok(Self::new(dir.display().to_string(), paths))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn next_path(&self) -> Option<&Path> {
        if self.paths.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.paths.len();
        Some(&self.paths[index])
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&self) -> Result<Frame, SensorError> {
        let path = self.next_path().ok_or_else(|| SensorError::NoFrames {
            source_name: self.name.clone(),
        })?;
        trace!(path = %path.display(), "reading frame");
        let image = read_image(path)?;
        Ok(Frame::now(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stereoflow-source-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_solid(path: &Path, value: u8) {
        RgbImage::from_pixel(4, 3, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_file_source_rereads() {
        let dir = scratch_dir("file");
        let path = dir.join("frame.png");
        write_solid(&path, 10);

        let source = ImageFileSource::new(&path);
        let first = source.next_frame().unwrap();
        write_solid(&path, 200);
        let second = source.next_frame().unwrap();

        assert_eq!(first.image.to_rgb8().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(second.image.to_rgb8().get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert!(second.captured_at >= first.captured_at);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_acquisition_error() {
        let source = ImageFileSource::new("/nonexistent/stereoflow/frame.png");
        assert!(matches!(source.next_frame(), Err(SensorError::Acquisition(_))));
    }

    #[test]
    fn test_sequence_wraps_in_sorted_order() {
        let dir = scratch_dir("sequence");
        write_solid(&dir.join("b.png"), 2);
        write_solid(&dir.join("a.png"), 1);
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let source = ImageSequenceSource::from_dir(&dir).unwrap();
        assert_eq!(source.len(), 2);

        let values: Vec<u8> = (0..5)
            .map(|_| source.next_frame().unwrap().image.to_rgb8().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![1, 2, 1, 2, 1]);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_empty_sequence() {
        let source = ImageSequenceSource::new("empty", Vec::new());
        assert!(source.is_empty());
        assert!(matches!(source.next_frame(), Err(SensorError::NoFrames { .. })));
    }

    #[test]
    fn test_missing_dir() {
        assert!(matches!(
            ImageSequenceSource::from_dir("/nonexistent/stereoflow"),
            Err(SensorError::Io { .. })
        ));
    }
}
