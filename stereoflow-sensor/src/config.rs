//! JSON configuration for the stereo camera and flow sensor components
//!
//! Unset or non-positive numeric fields fall back to defaults; source names
//! and the stereo geometry are required.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stereoflow_frontend::{DisparityConfig, MotionEstimator, StereoConfig};

use crate::error::SensorError;

/// Stereo camera configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StereoCameraConfig {
    /// Left (reference) frame source
    pub left: String,
    /// Right (target) frame source
    pub right: String,
    /// Baseline between the cameras (meters)
    pub distance_meters: f64,
    pub focal_length_pixels: f64,
    pub min_disparity: f64,
    pub max_disparity: f64,
    pub disparity_step: i64,
    pub pixel_step: i64,
}

impl StereoCameraConfig {
    pub fn from_json(json: &str) -> Result<Self, SensorError> {
        serde_json::from_str(json).map_err(|e| SensorError::config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SensorError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SensorError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Check required fields, returning the frame sources this config depends on
    pub fn validate(&self) -> Result<Vec<String>, SensorError> {
        if self.left.is_empty() {
            return Err(SensorError::config("left camera required"));
        }
        if self.right.is_empty() {
            return Err(SensorError::config("right camera required"));
        }
        if !is_positive(self.distance_meters) {
            return Err(SensorError::config("distance-meters must be positive"));
        }
        if !is_positive(self.focal_length_pixels) {
            return Err(SensorError::config("focal-length-pixels must be positive"));
        }
        Ok(vec![self.left.clone(), self.right.clone()])
    }

    /// Reconstruction parameters with defaults applied
    pub fn stereo_config(&self) -> StereoConfig {
        StereoConfig {
            baseline: self.distance_meters,
            focal_length: self.focal_length_pixels,
            disparity: DisparityConfig {
                min_disparity: self.min_disparity,
                max_disparity: self.max_disparity,
                disparity_step: positive_step(self.disparity_step),
                pixel_step: positive_step(self.pixel_step),
            }
            .with_defaults(),
        }
    }
}

fn is_positive(value: f64) -> bool {
    value > 0.0
}

// zero is replaced by the default in `DisparityConfig::with_defaults`
fn positive_step(step: i64) -> usize {
    usize::try_from(step).unwrap_or(0)
}

/// Flow movement sensor configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FlowSensorConfig {
    /// Frame source to track
    pub camera: String,
    /// Focal length (pixels) dividing the linear rate
    pub focal_length: f64,
    /// Polling cadence
    pub interval_ms: u64,
    /// Maximum age of a usable frame pair or velocity sample
    pub freshness_ms: u64,
}

impl FlowSensorConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(1);

    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SensorError> {
        serde_json::from_str(json).map_err(|e| SensorError::config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SensorError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SensorError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Check required fields, returning the frame sources this config depends on
    pub fn validate(&self) -> Result<Vec<String>, SensorError> {
        if self.camera.is_empty() {
            return Err(SensorError::config("camera required"));
        }
        Ok(vec![self.camera.clone()])
    }

    pub fn focal_length(&self) -> f64 {
        if self.focal_length > 0.0 {
            self.focal_length
        } else {
            MotionEstimator::DEFAULT_FOCAL_LENGTH
        }
    }

    pub fn interval(&self) -> Duration {
        match self.interval_ms {
            0 => Self::DEFAULT_INTERVAL,
            ms => Duration::from_millis(ms),
        }
    }

    pub fn freshness(&self) -> Duration {
        match self.freshness_ms {
            0 => Self::DEFAULT_FRESHNESS,
            ms => Duration::from_millis(ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_config_parses_kebab_case() {
        let config = StereoCameraConfig::from_json(
            r#"{
                "left": "cam-left",
                "right": "cam-right",
                "distance-meters": 0.12,
                "focal-length-pixels": 700,
                "min-disparity": 2,
                "max-disparity": 48,
                "disparity-step": 2,
                "pixel-step": 4
            }"#,
        )
        .unwrap();

        assert_eq!(config.validate().unwrap(), vec!["cam-left", "cam-right"]);
        let stereo = config.stereo_config();
        assert_eq!(stereo.baseline, 0.12);
        assert_eq!(stereo.focal_length, 700.0);
        assert_eq!(stereo.disparity.min_disparity, 2.0);
        assert_eq!(stereo.disparity.max_disparity, 48.0);
        assert_eq!(stereo.disparity.disparity_step, 2);
        assert_eq!(stereo.disparity.pixel_step, 4);
    }

    #[test]
    fn test_stereo_config_defaults() {
        let config = StereoCameraConfig::from_json(
            r#"{"left": "l", "right": "r", "distance-meters": 0.1, "focal-length-pixels": 500,
                "max-disparity": -3, "disparity-step": -1}"#,
        )
        .unwrap();
        let disparity = config.stereo_config().disparity;
        assert_eq!(disparity, DisparityConfig::default());
    }

    #[test]
    fn test_stereo_config_validation() {
        let valid = StereoCameraConfig {
            left: "l".into(),
            right: "r".into(),
            distance_meters: 0.1,
            focal_length_pixels: 500.0,
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let cases = [
            StereoCameraConfig { left: String::new(), ..valid.clone() },
            StereoCameraConfig { right: String::new(), ..valid.clone() },
            StereoCameraConfig { distance_meters: 0.0, ..valid.clone() },
            StereoCameraConfig { focal_length_pixels: -1.0, ..valid.clone() },
            StereoCameraConfig { focal_length_pixels: f64::NAN, ..valid.clone() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(SensorError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            StereoCameraConfig::from_json("{ not json"),
            Err(SensorError::Config(_))
        ));
        assert!(matches!(
            FlowSensorConfig::from_json(r#"{"camera": 3}"#),
            Err(SensorError::Config(_))
        ));
    }

    #[test]
    fn test_flow_config_defaults() {
        let config = FlowSensorConfig::from_json(r#"{"camera": "front"}"#).unwrap();
        assert_eq!(config.validate().unwrap(), vec!["front"]);
        assert_eq!(config.focal_length(), 30.0);
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.freshness(), Duration::from_secs(1));

        let config = FlowSensorConfig::from_json(
            r#"{"camera": "front", "focal-length": 450, "interval-ms": 100, "freshness-ms": 250}"#,
        )
        .unwrap();
        assert_eq!(config.focal_length(), 450.0);
        assert_eq!(config.interval(), Duration::from_millis(100));
        assert_eq!(config.freshness(), Duration::from_millis(250));
    }

    #[test]
    fn test_flow_config_requires_camera() {
        assert!(matches!(
            FlowSensorConfig::default().validate(),
            Err(SensorError::Config(_))
        ));
    }
}
