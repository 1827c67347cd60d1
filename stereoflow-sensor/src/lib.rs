//! Stereoflow sensor components
//!
//! Wraps the frontend algorithms into components fed by frame sources: a
//! stereo camera producing colored point clouds and an optical-flow movement
//! sensor that polls a single camera in the background.

pub mod config;
pub mod error;
pub mod flow;
pub mod source;
pub mod stereo_camera;

pub use config::{FlowSensorConfig, StereoCameraConfig};
pub use error::SensorError;
pub use flow::{CycleOutcome, FlowLoop, FlowSensor, MotionSample, MovementProperties, Readings, SkipReason};
pub use source::{Frame, FrameSource, ImageFileSource, ImageSequenceSource};
pub use stereo_camera::{CameraProperties, StereoCamera};

// Re-export the frontend for downstream users
pub use stereoflow_frontend as frontend;
