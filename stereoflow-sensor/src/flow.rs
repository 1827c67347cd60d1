//! Optical-flow movement sensor
//!
//! [`FlowLoop`] owns the previous frame and runs one acquisition/estimation
//! cycle at a time. [`FlowSensor`] drives it from a background thread at a
//! fixed cadence and serves the latest [`MotionSample`] to readers.
//!
//! Cycle rules:
//! - no previous frame, or one captured longer ago than the freshness window:
//!   skip estimation, keep the new frame
//! - acquisition failure: the previous frame is kept
//! - estimation failure: the new frame still replaces the previous one
//! - the cycle's error (or its absence) is carried in the published sample and
//!   takes precedence over staleness when reading

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use nalgebra::Vector3;
use parking_lot::RwLock;
use stereoflow_frontend::{FeatureTracker, FlowEstimator, MotionEstimate, MotionEstimator};
use tracing::{debug, info, warn};

use crate::config::FlowSensorConfig;
use crate::error::SensorError;
use crate::source::{Frame, FrameSource};

/// Last published result of the flow loop
#[derive(Debug, Clone)]
pub struct MotionSample {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
    pub tracked: usize,
    /// When the velocities were last computed
    pub updated_at: Option<Instant>,
    /// Error of the most recent cycle, if it failed
    pub error: Option<SensorError>,
}

impl Default for MotionSample {
    fn default() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
            tracked: 0,
            updated_at: None,
            error: None,
        }
    }
}

impl MotionSample {
    /// Whether the sample can be trusted at `now`
    ///
    /// A carried cycle error wins over staleness.
    pub fn check_at(&self, now: Instant, freshness: Duration) -> Result<(), SensorError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        match self.updated_at {
            None => Err(SensorError::stale(None, freshness)),
            Some(updated_at) => {
                let age = now.saturating_duration_since(updated_at);
                if age > freshness {
                    Err(SensorError::stale(Some(age), freshness))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Shared slot holding the latest sample
///
/// Readers clone the `Arc`; the loop publishes by swapping it.
#[derive(Debug, Default)]
struct SampleSlot {
    sample: RwLock<Arc<MotionSample>>,
}

impl SampleSlot {
    fn load(&self) -> Arc<MotionSample> {
        Arc::clone(&self.sample.read())
    }

    fn store(&self, sample: MotionSample) {
        *self.sample.write() = Arc::new(sample);
    }
}

/// Why a cycle did not estimate motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// First frame seen
    NoPreviousFrame,
    /// Previous frame captured longer ago than the freshness window
    PreviousTooOld { gap: Duration },
}

/// What a successful cycle did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Estimated(MotionEstimate),
    Skipped(SkipReason),
}

/// Signed seconds from `earlier` to `later`
fn seconds_between(earlier: Instant, later: Instant) -> f64 {
    match later.checked_duration_since(earlier) {
        Some(elapsed) => elapsed.as_secs_f64(),
        None => -earlier.duration_since(later).as_secs_f64(),
    }
}

/// One acquisition/estimation step at a time over a frame source
pub struct FlowLoop<S> {
    source: S,
    estimator: FlowEstimator,
    freshness: Duration,
    previous: Option<Frame>,
    slot: Arc<SampleSlot>,
}

impl<S: FrameSource> FlowLoop<S> {
    pub fn new(source: S, config: &FlowSensorConfig) -> Self {
        let estimator = FlowEstimator::new(
            FeatureTracker::new(),
            MotionEstimator::new(config.focal_length()),
        );
        Self {
            source,
            estimator,
            freshness: config.freshness(),
            previous: None,
            slot: Arc::new(SampleSlot::default()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Latest published sample
    pub fn sample(&self) -> Arc<MotionSample> {
        self.slot.load()
    }

    /// Capture time of the frame the next cycle will compare against
    pub fn previous_captured_at(&self) -> Option<Instant> {
        self.previous.as_ref().map(|frame| frame.captured_at)
    }

    /// Run one cycle and publish its result
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, SensorError> {
        let result = self.step();
        let current = self.slot.load();

        let next = match &result {
            Ok(CycleOutcome::Estimated(estimate)) => MotionSample {
                linear: estimate.linear,
                angular: estimate.angular,
                tracked: estimate.tracked,
                updated_at: Some(Instant::now()),
                error: None,
            },
            Ok(CycleOutcome::Skipped(_)) => MotionSample {
                error: None,
                ..MotionSample::clone(&current)
            },
            Err(err) => MotionSample {
                error: Some(err.clone()),
                ..MotionSample::clone(&current)
            },
        };
        self.slot.store(next);

        result
    }

    fn step(&mut self) -> Result<CycleOutcome, SensorError> {
        let frame = self.source.next_frame()?;

        let Some(previous) = self.previous.take() else {
            debug!(source = self.source.name(), "first frame");
            self.previous = Some(frame);
            return Ok(CycleOutcome::Skipped(SkipReason::NoPreviousFrame));
        };

        let dt = seconds_between(previous.captured_at, frame.captured_at);
        let outcome = if dt > self.freshness.as_secs_f64() {
            let gap = Duration::from_secs_f64(dt);
            debug!(source = self.source.name(), ?gap, "previous frame too old");
            Ok(CycleOutcome::Skipped(SkipReason::PreviousTooOld { gap }))
        } else {
            self.estimator
                .compute(&previous.image, &frame.image, dt)
                .map(CycleOutcome::Estimated)
                .map_err(SensorError::from)
        };

        // replaced whether or not estimation succeeded
        self.previous = Some(frame);

        if let Ok(CycleOutcome::Estimated(estimate)) = &outcome {
            debug!(
                linear_x = estimate.linear.x,
                linear_y = estimate.linear.y,
                angular_z = estimate.angular.z,
                tracked = estimate.tracked,
                "flow"
            );
        }
        outcome
    }
}

/// Capabilities reported by [`FlowSensor::properties`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementProperties {
    pub linear_velocity_supported: bool,
    pub angular_velocity_supported: bool,
    pub position_supported: bool,
    pub orientation_supported: bool,
    pub compass_heading_supported: bool,
    pub linear_acceleration_supported: bool,
}

/// Snapshot returned by [`FlowSensor::readings`]
#[derive(Debug, Clone)]
pub struct Readings {
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    pub tracked: usize,
    pub last_update: Option<Instant>,
    /// Error of the most recent cycle
    pub last_error: Option<SensorError>,
    /// Why the velocities should not be trusted, if they shouldn't
    pub status: Result<(), SensorError>,
}

/// Flow loop running on a background thread
pub struct FlowSensor {
    name: String,
    freshness: Duration,
    slot: Arc<SampleSlot>,
    /// Dropping this stops the loop
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlowSensor {
    /// Validate `config` and start polling `source`
    pub fn spawn<S>(config: FlowSensorConfig, source: S) -> Result<Self, SensorError>
    where
        S: FrameSource + 'static,
    {
        config.validate()?;

        let flow_loop = FlowLoop::new(source, &config);
        let slot = Arc::clone(&flow_loop.slot);
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        let ticker = crossbeam_channel::tick(config.interval());

        info!(camera = %config.camera, interval = ?config.interval(), "starting flow sensor");
        let handle = thread::spawn(move || {
            flow_thread_loop(flow_loop, ticker, cancel_rx);
        });

        Ok(Self {
            freshness: config.freshness(),
            name: config.camera,
            slot,
            cancel: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample(&self) -> Arc<MotionSample> {
        self.slot.load()
    }

    pub fn linear_velocity(&self) -> Result<Vector3<f64>, SensorError> {
        let sample = self.slot.load();
        sample.check_at(Instant::now(), self.freshness)?;
        Ok(sample.linear)
    }

    pub fn angular_velocity(&self) -> Result<Vector3<f64>, SensorError> {
        let sample = self.slot.load();
        sample.check_at(Instant::now(), self.freshness)?;
        Ok(sample.angular)
    }

    pub fn readings(&self) -> Readings {
        self.readings_at(Instant::now())
    }

    /// [`Self::readings`] evaluated at `now`
    pub fn readings_at(&self, now: Instant) -> Readings {
        let sample = self.slot.load();
        Readings {
            linear_velocity: sample.linear,
            angular_velocity: sample.angular,
            tracked: sample.tracked,
            last_update: sample.updated_at,
            last_error: sample.error.clone(),
            status: sample.check_at(now, self.freshness),
        }
    }

    pub fn properties(&self) -> MovementProperties {
        MovementProperties {
            linear_velocity_supported: true,
            angular_velocity_supported: true,
            ..MovementProperties::default()
        }
    }

    pub fn position(&self) -> Result<Vector3<f64>, SensorError> {
        Err(SensorError::Unsupported("position"))
    }

    pub fn orientation(&self) -> Result<Vector3<f64>, SensorError> {
        Err(SensorError::Unsupported("orientation"))
    }

    pub fn compass_heading(&self) -> Result<f64, SensorError> {
        Err(SensorError::Unsupported("compass heading"))
    }

    pub fn linear_acceleration(&self) -> Result<Vector3<f64>, SensorError> {
        Err(SensorError::Unsupported("linear acceleration"))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for the thread
    ///
    /// The cycle in progress, if any, runs to completion.
    pub fn close(&mut self) {
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(camera = %self.name, "flow thread panicked");
            }
        }
    }
}

impl Drop for FlowSensor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs a cycle immediately, then one per tick, until cancelled
fn flow_thread_loop<S: FrameSource>(
    mut flow_loop: FlowLoop<S>,
    ticker: Receiver<Instant>,
    cancel: Receiver<()>,
) {
    loop {
        // check before starting new work; a dropped sender disconnects
        if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        match flow_loop.run_cycle() {
            Ok(CycleOutcome::Skipped(reason)) => debug!(?reason, "cycle skipped"),
            Ok(CycleOutcome::Estimated(_)) => {}
            Err(err) => warn!(source = flow_loop.source().name(), error = %err, "flow cycle failed"),
        }

        select! {
            recv(cancel) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }
    info!(source = flow_loop.source().name(), "flow loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use stereoflow_frontend::FrontendError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out scripted results in order
    struct Scripted {
        script: Mutex<VecDeque<Result<Frame, SensorError>>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Frame, SensorError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl FrameSource for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn next_frame(&self) -> Result<Frame, SensorError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SensorError::acquisition("script exhausted")))
        }
    }

    fn blank() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([128])))
    }

    fn frame_at(base: Instant, offset_ms: u64) -> Result<Frame, SensorError> {
        Ok(Frame::new(blank(), base + Duration::from_millis(offset_ms)))
    }

    fn flow_loop(script: Vec<Result<Frame, SensorError>>) -> FlowLoop<Scripted> {
        FlowLoop::new(Scripted::new(script), &FlowSensorConfig::new("scripted"))
    }

    const FRESHNESS: Duration = Duration::from_secs(1);

    #[test]
    fn test_first_cycle_skips() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 0)]);

        let outcome = flow.run_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NoPreviousFrame));
        assert_eq!(flow.previous_captured_at(), Some(base));

        let sample = flow.sample();
        assert!(sample.updated_at.is_none());
        assert!(matches!(
            sample.check_at(Instant::now(), FRESHNESS),
            Err(SensorError::StaleData { age: None, .. })
        ));
    }

    #[test]
    fn test_second_cycle_estimates() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 0), frame_at(base, 500)]);

        flow.run_cycle().unwrap();
        let outcome = flow.run_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Estimated(MotionEstimate::zero()));

        let sample = flow.sample();
        let updated_at = sample.updated_at.unwrap();
        assert!(sample.check_at(updated_at, FRESHNESS).is_ok());
        assert_eq!(sample.tracked, 0);
        assert_eq!(flow.previous_captured_at(), Some(base + Duration::from_millis(500)));
    }

    #[test]
    fn test_old_previous_frame_skips_and_is_replaced() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![
            frame_at(base, 0),
            frame_at(base, 1500),
            frame_at(base, 1800),
        ]);

        flow.run_cycle().unwrap();
        let outcome = flow.run_cycle().unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped(SkipReason::PreviousTooOld {
                gap: Duration::from_millis(1500)
            })
        );
        assert!(flow.sample().updated_at.is_none());

        // compared against the frame at 1500, not 0
        assert!(matches!(flow.run_cycle().unwrap(), CycleOutcome::Estimated(_)));
    }

    #[test]
    fn test_gap_equal_to_freshness_is_used() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 0), frame_at(base, 1000)]);
        flow.run_cycle().unwrap();
        assert!(matches!(flow.run_cycle().unwrap(), CycleOutcome::Estimated(_)));
    }

    #[test]
    fn test_acquisition_error_keeps_previous_frame() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![
            frame_at(base, 0),
            Err(SensorError::acquisition("usb reset")),
            frame_at(base, 600),
        ]);

        flow.run_cycle().unwrap();
        let err = flow.run_cycle().unwrap_err();
        assert_eq!(err.to_string(), "usb reset");
        assert_eq!(flow.previous_captured_at(), Some(base));

        let carried = flow.sample().check_at(Instant::now(), FRESHNESS).unwrap_err();
        assert_eq!(carried.to_string(), "usb reset");

        // gap measured from the frame at 0
        assert!(matches!(flow.run_cycle().unwrap(), CycleOutcome::Estimated(_)));
        assert!(flow.sample().error.is_none());
    }

    #[test]
    fn test_estimation_error_replaces_previous_frame() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 200), frame_at(base, 200), frame_at(base, 700)]);

        flow.run_cycle().unwrap();
        let err = flow.run_cycle().unwrap_err();
        assert!(matches!(err, SensorError::Frontend(_)));

        flow.run_cycle().unwrap();
        assert!(flow.sample().error.is_none());
    }

    #[test]
    fn test_frames_out_of_order_are_invalid() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 500), frame_at(base, 100)]);
        flow.run_cycle().unwrap();
        assert!(matches!(flow.run_cycle(), Err(SensorError::Frontend(_))));
    }

    #[test]
    fn test_resolution_change_is_carried_error() {
        let base = Instant::now();
        let textured = |size: u32| {
            let image = GrayImage::from_fn(size, size, |x, y| {
                let value = 128.0 + 60.0 * (x as f32 * 0.25).sin() * (y as f32 * 0.2).cos();
                Luma([value.round() as u8])
            });
            Frame::new(DynamicImage::ImageLuma8(image), base)
        };
        let later = |mut frame: Frame, offset_ms: u64| -> Result<Frame, SensorError> {
            frame.captured_at += Duration::from_millis(offset_ms);
            Ok(frame)
        };
        let mut flow = flow_loop(vec![
            later(textured(128), 0),
            later(textured(40), 300),
            later(textured(40), 600),
        ]);

        flow.run_cycle().unwrap();
        let err = flow.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            SensorError::Frontend(FrontendError::DimensionMismatch { .. })
        ));
        let carried = flow.sample().check_at(Instant::now(), FRESHNESS).unwrap_err();
        assert!(matches!(carried, SensorError::Frontend(_)));

        // the smaller frame became the previous one
        assert!(matches!(flow.run_cycle().unwrap(), CycleOutcome::Estimated(_)));
    }

    #[test]
    fn test_sample_goes_stale() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 0), frame_at(base, 100)]);
        flow.run_cycle().unwrap();
        flow.run_cycle().unwrap();

        let updated_at = flow.sample().updated_at.unwrap();
        let later = updated_at + Duration::from_millis(1500);
        assert!(matches!(
            flow.sample().check_at(later, FRESHNESS),
            Err(SensorError::StaleData { age: Some(_), .. })
        ));
    }

    #[test]
    fn test_error_takes_precedence_over_staleness() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![frame_at(base, 0), frame_at(base, 100)]);
        flow.run_cycle().unwrap();
        flow.run_cycle().unwrap();
        // script exhausted
        flow.run_cycle().unwrap_err();

        let sample = flow.sample();
        let later = sample.updated_at.unwrap() + Duration::from_secs(10);
        let err = sample.check_at(later, FRESHNESS).unwrap_err();
        assert_eq!(err.to_string(), "script exhausted");
    }

    #[test]
    fn test_skipped_cycle_clears_error() {
        let base = Instant::now();
        let mut flow = flow_loop(vec![Err(SensorError::acquisition("busy")), frame_at(base, 0)]);
        flow.run_cycle().unwrap_err();
        assert!(flow.sample().error.is_some());

        flow.run_cycle().unwrap();
        assert!(flow.sample().error.is_none());
    }

    #[test]
    fn test_seconds_between() {
        let base = Instant::now();
        let later = base + Duration::from_millis(250);
        assert_eq!(seconds_between(base, later), 0.25);
        assert_eq!(seconds_between(later, base), -0.25);
        assert_eq!(seconds_between(base, base), 0.0);
    }

    /// Stamps every frame with the time it was requested
    struct Live {
        calls: Arc<AtomicUsize>,
    }

    impl FrameSource for Live {
        fn name(&self) -> &str {
            "live"
        }

        fn next_frame(&self) -> Result<Frame, SensorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Frame::now(blank()))
        }
    }

    #[test]
    fn test_sensor_publishes_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = FlowSensorConfig {
            interval_ms: 10,
            ..FlowSensorConfig::new("live")
        };
        let mut sensor = FlowSensor::spawn(
            config,
            Live {
                calls: Arc::clone(&calls),
            },
        )
        .unwrap();
        assert!(sensor.properties().linear_velocity_supported);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sensor.linear_velocity().is_err() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sensor.linear_velocity().unwrap(), Vector3::zeros());
        assert_eq!(sensor.angular_velocity().unwrap(), Vector3::zeros());
        let readings = sensor.readings();
        assert!(readings.status.is_ok());
        assert!(readings.last_update.is_some());
        assert!(readings.last_error.is_none());

        sensor.close();
        assert!(!sensor.is_running());
        let stopped_at = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn test_sensor_requires_camera() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = FlowSensor::spawn(FlowSensorConfig::default(), Live { calls });
        assert!(matches!(result, Err(SensorError::Config(_))));
    }

    #[test]
    fn test_unsupported_readings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sensor = FlowSensor::spawn(FlowSensorConfig::new("live"), Live { calls }).unwrap();
        assert!(matches!(sensor.position(), Err(SensorError::Unsupported(_))));
        assert!(matches!(sensor.orientation(), Err(SensorError::Unsupported(_))));
        assert!(matches!(sensor.compass_heading(), Err(SensorError::Unsupported(_))));
        assert!(matches!(sensor.linear_acceleration(), Err(SensorError::Unsupported(_))));
        let props = sensor.properties();
        assert!(props.angular_velocity_supported && !props.position_supported);
        // dropped here; Drop joins the thread
    }
}
