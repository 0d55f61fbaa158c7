//! The capture, inference and render loop.
//!
//! A [`Session`] owns a [`FrameSource`] and a [`Detector`]. Each cycle it reads a frame, estimates
//! poses, draws the first pose onto a transparent overlay, composes frame and overlay, hands the
//! result to a [`Present`] implementation, and then waits for the next display refresh.
//!
//! The session's lifecycle is observable and controllable through a [`StopHandle`].

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::detector::Detector;
use crate::image::{Color, Image};
use crate::render::Renderer;
use crate::timer::FpsCounter;
use crate::video::FrameSource;

/// Lifecycle states of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, but [`Session::run`] has not been called yet.
    Idle,
    /// The detection loop is running.
    Running,
    /// A stop was requested or the loop failed; resources are being released.
    Stopping,
    /// The frame source and detector have been released.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A cloneable handle for stopping a [`Session`] and observing its state.
///
/// Requesting a stop is honored at the start of the next cycle.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<Lifecycle>,
}

struct Lifecycle {
    stop: AtomicBool,
    state: Mutex<SessionState>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Lifecycle {
                stop: AtomicBool::new(false),
                state: Mutex::new(SessionState::Idle),
            }),
        }
    }

    /// Asks the session to stop. Idempotent.
    pub fn request(&self) {
        if !self.inner.stop.swap(true, Ordering::SeqCst) {
            log::debug!("stop requested");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Returns the current state of the session this handle belongs to.
    pub fn state(&self) -> SessionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn enter(&self, state: SessionState) {
        let mut current = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        log::debug!("session: {} -> {}", *current, state);
        *current = state;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("requested", &self.is_requested())
            .field("state", &self.state())
            .finish()
    }
}

/// Options controlling a [`Session`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    refresh_rate: u32,
    retain_overlay_on_miss: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_rate: 60,
            retain_overlay_on_miss: false,
        }
    }
}

impl SessionOptions {
    /// Sets the display refresh rate that cycles are paced to, in Hz.
    ///
    /// A rate of 0 disables pacing. Defaults to 60 Hz.
    #[inline]
    pub fn refresh_rate(self, hz: u32) -> Self {
        Self {
            refresh_rate: hz,
            ..self
        }
    }

    /// Keeps the previous overlay on frames where no pose was detected, instead of clearing it.
    #[inline]
    pub fn retain_overlay_on_miss(self, retain: bool) -> Self {
        Self {
            retain_overlay_on_miss: retain,
            ..self
        }
    }
}

/// Limits a loop to one iteration per refresh interval.
#[derive(Debug)]
pub struct FramePacer {
    interval: Option<Duration>,
    release_target: Instant,
}

impl FramePacer {
    /// Creates a pacer for `hz` iterations per second. `0` means no pacing.
    pub fn new(hz: u32) -> Self {
        Self {
            interval: (hz != 0).then(|| Duration::from_secs(1) / hz),
            release_target: Instant::now(),
        }
    }

    /// Blocks until the next refresh tick is due.
    pub fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        thread::sleep(self.release_target.saturating_duration_since(Instant::now()));
        self.release_target = Instant::now() + interval;
    }
}

/// Destination of composed frames (typically a window).
pub trait Present {
    fn present(&mut self, frame: &Image) -> anyhow::Result<()>;
}

impl<F: FnMut(&Image) -> anyhow::Result<()>> Present for F {
    fn present(&mut self, frame: &Image) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Counters collected while a [`Session`] ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Number of frames processed.
    pub cycles: u64,
    /// Frames on which a pose was drawn.
    pub rendered: u64,
    /// Frames on which nobody was detected.
    pub empty: u64,
    /// Frames on which pose estimation failed.
    pub failed: u64,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} rendered, {} empty, {} failed)",
            self.cycles, self.rendered, self.empty, self.failed
        )
    }
}

/// Drives the per-frame detection loop.
pub struct Session<S, P> {
    source: S,
    detector: Detector,
    presenter: P,
    options: SessionOptions,
    stop: StopHandle,
}

impl<S: FrameSource, P: Present> Session<S, P> {
    pub fn new(source: S, detector: Detector, presenter: P) -> Self {
        Self {
            source,
            detector,
            presenter,
            options: SessionOptions::default(),
            stop: StopHandle::new(),
        }
    }

    pub fn with_options(self, options: SessionOptions) -> Self {
        Self { options, ..self }
    }

    /// Makes the session obey `stop` instead of its own handle.
    pub fn with_stop_handle(self, stop: StopHandle) -> Self {
        Self { stop, ..self }
    }

    /// Returns a handle that stops this session.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the loop until a stop is requested.
    ///
    /// Pose estimation errors are logged and counted, but never end the loop. Failing to read a
    /// frame or to present one ends the loop with that error. Either way, the frame source and
    /// detector are dropped before this returns.
    pub fn run(self) -> anyhow::Result<SessionReport> {
        let Session {
            source,
            detector,
            mut presenter,
            options,
            stop,
        } = self;

        stop.enter(SessionState::Running);
        let mut report = SessionReport::default();
        let result = run_loop(source, detector, &mut presenter, options, &stop, &mut report);
        stop.enter(SessionState::Stopped);

        log::info!("session ended after {}", report);
        result.map(|()| report)
    }
}

/// Tracks consecutive estimation failures, so that only the first of a streak is logged as an
/// error.
#[derive(Debug, Default)]
struct FailureStreak {
    len: u64,
}

impl FailureStreak {
    /// Records a failure and returns the level to log it at.
    fn fail(&mut self) -> log::Level {
        self.len += 1;
        if self.len == 1 {
            log::Level::Error
        } else {
            log::Level::Debug
        }
    }

    /// Ends the current streak, returning its length if frames were failing.
    fn recover(&mut self) -> Option<u64> {
        match mem::take(&mut self.len) {
            0 => None,
            len => Some(len),
        }
    }
}

fn run_loop<S: FrameSource, P: Present>(
    mut source: S,
    mut detector: Detector,
    presenter: &mut P,
    options: SessionOptions,
    stop: &StopHandle,
    report: &mut SessionReport,
) -> anyhow::Result<()> {
    let renderer = Renderer::new(detector.topology().clone());
    let res = source.resolution();
    let mut overlay = Image::filled(res, Color::NULL);
    let mut pacer = FramePacer::new(options.refresh_rate);
    let mut fps = FpsCounter::new("formcheck");
    let mut failures = FailureStreak::default();

    let result = loop {
        if stop.is_requested() {
            break Ok(());
        }

        let mut frame = match source.read() {
            Ok(frame) => frame,
            Err(e) => break Err(e),
        };
        report.cycles += 1;

        if frame.resolution() != overlay.resolution() {
            log::debug!("frame size changed to {}", frame.resolution());
            overlay = Image::filled(frame.resolution(), Color::NULL);
        }
        if !options.retain_overlay_on_miss {
            overlay.clear(Color::NULL);
        }

        let poses = match detector.estimate(&frame) {
            Ok(poses) => {
                if let Some(failed) = failures.recover() {
                    log::info!("pose estimation recovered after {} failed frames", failed);
                }
                if poses.is_empty() {
                    report.empty += 1;
                }
                poses
            }
            Err(e) => {
                log::log!(failures.fail(), "pose estimation failed: {:#}", e);
                report.failed += 1;
                Vec::new()
            }
        };
        if let Some(pose) = poses.first() {
            renderer.draw(pose, &mut overlay);
            report.rendered += 1;
        }

        frame.blend_from(&overlay);
        if let Err(e) = presenter.present(&frame) {
            break Err(e);
        }

        fps.tick_with(source.timers().into_iter().chain(detector.timers()));
        pacer.wait();
    };

    stop.enter(SessionState::Stopping);
    drop(source);
    drop(detector);
    result
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::anyhow;

    use crate::detector::{Model, PoseEstimator};
    use crate::image::Resolution;
    use crate::pose::{Keypoint, KeypointName, Pose};
    use crate::video::still::StillImage;

    use super::*;

    /// Replays a fixed list of estimation results, then reports nobody.
    struct Scripted(VecDeque<anyhow::Result<Vec<Pose>>>);

    impl PoseEstimator for Scripted {
        fn keypoint_names(&self) -> &[KeypointName] {
            &KeypointName::ALL
        }

        fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<Pose>> {
            self.0.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn detector(script: Vec<anyhow::Result<Vec<Pose>>>) -> Detector {
        Detector::with_estimator(Model::MoveNet, Box::new(Scripted(script.into()))).unwrap()
    }

    fn nose() -> Pose {
        Pose::new(vec![Keypoint::new(KeypointName::Nose, 8.0, 8.0)])
    }

    fn source() -> StillImage {
        StillImage::new(Image::filled(Resolution::new(16, 16), Color::BLUE))
    }

    /// Runs a session for `frames` cycles and returns the report and the center pixel of every
    /// presented frame.
    fn run(
        script: Vec<anyhow::Result<Vec<Pose>>>,
        options: SessionOptions,
        frames: usize,
    ) -> (SessionReport, Vec<Color>) {
        let stop = StopHandle::new();
        let mut presented = Vec::new();
        let report = {
            let presented = &mut presented;
            let stopper = stop.clone();
            let presenter = move |frame: &Image| -> anyhow::Result<()> {
                presented.push(frame.get(8, 8));
                if presented.len() == frames {
                    stopper.request();
                }
                Ok(())
            };
            Session::new(source(), detector(script), presenter)
                .with_options(options.refresh_rate(0))
                .with_stop_handle(stop.clone())
                .run()
                .unwrap()
        };
        assert_eq!(stop.state(), SessionState::Stopped);
        (report, presented)
    }

    #[test]
    fn no_poses_keeps_looping_without_drawing() {
        let (report, presented) = run(Vec::new(), SessionOptions::default(), 5);
        assert_eq!(
            report,
            SessionReport {
                cycles: 5,
                rendered: 0,
                empty: 5,
                failed: 0
            }
        );
        assert!(presented.iter().all(|&c| c == Color::BLUE));
    }

    #[test]
    fn draws_first_pose() {
        let other = Pose::new(vec![Keypoint::new(KeypointName::Nose, 0.0, 0.0)]);
        let (report, presented) = run(vec![Ok(vec![nose(), other])], SessionOptions::default(), 1);
        assert_eq!(report.rendered, 1);
        assert_eq!(presented, [Color::RED]);
    }

    #[test]
    fn estimation_errors_are_not_fatal() {
        let script = vec![
            Err(anyhow!("inference exploded")),
            Ok(vec![nose()]),
            Err(anyhow!("again")),
            Ok(Vec::new()),
        ];
        let (report, presented) = run(script, SessionOptions::default(), 4);
        assert_eq!(
            report,
            SessionReport {
                cycles: 4,
                rendered: 1,
                empty: 1,
                failed: 2
            }
        );
        assert_eq!(
            presented,
            [Color::BLUE, Color::RED, Color::BLUE, Color::BLUE]
        );
    }

    #[test]
    fn repeated_failures_are_logged_once_as_error() {
        let mut failures = FailureStreak::default();
        assert_eq!(failures.recover(), None);
        assert_eq!(failures.fail(), log::Level::Error);
        assert_eq!(failures.fail(), log::Level::Debug);
        assert_eq!(failures.fail(), log::Level::Debug);
        assert_eq!(failures.recover(), Some(3));
        assert_eq!(failures.recover(), None);
        assert_eq!(failures.fail(), log::Level::Error);
    }

    #[test]
    fn overlay_is_cleared_on_miss() {
        let script = vec![Ok(vec![nose()]), Ok(Vec::new())];
        let (_, presented) = run(script, SessionOptions::default(), 2);
        assert_eq!(presented, [Color::RED, Color::BLUE]);
    }

    #[test]
    fn overlay_can_be_retained_on_miss() {
        let script = vec![Ok(vec![nose()]), Ok(Vec::new()), Err(anyhow!("boom"))];
        let options = SessionOptions::default().retain_overlay_on_miss(true);
        let (_, presented) = run(script, options, 3);
        assert_eq!(presented, [Color::RED, Color::RED, Color::RED]);
    }

    #[test]
    fn stop_before_run() {
        let session = Session::new(
            source(),
            detector(Vec::new()),
            |_: &Image| -> anyhow::Result<()> { panic!("nothing should be presented") },
        );
        let stop = session.stop_handle();
        assert_eq!(stop.state(), SessionState::Idle);
        stop.request();

        let report = session.run().unwrap();
        assert_eq!(report, SessionReport::default());
        assert_eq!(stop.state(), SessionState::Stopped);
    }

    #[test]
    fn present_error_ends_session() {
        let session = Session::new(
            source(),
            detector(Vec::new()),
            |_: &Image| -> anyhow::Result<()> { Err(anyhow!("window is gone")) },
        );
        let stop = session.stop_handle();
        let err = session.run().unwrap_err();
        assert_eq!(err.to_string(), "window is gone");
        assert_eq!(stop.state(), SessionState::Stopped);
    }

    #[test]
    fn pacer_limits_rate() {
        let mut pacer = FramePacer::new(100);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
