//! Webcam pose estimation with live joint-angle feedback.
//!
//! A [`session::Session`] reads frames from a [`video::FrameSource`], runs a
//! [`detector::Detector`] on them, draws the first detected pose with [`render::Renderer`], and
//! presents the result (usually in a [`gui`] window). The angle at the left elbow decides whether
//! the user is told "Good form!" or "Adjust your arm!".
//!
//! # Coordinates
//!
//! All 2D positions are in image pixels, with X pointing right and Y pointing down.
//!
//! # Environment Variables
//!
//! Some behavior can be overridden by setting environment variables:
//!
//! * `FORMCHECK_MODEL`: Path to the MoveNet ONNX model to load when none is passed on the command
//!   line. Defaults to [`detector::movenet::DEFAULT_MODEL_PATH`].
//! * `FORMCHECK_JPEG_BACKEND`: Configures the JPEG image decoder to use. Allowed values are:
//!   * `jpeg-decoder` (the default): uses the [jpeg-decoder] crate.
//!   * `image`: uses the JPEG support of the [image] crate.
//! * `FORMCHECK_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s created without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//!
//! [jpeg-decoder]: https://github.com/image-rs/jpeg-decoder/
//! [image]: https://github.com/image-rs/image
//! [`Webcam`]: video::webcam::Webcam

use log::LevelFilter;

pub mod angle;
pub mod detector;
pub mod gui;
pub mod image;
pub mod nn;
pub mod pose;
pub mod render;
pub mod session;
pub mod timer;
pub mod video;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `wgpu` will always log at *warn* level. `RUST_LOG` takes precedence over all of these.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
