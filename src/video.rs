//! Video frame sources.
//!
//! The [`FrameSource`] trait abstracts over where frames come from: a V4L2 [`webcam::Webcam`] or
//! a repeated [`still::StillImage`].

pub mod still;
pub mod webcam;

use crate::image::{Image, Resolution};
use crate::timer::Timer;

/// A blocking source of video frames.
pub trait FrameSource: Send {
    /// Returns the size of the frames produced by this source.
    ///
    /// The resolution is known as soon as the source has been opened.
    fn resolution(&self) -> Resolution;

    /// Reads the next frame, blocking until one is available.
    fn read(&mut self) -> anyhow::Result<Image>;

    /// Returns profiling timers for frame acquisition.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        (**self).read()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}
