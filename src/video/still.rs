//! A frame source that repeats a single image.

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use crate::image::{Image, Resolution};

use super::FrameSource;

/// Yields the same [`Image`] on every read.
///
/// Useful for checking a pose in a photo, and for driving the detection loop in tests. Reads can
/// optionally be throttled to emulate a camera's frame rate.
#[derive(Debug, Clone)]
pub struct StillImage {
    image: Image,
    interval: Option<Duration>,
    last_read: Option<Instant>,
}

impl StillImage {
    pub fn new(image: Image) -> Self {
        Self {
            image,
            interval: None,
            last_read: None,
        }
    }

    /// Loads the image to repeat from the filesystem.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let image = Image::load(path)?;
        log::info!("using still image '{}' ({})", path.display(), image.resolution());
        Ok(Self::new(image))
    }

    /// Limits reads to at most `fps` frames per second.
    pub fn with_fps(self, fps: u32) -> Self {
        Self {
            interval: Some(Duration::from_secs(1) / fps.max(1)),
            ..self
        }
    }
}

impl FrameSource for StillImage {
    fn resolution(&self) -> Resolution {
        self.image.resolution()
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        if let (Some(interval), Some(last)) = (self.interval, self.last_read) {
            let next = last + interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }
        self.last_read = Some(Instant::now());
        Ok(self.image.clone())
    }
}
