//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::{cmp::Reverse, env};

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::image::{Image, Resolution};
use crate::timer::Timer;

use super::FrameSource;

/// Indicates whether to prefer a higher resolution or frame rate.
///
/// By default, [`ParamPreference::Resolution`] is used, selecting the closest resolution at the
/// desired frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ParamPreference {
    /// Prefer keeping the resolution over higher frame rates.
    #[default]
    Resolution,
    /// Prefer higher frame rate over keeping the resolution.
    Framerate,
}

#[derive(Debug, Clone, Copy)]
struct FramePrefs {
    resolution: Option<Resolution>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Format negotiation options.
///
/// The default options request a 640x480 stream.
pub struct WebcamOptions {
    name: Option<String>,
    frame: FramePrefs,
}

impl Default for WebcamOptions {
    fn default() -> Self {
        Self {
            name: None,
            frame: FramePrefs {
                resolution: Some(Resolution::RES_480P),
                fps: None,
                pref: ParamPreference::Resolution,
            },
        }
    }
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired image resolution.
    ///
    /// The smallest supported resolution at least this large is selected. If the webcam cannot
    /// deliver it, the largest available one is used instead.
    #[inline]
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.frame.resolution = Some(resolution);
        self
    }

    /// Sets the desired frame rate.
    #[inline]
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to keep the resolution or the frame rate when the webcam cannot deliver
    /// both.
    #[inline]
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

fn negotiate_format(device: &Device, mut prefs: FramePrefs) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    loop {
        if let Some(fmt) = negotiate_format_step(&formats, prefs) {
            return Ok((
                PixFormat::new(
                    fmt.resolution.width(),
                    fmt.resolution.height(),
                    pixel_format,
                ),
                fmt.frame_interval,
            ));
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        match prefs.pref {
            ParamPreference::Resolution => {
                if prefs.fps.take().is_none() && prefs.resolution.take().is_none() {
                    break;
                }
            }
            ParamPreference::Framerate => {
                if prefs.resolution.take().is_none() && prefs.fps.take().is_none() {
                    break;
                }
            }
        }
        log::debug!("retrying with new prefs {:?}", prefs);
    }

    bail!("failed to negotiate a webcam format")
}

/// Picks the best format satisfying `prefs`.
///
/// Among eligible formats, the one closest to the requested resolution wins (or the largest one if
/// none was requested), with ties broken by frame rate (or the other way around when preferring
/// frame rate).
fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let eligible = formats.iter().filter(|fmt| {
        prefs.resolution.map_or(true, |res| {
            fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
        }) && prefs.fps.map_or(true, |fps| {
            (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
        })
    });

    // Larger keys are better.
    let size_key = |fmt: &FrameFormat| {
        let pixels = fmt.resolution.num_pixels() as i64;
        if prefs.resolution.is_some() {
            -pixels
        } else {
            pixels
        }
    };
    match prefs.pref {
        ParamPreference::Resolution => eligible
            .max_by_key(|fmt| (size_key(fmt), Reverse(fmt.frame_interval)))
            .copied(),
        ParamPreference::Framerate => eligible
            .max_by_key(|fmt| (Reverse(fmt.frame_interval), size_key(fmt)))
            .copied(),
    }
}

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

const ENV_VAR_WEBCAM_NAME: &str = "FORMCHECK_WEBCAM_NAME";

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds). Once it returns, the frame size is known.
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        if let Ok(name) = env::var(ENV_VAR_WEBCAM_NAME) {
            log::debug!(
                "webcam override: `{}` is set to '{}'",
                ENV_VAR_WEBCAM_NAME,
                name,
            );
        }
        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{}", e);
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                }
            }
        }

        bail!("no supported webcam device found")
    }

    fn open_impl(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        let cam_name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = &options.name.as_deref().or(cam_name_from_env.as_deref()) {
            if caps.card() != *name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, options.frame)?;

        let capture = dev.video_capture(pixfmt)?;

        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        match format.pixelformat() {
            Pixelformat::JPEG | Pixelformat::MJPG => {}
            other => bail!("unsupported pixel format {}", other),
        }

        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream(2)?;

        Ok(Some(Self {
            stream,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let dequeue_guard = self.t_dequeue.start();
        let res = self.resolution;
        let t_decode = &self.t_decode;
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let image = match t_decode.time(|| Image::decode_jpeg(&buf)) {
                    Ok(image) => image,
                    Err(e) => {
                        // Webcams occasionally emit corrupted MJPG frames. A blank frame keeps the
                        // loop going without doubling the latency of the next one.
                        log::error!("webcam decode error: {}", e);
                        Image::new(res.width(), res.height())
                    }
                };
                Ok(image)
            })
            .map_err(Into::into)
    }

    /// Returns the negotiated frame size.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Returns profiling timers for webcam access and decoding.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue, &self.t_decode].into_iter()
    }
}

impl FrameSource for Webcam {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        Webcam::read(self)
    }

    fn timers(&self) -> Vec<&Timer> {
        Webcam::timers(self).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            resolution: Resolution::new(w, h),
            frame_interval: Fract::new(1, fps),
        }
    }

    fn prefs(resolution: Option<Resolution>, fps: Option<u32>) -> FramePrefs {
        FramePrefs {
            resolution,
            fps,
            pref: ParamPreference::Resolution,
        }
    }

    #[test]
    fn picks_closest_resolution_at_least_as_large() {
        let formats = [
            fmt(320, 240, 30),
            fmt(640, 480, 30),
            fmt(1280, 720, 30),
            fmt(1920, 1080, 30),
        ];
        let picked = negotiate_format_step(&formats, prefs(Some(Resolution::RES_480P), None));
        assert_eq!(picked.unwrap().resolution, Resolution::RES_480P);
    }

    #[test]
    fn prefers_higher_frame_rate_at_same_size() {
        let formats = [fmt(640, 480, 15), fmt(640, 480, 30), fmt(1280, 720, 60)];
        let picked = negotiate_format_step(&formats, prefs(Some(Resolution::RES_480P), None));
        let picked = picked.unwrap();
        assert_eq!(picked.resolution, Resolution::RES_480P);
        assert!(picked.frame_interval == Fract::new(1, 30));
    }

    #[test]
    fn largest_without_resolution_preference() {
        let formats = [fmt(640, 480, 30), fmt(1280, 720, 30)];
        let picked = negotiate_format_step(&formats, prefs(None, None));
        assert_eq!(picked.unwrap().resolution, Resolution::RES_720P);
    }

    #[test]
    fn nothing_eligible() {
        let formats = [fmt(320, 240, 30)];
        assert!(negotiate_format_step(&formats, prefs(Some(Resolution::RES_480P), None)).is_none());
        assert!(negotiate_format_step(&formats, prefs(None, Some(60))).is_none());
    }
}
