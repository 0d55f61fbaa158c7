//! A minimal window for showing the annotated camera feed.
//!
//! [`run`] takes over the main thread for the windowing event loop (which some platforms require)
//! and runs the application on a separate thread. The application shows frames with
//! [`show_image`] or through a [`Presenter`].

mod renderer;

use std::{
    collections::{hash_map::Entry, HashMap},
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::{Mutex, OnceLock},
    thread,
};

use anyhow::anyhow;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget},
    window::WindowId,
};

use crate::image::{Image, Resolution};
use crate::session::{Present, StopHandle};

use self::renderer::{Gpu, Renderer, Window};

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
    stop: StopHandle,
}

impl Gui {
    fn new(stop: StopHandle) -> anyhow::Result<Self> {
        Ok(Self {
            gpu: Rc::new(pollster::block_on(Gpu::open())?),
            windows: HashMap::new(),
            win_id_to_key: HashMap::new(),
            stop,
        })
    }

    fn show(
        &mut self,
        target: &EventLoopWindowTarget<Msg>,
        key: String,
        res: Resolution,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let renderer = match self.windows.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("creating window for image '{}' at {res}", entry.key());
                let win = Window::open(target, entry.key(), res)?;
                self.win_id_to_key.insert(win.win.id(), entry.key().clone());
                entry.insert(Renderer::new(win, self.gpu.clone())?)
            }
        };

        renderer.update_texture(res, data);
        renderer.window().request_redraw();
        Ok(())
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            match event {
                Event::UserEvent(Msg::Image { key }) => {
                    let Some(frame) = DISPLAY.get().and_then(|d| d.pending.take(&key)) else {
                        return;
                    };
                    // Once a window was closed, frames still in flight are dropped.
                    if self.stop.is_requested() {
                        return;
                    }
                    if let Err(e) = self.show(target, key, frame.res, &frame.data) {
                        log::error!("failed to show image: {:#}", e);
                        self.stop.request();
                    }
                }
                Event::RedrawRequested(window) => {
                    if let Some(renderer) = self
                        .win_id_to_key
                        .get(&window)
                        .and_then(|key| self.windows.get_mut(key))
                    {
                        renderer.redraw();
                    }
                }
                Event::WindowEvent {
                    window_id,
                    event: WindowEvent::CloseRequested,
                } => {
                    if let Some(key) = self.win_id_to_key.remove(&window_id) {
                        log::info!("window '{key}' closed, stopping");
                        self.windows.remove(&key);
                    }
                    self.stop.request();
                }
                _ => {}
            }
        });
    }
}

#[derive(Debug)]
enum Msg {
    /// A new frame for the window `key` is waiting in [`Display::pending`].
    Image { key: String },
}

#[derive(Debug)]
struct Frame {
    res: Resolution,
    data: Vec<u8>,
}

/// The most recent not yet displayed frame of every window.
///
/// A producer that outpaces the event loop replaces its pending frame instead of queueing more.
#[derive(Debug, Default)]
struct PendingFrames(Mutex<HashMap<String, Frame>>);

impl PendingFrames {
    /// Stores `frame` as the latest one for `key`.
    ///
    /// Returns `true` if no frame was pending, meaning the event loop has to be notified.
    fn put(&self, key: &str, frame: Frame) -> bool {
        let mut frames = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        frames.insert(key.to_string(), frame).is_none()
    }

    fn take(&self, key: &str) -> Option<Frame> {
        let mut frames = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        frames.remove(key)
    }
}

struct Display {
    proxy: Mutex<EventLoopProxy<Msg>>,
    pending: PendingFrames,
}

static DISPLAY: OnceLock<Display> = OnceLock::new();

fn send(key: String, frame: Frame) -> anyhow::Result<()> {
    let display = DISPLAY
        .get()
        .ok_or_else(|| anyhow!("GUI event loop is not running"))?;
    if !display.pending.put(&key, frame) {
        return Ok(());
    }
    display
        .proxy
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .send_event(Msg::Image { key })
        .map_err(|_closed| anyhow!("GUI event loop has exited"))
}

/// Runs `app` on a background thread while the main thread drives the GUI.
///
/// Closing any window calls [`StopHandle::request`] on `stop`. Once `app` returns, the process
/// exits: with status 0 on success, or 1 after printing the error chain.
pub fn run<F>(stop: StopHandle, app: F) -> !
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    let display = Display {
        proxy: Mutex::new(event_loop.create_proxy()),
        pending: PendingFrames::default(),
    };
    if DISPLAY.set(display).is_err() {
        panic!("GUI already initialized");
    }

    let gui = match Gui::new(stop) {
        Ok(gui) => gui,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            process::exit(1);
        }
    };

    thread::spawn(move || match catch_unwind(AssertUnwindSafe(app)) {
        Ok(Ok(())) => process::exit(0),
        Ok(Err(e)) => {
            eprintln!("Error: {:?}", e);
            process::exit(1);
        }
        // The panic message was already printed. 101 is what libstd exits with.
        Err(_payload) => process::exit(101),
    });

    gui.run(event_loop);
}

/// Displays an image in the window titled `key`, creating the window on first use.
pub fn show_image(key: impl Into<String>, image: &Image) -> anyhow::Result<()> {
    // Image data is RGBA8 internally, so no conversion before GPU upload is needed.
    send(
        key.into(),
        Frame {
            res: image.resolution(),
            data: image.data().to_vec(),
        },
    )
}

/// Presents session frames in a window.
#[derive(Debug, Clone)]
pub struct Presenter {
    title: String,
}

impl Presenter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Present for Presenter {
    fn present(&mut self, frame: &Image) -> anyhow::Result<()> {
        show_image(self.title.as_str(), frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32) -> Frame {
        Frame {
            res: Resolution::new(width, 1),
            data: vec![0; width as usize * 4],
        }
    }

    #[test]
    fn only_latest_frame_is_kept() {
        let pending = PendingFrames::default();
        assert!(pending.put("cam", frame(1)));
        assert!(!pending.put("cam", frame(2)));
        assert!(!pending.put("cam", frame(3)));
        assert!(pending.put("other", frame(4)));

        assert_eq!(pending.take("cam").unwrap().res, Resolution::new(3, 1));
        assert!(pending.take("cam").is_none());
        assert!(pending.put("cam", frame(5)));
        assert_eq!(pending.take("other").unwrap().res.width(), 4);
    }
}
