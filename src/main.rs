use std::{env, path::PathBuf};

use anyhow::{anyhow, bail};
use formcheck::{
    detector::{movenet, Detector, Model},
    gui,
    session::{Session, StopHandle},
    video::{
        still::StillImage,
        webcam::{Webcam, WebcamOptions},
        FrameSource,
    },
};

/// Frame rate still images are fed into the loop at.
const STILL_IMAGE_FPS: u32 = 30;

struct Args {
    model: PathBuf,
    image: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut model = None;
    let mut image = None;
    for arg in env::args_os().skip(1).map(PathBuf::from) {
        let slot = match arg.extension() {
            Some(ext) if ext == "onnx" => &mut model,
            _ => &mut image,
        };
        if slot.replace(arg).is_some() {
            bail!("usage: formcheck [MODEL.onnx] [IMAGE]");
        }
    }

    Ok(Args {
        model: model.unwrap_or_else(movenet::model_path),
        image,
    })
}

fn main() {
    formcheck::init_logger!();

    let stop = StopHandle::new();
    gui::run(stop.clone(), move || app(stop));
}

fn app(stop: StopHandle) -> anyhow::Result<()> {
    let args = parse_args()?;

    // Loading the network takes a while, do it while the camera starts up.
    let detector = Detector::spawn_load(Model::MoveNet, args.model)?;

    let source: Box<dyn FrameSource> = match args.image {
        Some(path) => Box::new(StillImage::load(path)?.with_fps(STILL_IMAGE_FPS)),
        None => Box::new(Webcam::open(WebcamOptions::default())?),
    };
    log::info!("capturing at {}", source.resolution());

    let detector = detector
        .block()
        .map_err(|_| anyhow!("detector loader thread exited without a result"))??;

    Session::new(source, detector, gui::Presenter::new("formcheck"))
        .with_stop_handle(stop)
        .run()?;
    Ok(())
}
