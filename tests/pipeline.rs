use std::cell::RefCell;

use formcheck::{
    detector::{Detector, Model, PoseEstimator},
    image::{Color, Image, Resolution},
    pose::{Keypoint, KeypointName, Pose},
    render::{Canvas, Renderer},
    session::{Session, SessionOptions, SessionReport, StopHandle},
    video::still::StillImage,
};
use nalgebra::Point2;

const ELBOW: (f32, f32) = (200.0, 200.0);

/// A 17-keypoint pose whose left arm is bent to 170°, with every other keypoint far away from it.
fn pose_170() -> Pose {
    let (ex, ey) = ELBOW;
    let bend = 10f32.to_radians();
    Pose::new(
        KeypointName::ALL
            .into_iter()
            .map(|name| {
                let (x, y) = match name {
                    KeypointName::LeftShoulder => (ex - 100.0, ey),
                    KeypointName::LeftElbow => (ex, ey),
                    KeypointName::LeftWrist => (ex + 100.0 * bend.cos(), ey + 100.0 * bend.sin()),
                    other => (500.0 + other as usize as f32, 400.0),
                };
                Keypoint::new(name, x, y).with_score(0.8)
            })
            .collect(),
    )
}

struct OnePerson;

impl PoseEstimator for OnePerson {
    fn keypoint_names(&self) -> &[KeypointName] {
        &KeypointName::ALL
    }

    fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<Pose>> {
        Ok(vec![pose_170()])
    }
}

#[derive(Default)]
struct Texts(Vec<(String, Point2<f32>)>);

impl Canvas for Texts {
    fn resolution(&self) -> Resolution {
        Resolution::RES_480P
    }

    fn clear(&mut self) {
        self.0.clear();
    }

    fn fill_circle(&mut self, _: Point2<f32>, _: f32, _: Color) {}

    fn line(&mut self, _: Point2<f32>, _: Point2<f32>, _: Color, _: u32) {}

    fn text(&mut self, text: &str, position: Point2<f32>, _: Color) {
        self.0.push((text.to_string(), position));
    }
}

#[test]
fn angle_and_feedback_text() {
    let mut canvas = Texts::default();
    Renderer::new(Model::MoveNet.topology()).draw(&pose_170(), &mut canvas);

    let (ex, ey) = ELBOW;
    assert_eq!(
        canvas.0,
        [
            ("Angle: 170".to_string(), Point2::new(ex + 10.0, ey - 10.0)),
            ("Good form!".to_string(), Point2::new(10.0, 30.0)),
        ]
    );
}

#[test]
fn session_composes_overlay_onto_frames() {
    let detector = Detector::with_estimator(Model::MoveNet, Box::new(OnePerson)).unwrap();
    let source = StillImage::new(Image::filled(Resolution::RES_480P, Color::BLACK));

    let stop = StopHandle::new();
    let last_frame = RefCell::new(None);
    let presenter = {
        let stop = stop.clone();
        let last_frame = &last_frame;
        let mut count = 0;
        move |frame: &Image| -> anyhow::Result<()> {
            *last_frame.borrow_mut() = Some(frame.clone());
            count += 1;
            if count == 3 {
                stop.request();
            }
            Ok(())
        }
    };

    let report = Session::new(source, detector, presenter)
        .with_options(SessionOptions::default().refresh_rate(0))
        .with_stop_handle(stop.clone())
        .run()
        .unwrap();
    assert_eq!(
        report,
        SessionReport {
            cycles: 3,
            rendered: 3,
            empty: 0,
            failed: 0,
        }
    );

    let frame = last_frame.into_inner().unwrap();
    assert_eq!(frame.resolution(), Resolution::RES_480P);
    // Keypoint dot around the elbow, next to the skeleton lines drawn over its center.
    assert_eq!(frame.get(200, 196), Color::RED);
    // Skeleton line halfway along the upper arm.
    assert_eq!(frame.get(150, 200), Color::GREEN);
    // The feedback text ends up in the top left corner.
    let has_text = (10..100)
        .flat_map(|x| (10..35).map(move |y| (x, y)))
        .any(|(x, y)| frame.get(x, y) == Color::WHITE);
    assert!(has_text);
    // Untouched background.
    assert_eq!(frame.get(600, 20), Color::BLACK);
}
