//! Pose overlay rendering.
//!
//! The [`Renderer`] draws a [`Pose`] onto any [`Canvas`]: red keypoint dots, lime skeleton lines,
//! and the left elbow angle with form feedback.

use nalgebra::Point2;

use crate::angle::{joint_angle, Feedback};
use crate::detector::Topology;
use crate::image::{draw, Color, Image, Resolution};
use crate::pose::{KeypointName, Pose};

pub const KEYPOINT_RADIUS: f32 = 5.0;
pub const KEYPOINT_COLOR: Color = Color::RED;
pub const EDGE_WIDTH: u32 = 2;
pub const EDGE_COLOR: Color = Color::GREEN;
pub const TEXT_COLOR: Color = Color::WHITE;

/// Offset of the angle label from the elbow, in pixels.
const ANGLE_LABEL_OFFSET: (f32, f32) = (10.0, -10.0);
/// Baseline position of the feedback message.
const FEEDBACK_POSITION: (f32, f32) = (10.0, 30.0);

/// A 2D drawing surface.
///
/// Coordinates are in pixels with the origin in the top left corner. Drawing outside of the
/// surface is clipped.
pub trait Canvas {
    fn resolution(&self) -> Resolution;

    /// Erases everything drawn so far, making the surface fully transparent.
    fn clear(&mut self);

    fn fill_circle(&mut self, center: Point2<f32>, radius: f32, color: Color);

    fn line(&mut self, start: Point2<f32>, end: Point2<f32>, color: Color, width: u32);

    /// Draws `text` starting at `position`, which lies on the text's baseline.
    fn text(&mut self, text: &str, position: Point2<f32>, color: Color);
}

impl Canvas for Image {
    fn resolution(&self) -> Resolution {
        Image::resolution(self)
    }

    fn clear(&mut self) {
        Image::clear(self, Color::NULL);
    }

    fn fill_circle(&mut self, center: Point2<f32>, radius: f32, color: Color) {
        let [x, y] = pixel(center);
        draw::circle(self, x, y, radius.round() as u32)
            .color(color)
            .filled();
    }

    fn line(&mut self, start: Point2<f32>, end: Point2<f32>, color: Color, width: u32) {
        let ([sx, sy], [ex, ey]) = (pixel(start), pixel(end));
        draw::line(self, sx, sy, ex, ey)
            .color(color)
            .stroke_width(width);
    }

    fn text(&mut self, text: &str, position: Point2<f32>, color: Color) {
        let [x, y] = pixel(position);
        draw::text(self, x, y, text)
            .color(color)
            .font(draw::FontSize::Large);
    }
}

fn pixel(p: Point2<f32>) -> [i32; 2] {
    [p.x.round() as i32, p.y.round() as i32]
}

/// Draws poses using a fixed skeleton [`Topology`].
#[derive(Debug, Clone)]
pub struct Renderer {
    topology: Topology,
}

impl Renderer {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Replaces the contents of `canvas` with a visualization of `pose`.
    pub fn draw<C: Canvas + ?Sized>(&self, pose: &Pose, canvas: &mut C) {
        canvas.clear();

        for kp in pose.keypoints() {
            canvas.fill_circle(kp.position(), KEYPOINT_RADIUS, KEYPOINT_COLOR);
        }

        for &(a, b) in self.topology.edges() {
            let (Some(a), Some(b)) = (pose.get(a), pose.get(b)) else {
                continue;
            };
            canvas.line(a.position(), b.position(), EDGE_COLOR, EDGE_WIDTH);
        }

        let (Some(shoulder), Some(elbow), Some(wrist)) = (
            pose.find(KeypointName::LeftShoulder),
            pose.find(KeypointName::LeftElbow),
            pose.find(KeypointName::LeftWrist),
        ) else {
            return;
        };
        let angle = match joint_angle(shoulder.position(), elbow.position(), wrist.position()) {
            Ok(angle) => angle,
            Err(e) => {
                log::trace!("{}", e);
                return;
            }
        };

        let (dx, dy) = ANGLE_LABEL_OFFSET;
        canvas.text(
            &format!("Angle: {}", angle.round()),
            Point2::new(elbow.x() + dx, elbow.y() + dy),
            TEXT_COLOR,
        );
        let (fx, fy) = FEEDBACK_POSITION;
        canvas.text(
            Feedback::from_angle(angle).message(),
            Point2::new(fx, fy),
            TEXT_COLOR,
        );
    }
}
