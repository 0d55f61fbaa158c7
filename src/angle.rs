//! Joint angle measurement and form feedback.

use std::fmt;

use nalgebra::Point2;

/// Feedback is positive for angles strictly above this value, in degrees.
pub const GOOD_FORM_THRESHOLD: f32 = 150.0;

/// Error returned by [`joint_angle`] when one of the limb segments has zero length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngleUndefined {
    _priv: (),
}

impl fmt::Display for AngleUndefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("joint angle is undefined for degenerate limb segments")
    }
}

impl std::error::Error for AngleUndefined {}

/// Computes the angle at joint `b` between the segments `b -> a` and `b -> c`, in degrees.
///
/// The result is the undirected angle in `[0, 180]`: `joint_angle(a, b, c)` and
/// `joint_angle(c, b, a)` agree.
///
/// Returns [`AngleUndefined`] if `a` or `c` coincide with `b`, or if any coordinate is not
/// finite.
pub fn joint_angle(
    a: Point2<f32>,
    b: Point2<f32>,
    c: Point2<f32>,
) -> Result<f32, AngleUndefined> {
    let ba = a - b;
    let bc = c - b;
    if !(ba.iter().chain(bc.iter()).all(|v| v.is_finite()))
        || ba.norm_squared() == 0.0
        || bc.norm_squared() == 0.0
    {
        return Err(AngleUndefined { _priv: () });
    }

    let radians = bc.y.atan2(bc.x) - ba.y.atan2(ba.x);
    let mut degrees = radians.to_degrees().abs();
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    // Rounding near ±2π can land a hair outside the range.
    Ok(degrees.clamp(0.0, 180.0))
}

/// Qualitative feedback derived from a joint angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// The arm is extended far enough.
    GoodForm,
    /// The arm is bent too much.
    AdjustArm,
}

impl Feedback {
    pub fn from_angle(degrees: f32) -> Self {
        if degrees > GOOD_FORM_THRESHOLD {
            Feedback::GoodForm
        } else {
            Feedback::AdjustArm
        }
    }

    /// The message shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Feedback::GoodForm => "Good form!",
            Feedback::AdjustArm => "Adjust your arm!",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn p(x: f32, y: f32) -> Point2<f32> {
        Point2::new(x, y)
    }

    #[test]
    fn right_angle() {
        let angle = joint_angle(p(1.0, 0.0), p(0.0, 0.0), p(0.0, 1.0)).unwrap();
        assert_abs_diff_eq!(angle, 90.0, epsilon = 1e-4);
    }

    #[test]
    fn collinear() {
        let straight = joint_angle(p(-3.0, 0.0), p(0.0, 0.0), p(2.0, 0.0)).unwrap();
        assert_abs_diff_eq!(straight, 180.0, epsilon = 1e-4);

        let folded = joint_angle(p(1.0, 1.0), p(0.0, 0.0), p(5.0, 5.0)).unwrap();
        assert_abs_diff_eq!(folded, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn reflex_difference_is_normalized() {
        // atan2 difference of 270° must be reported as 90°.
        let angle = joint_angle(p(0.0, -1.0), p(0.0, 0.0), p(-1.0, 0.0)).unwrap();
        assert_abs_diff_eq!(angle, 90.0, epsilon = 1e-4);
    }

    #[test]
    fn degenerate_segments() {
        assert!(joint_angle(p(0.0, 0.0), p(0.0, 0.0), p(1.0, 0.0)).is_err());
        assert!(joint_angle(p(1.0, 0.0), p(0.0, 0.0), p(0.0, 0.0)).is_err());
        assert!(joint_angle(p(f32::NAN, 0.0), p(0.0, 0.0), p(1.0, 0.0)).is_err());
        assert!(joint_angle(p(1.0, 0.0), p(0.0, 0.0), p(f32::INFINITY, 0.0)).is_err());
    }

    #[test]
    fn random_points_stay_in_range_and_symmetric() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let mut coord = || rng.f32() * 1280.0 - 320.0;

        for _ in 0..10_000 {
            let (a, b, c) = (p(coord(), coord()), p(coord(), coord()), p(coord(), coord()));
            let (Ok(abc), Ok(cba)) = (joint_angle(a, b, c), joint_angle(c, b, a)) else {
                continue;
            };
            assert!((0.0..=180.0).contains(&abc), "{abc} for {a} {b} {c}");
            assert_abs_diff_eq!(abc, cba, epsilon = 1e-3);
        }
    }

    #[test]
    fn feedback_threshold_is_strict() {
        assert_eq!(Feedback::from_angle(150.0), Feedback::AdjustArm);
        assert_eq!(Feedback::from_angle(150.01), Feedback::GoodForm);
        assert_eq!(Feedback::from_angle(0.0).to_string(), "Adjust your arm!");
        assert_eq!(Feedback::from_angle(180.0).to_string(), "Good form!");
    }
}
