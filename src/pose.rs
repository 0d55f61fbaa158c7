//! Poses and their keypoints.

use std::{fmt, str::FromStr};

use nalgebra::Point2;

/// Names of the keypoints reported by MoveNet, in the order the network outputs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeypointName {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointName {
    /// All keypoint names, in network output order.
    pub const ALL: [KeypointName; 17] = {
        use KeypointName::*;
        [
            Nose,
            LeftEye,
            RightEye,
            LeftEar,
            RightEar,
            LeftShoulder,
            RightShoulder,
            LeftElbow,
            RightElbow,
            LeftWrist,
            RightWrist,
            LeftHip,
            RightHip,
            LeftKnee,
            RightKnee,
            LeftAnkle,
            RightAnkle,
        ]
    };

    /// Returns the `snake_case` name of this keypoint, eg. `"left_shoulder"`.
    pub fn as_str(&self) -> &'static str {
        use KeypointName::*;
        match self {
            Nose => "nose",
            LeftEye => "left_eye",
            RightEye => "right_eye",
            LeftEar => "left_ear",
            RightEar => "right_ear",
            LeftShoulder => "left_shoulder",
            RightShoulder => "right_shoulder",
            LeftElbow => "left_elbow",
            RightElbow => "right_elbow",
            LeftWrist => "left_wrist",
            RightWrist => "right_wrist",
            LeftHip => "left_hip",
            RightHip => "right_hip",
            LeftKnee => "left_knee",
            RightKnee => "right_knee",
            LeftAnkle => "left_ankle",
            RightAnkle => "right_ankle",
        }
    }
}

impl fmt::Display for KeypointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown keypoint name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKeypoint(String);

impl fmt::Display for UnknownKeypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown keypoint name '{}'", self.0)
    }
}

impl std::error::Error for UnknownKeypoint {}

impl FromStr for KeypointName {
    type Err = UnknownKeypoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownKeypoint(s.to_string()))
    }
}

/// A named 2D landmark, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    name: KeypointName,
    x: f32,
    y: f32,
    score: Option<f32>,
}

impl Keypoint {
    pub fn new(name: KeypointName, x: f32, y: f32) -> Self {
        Self {
            name,
            x,
            y,
            score: None,
        }
    }

    pub fn with_score(self, score: f32) -> Self {
        Self {
            score: Some(score),
            ..self
        }
    }

    #[inline]
    pub fn name(&self) -> KeypointName {
        self.name
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.y
    }

    #[inline]
    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.x, self.y)
    }

    /// The detector's confidence in this keypoint, if it reports one.
    #[inline]
    pub fn score(&self) -> Option<f32> {
        self.score
    }
}

/// All keypoints detected for a single subject in one frame.
///
/// Keypoints keep the order the detector produced them in, so that skeleton edges can refer to
/// them by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pose {
    keypoints: Vec<Keypoint>,
    score: Option<f32>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self {
            keypoints,
            score: None,
        }
    }

    pub fn with_score(self, score: f32) -> Self {
        Self {
            score: Some(score),
            ..self
        }
    }

    #[inline]
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Returns the keypoint at `index` in detector output order.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }

    /// Returns the first keypoint with the given name.
    pub fn find(&self, name: KeypointName) -> Option<&Keypoint> {
        self.keypoints.iter().find(|kp| kp.name == name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    #[inline]
    pub fn score(&self) -> Option<f32> {
        self.score
    }

    /// Applies `f` to every keypoint position.
    pub fn map_positions(&mut self, mut f: impl FnMut(f32, f32) -> (f32, f32)) {
        for kp in &mut self.keypoints {
            (kp.x, kp.y) = f(kp.x, kp.y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_in_output_order() {
        for (i, name) in KeypointName::ALL.into_iter().enumerate() {
            assert_eq!(name as usize, i);
            assert_eq!(name.as_str().parse::<KeypointName>(), Ok(name));
        }
        assert!("left_toe".parse::<KeypointName>().is_err());
    }

    #[test]
    fn find_by_name() {
        let pose = Pose::new(vec![
            Keypoint::new(KeypointName::LeftShoulder, 1.0, 2.0),
            Keypoint::new(KeypointName::LeftElbow, 3.0, 4.0).with_score(0.5),
        ]);

        let elbow = pose.find(KeypointName::LeftElbow).unwrap();
        assert_eq!(elbow.position(), Point2::new(3.0, 4.0));
        assert_eq!(elbow.score(), Some(0.5));
        assert!(pose.find(KeypointName::LeftWrist).is_none());
        assert_eq!(pose.get(0).map(|kp| kp.name()), Some(KeypointName::LeftShoulder));
        assert!(pose.get(2).is_none());
    }

    #[test]
    fn map_positions() {
        let mut pose = Pose::new(vec![Keypoint::new(KeypointName::Nose, 0.5, 0.25)]);
        pose.map_positions(|x, y| (x * 640.0, y * 480.0));
        assert_eq!(pose.keypoints()[0].x(), 320.0);
        assert_eq!(pose.keypoints()[0].y(), 120.0);
    }
}
