//! Pose detection.
//!
//! A [`Detector`] bundles a per-frame [`PoseEstimator`] with the skeleton [`Topology`] of the model
//! it runs, so that skeleton edges always index keypoints the same way the estimator orders them.

pub mod movenet;

use std::{fmt, path::PathBuf, thread};

use itertools::Itertools;
use pawawwewism::{promise, PromiseHandle};

use crate::image::Image;
use crate::pose::{KeypointName, Pose};
use crate::timer::Timer;

use self::movenet::MoveNet;

/// Pose estimation architectures supported by [`Detector::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Model {
    /// Single-pose MoveNet (Lightning or Thunder), reporting 17 keypoints.
    MoveNet,
}

impl Model {
    /// Returns the skeleton topology of this model.
    pub fn topology(&self) -> Topology {
        match self {
            Model::MoveNet => Topology::new(MOVENET_EDGES),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::MoveNet => f.write_str("MoveNet"),
        }
    }
}

/// Adjacent keypoint pairs of MoveNet's COCO keypoint layout.
const MOVENET_EDGES: &[(usize, usize)] = &[
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 7),
    (5, 11),
    (6, 8),
    (6, 12),
    (7, 9),
    (8, 10),
    (11, 12),
    (11, 13),
    (12, 14),
    (13, 15),
    (14, 16),
];

/// The fixed graph of keypoint pairs that are connected by skeleton lines.
///
/// Edges refer to keypoints by their index in a [`Pose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    edges: Vec<(usize, usize)>,
}

impl Topology {
    pub fn new(edges: &[(usize, usize)]) -> Self {
        Self {
            edges: edges.to_vec(),
        }
    }

    #[inline]
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Checks that every edge refers to a keypoint in a pose of `num_keypoints` keypoints.
    pub fn validate(&self, num_keypoints: usize) -> Result<(), TopologyMismatch> {
        let bad = self
            .edges
            .iter()
            .copied()
            .filter(|&(a, b)| a >= num_keypoints || b >= num_keypoints)
            .collect::<Vec<_>>();
        if bad.is_empty() {
            Ok(())
        } else {
            Err(TopologyMismatch { num_keypoints, bad })
        }
    }
}

/// Error returned when a [`Topology`] references keypoints an estimator does not produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMismatch {
    num_keypoints: usize,
    bad: Vec<(usize, usize)>,
}

impl fmt::Display for TopologyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skeleton edges {} reference keypoints outside of the {} the estimator produces",
            self.bad.iter().map(|(a, b)| format!("{a}-{b}")).join(", "),
            self.num_keypoints,
        )
    }
}

impl std::error::Error for TopologyMismatch {}

/// Trait for per-frame pose estimation backends.
pub trait PoseEstimator: Send {
    /// The keypoints every returned [`Pose`] contains, in order.
    fn keypoint_names(&self) -> &[KeypointName];

    /// Returns profiling timers for the stages of estimation.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }

    /// Estimates the poses visible in `image`.
    ///
    /// Keypoint positions are in `image`'s pixel coordinates. An empty list means nobody was
    /// detected.
    fn estimate(&mut self, image: &Image) -> anyhow::Result<Vec<Pose>>;
}

/// A pose estimator bound to a [`Model`] and its validated [`Topology`].
pub struct Detector {
    model: Model,
    topology: Topology,
    estimator: Box<dyn PoseEstimator>,
    t_estimate: Timer,
}

impl Detector {
    /// Loads the network for `model` from `path`.
    ///
    /// This can take a long time (reading and optimizing the network). Failures are not retried.
    pub fn load(model: Model, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        log::info!("loading {} from '{}'", model, path.display());
        let estimator: Box<dyn PoseEstimator> = match model {
            Model::MoveNet => Box::new(MoveNet::load(&path)?),
        };
        Ok(Self::with_estimator(model, estimator)?)
    }

    /// Loads the detector on a background thread.
    ///
    /// The caller has to [`block`][PromiseHandle::block] on the returned handle before it can use
    /// the detector.
    pub fn spawn_load(
        model: Model,
        path: impl Into<PathBuf>,
    ) -> std::io::Result<PromiseHandle<anyhow::Result<Detector>>> {
        let path = path.into();
        let (promise, handle) = promise();
        thread::Builder::new()
            .name("detector loader".into())
            .spawn(move || promise.fulfill(Detector::load(model, path)))?;
        Ok(handle)
    }

    /// Creates a detector from an already constructed estimator.
    ///
    /// Fails if the model's topology refers to keypoints the estimator does not produce.
    pub fn with_estimator(
        model: Model,
        estimator: Box<dyn PoseEstimator>,
    ) -> Result<Self, TopologyMismatch> {
        let topology = model.topology();
        topology.validate(estimator.keypoint_names().len())?;
        Ok(Self {
            model,
            topology,
            estimator,
            t_estimate: Timer::new("estimate"),
        })
    }

    #[inline]
    pub fn model(&self) -> Model {
        self.model
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Estimates the poses in `image`.
    pub fn estimate(&mut self, image: &Image) -> anyhow::Result<Vec<Pose>> {
        let estimator = &mut self.estimator;
        self.t_estimate.time(|| estimator.estimate(image))
    }

    /// Returns profiling timers for pose estimation.
    pub fn timers(&self) -> impl IntoIterator<Item = &Timer> + '_ {
        std::iter::once(&self.t_estimate).chain(self.estimator.timers())
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("model", &self.model)
            .field("edges", &self.topology.edges().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<KeypointName>);

    impl PoseEstimator for Fixed {
        fn keypoint_names(&self) -> &[KeypointName] {
            &self.0
        }

        fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<Pose>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn movenet_topology_fits_movenet_keypoints() {
        let topology = Model::MoveNet.topology();
        assert_eq!(topology.edges().len(), 16);
        topology.validate(KeypointName::ALL.len()).unwrap();
    }

    #[test]
    fn rejects_estimator_with_too_few_keypoints() {
        let estimator = Fixed(KeypointName::ALL[..15].to_vec());
        let err = Detector::with_estimator(Model::MoveNet, Box::new(estimator)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "skeleton edges 13-15, 14-16 reference keypoints outside of the 15 the estimator produces"
        );
    }

    struct Staged(Timer);

    impl PoseEstimator for Staged {
        fn keypoint_names(&self) -> &[KeypointName] {
            &KeypointName::ALL
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.0]
        }

        fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<Pose>> {
            self.0.time(|| Ok(Vec::new()))
        }
    }

    #[test]
    fn reports_estimator_timers() {
        let estimator = Staged(Timer::new("stage"));
        let mut detector = Detector::with_estimator(Model::MoveNet, Box::new(estimator)).unwrap();
        detector.estimate(&Image::new(4, 4)).unwrap();

        let shown = detector
            .timers()
            .into_iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>();
        assert_eq!(shown.len(), 2);
        assert!(shown[0].starts_with("estimate: 1x"), "{shown:?}");
        assert!(shown[1].starts_with("stage: 1x"), "{shown:?}");
    }

    #[test]
    fn accepts_matching_estimator() {
        let estimator = Fixed(KeypointName::ALL.to_vec());
        let mut detector = Detector::with_estimator(Model::MoveNet, Box::new(estimator)).unwrap();
        assert_eq!(detector.model(), Model::MoveNet);
        assert!(detector.estimate(&Image::new(4, 4)).unwrap().is_empty());
    }
}
