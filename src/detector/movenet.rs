//! Single-pose MoveNet.
//!
//! MoveNet takes a square NHWC RGB image (192x192 for Lightning, 256x256 for Thunder) and outputs
//! a `[1, 1, 17, 3]` tensor holding `(y, x, score)` for each keypoint, with coordinates normalized
//! to the input square.

use std::{env, path::Path, path::PathBuf};

use anyhow::{bail, Context};

use crate::image::Image;
use crate::nn::Cnn;
use crate::pose::{Keypoint, KeypointName, Pose};
use crate::timer::Timer;

use super::PoseEstimator;

/// Model file used when neither a path is passed nor `FORMCHECK_MODEL` is set.
pub const DEFAULT_MODEL_PATH: &str = "3rdparty/onnx/movenet_singlepose_lightning.onnx";

const ENV_VAR_MODEL: &str = "FORMCHECK_MODEL";

/// Returns the model path from `FORMCHECK_MODEL`, or [`DEFAULT_MODEL_PATH`] if it is not set.
pub fn model_path() -> PathBuf {
    match env::var_os(ENV_VAR_MODEL) {
        Some(path) => {
            log::debug!("model override: `{}` is set to {:?}", ENV_VAR_MODEL, path);
            path.into()
        }
        None => DEFAULT_MODEL_PATH.into(),
    }
}

const NUM_KEYPOINTS: usize = KeypointName::ALL.len();

/// The MoveNet single-pose estimator.
pub struct MoveNet {
    cnn: Cnn,
    t_letterbox: Timer,
    t_infer: Timer,
}

impl MoveNet {
    /// Loads a MoveNet ONNX model.
    ///
    /// The network input must be square, and its only output must have shape `[1, 1, 17, 3]`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let cnn = Cnn::load(path)?;
        let res = cnn.input_resolution();
        if res.width() != res.height() {
            bail!("MoveNet input must be square, '{}' takes {}", path.display(), res);
        }
        check_output_shapes(cnn.output_shapes())
            .with_context(|| format!("'{}' is not a single-pose MoveNet", path.display()))?;
        Ok(Self {
            cnn,
            t_letterbox: Timer::new("letterbox"),
            t_infer: Timer::new("infer"),
        })
    }

}

impl PoseEstimator for MoveNet {
    fn keypoint_names(&self) -> &[KeypointName] {
        &KeypointName::ALL
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_letterbox, &self.t_infer]
    }

    fn estimate(&mut self, image: &Image) -> anyhow::Result<Vec<Pose>> {
        let side = self.cnn.input_resolution().width();
        let (input, scale) = self.t_letterbox.time(|| image.letterbox(side));
        let outputs = self.t_infer.time(|| self.cnn.estimate(&input))?;

        let Some(output) = outputs.first() else {
            bail!("MoveNet produced no outputs");
        };
        if output.shape() != OUTPUT_SHAPE {
            bail!("unexpected MoveNet output shape {:?}", output.shape());
        }

        let pose = decode_keypoints(output.as_slice(), side as f32 / scale);
        Ok(vec![pose])
    }
}

const OUTPUT_SHAPE: [usize; 4] = [1, 1, NUM_KEYPOINTS, 3];

/// Checks that a network has the single `[1, 1, 17, 3]` output of single-pose MoveNet.
fn check_output_shapes(shapes: &[Option<Vec<usize>>]) -> anyhow::Result<()> {
    match shapes {
        [Some(shape)] if shape[..] == OUTPUT_SHAPE => Ok(()),
        [Some(shape)] => bail!("output has shape {:?}, expected {:?}", shape, OUTPUT_SHAPE),
        [None] => bail!("output shape is not fixed, expected {:?}", OUTPUT_SHAPE),
        _ => bail!("network has {} outputs, expected 1", shapes.len()),
    }
}

/// Turns MoveNet's `(y, x, score)` triples into a [`Pose`].
///
/// `extent` is the side length of the input square in frame pixels, so that normalized
/// coordinates map back onto the original frame.
fn decode_keypoints(raw: &[f32], extent: f32) -> Pose {
    let keypoints = KeypointName::ALL
        .into_iter()
        .zip(raw.chunks_exact(3))
        .map(|(name, yxs)| {
            let [y, x, score] = [yxs[0], yxs[1], yxs[2]];
            Keypoint::new(name, x * extent, y * extent).with_score(score)
        })
        .collect::<Vec<_>>();

    let score = keypoints.iter().filter_map(Keypoint::score).sum::<f32>()
        / keypoints.len().max(1) as f32;
    Pose::new(keypoints).with_score(score)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn decodes_into_frame_pixels() {
        let mut raw = vec![0.0; NUM_KEYPOINTS * 3];
        // left_elbow at (x, y) = (0.5, 0.25), score 0.9
        raw[7 * 3..8 * 3].copy_from_slice(&[0.25, 0.5, 0.9]);

        // A 640x480 frame letterboxed into 192x192 has scale 0.3, so the square covers 640 px.
        let pose = decode_keypoints(&raw, 192.0 / 0.3);
        assert_eq!(pose.len(), NUM_KEYPOINTS);

        let elbow = pose.find(KeypointName::LeftElbow).unwrap();
        assert_abs_diff_eq!(elbow.x(), 320.0, epsilon = 1e-3);
        assert_abs_diff_eq!(elbow.y(), 160.0, epsilon = 1e-3);
        assert_eq!(elbow.score(), Some(0.9));
        assert_abs_diff_eq!(pose.score().unwrap(), 0.9 / 17.0, epsilon = 1e-6);
    }

    #[test]
    fn accepts_only_single_pose_output() {
        check_output_shapes(&[Some(vec![1, 1, 17, 3])]).unwrap();

        // Multi-pose MoveNet.
        let err = check_output_shapes(&[Some(vec![1, 6, 56])]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "output has shape [1, 6, 56], expected [1, 1, 17, 3]"
        );
        assert!(check_output_shapes(&[None]).is_err());
        assert!(check_output_shapes(&[]).is_err());
        assert!(check_output_shapes(&[Some(vec![1, 1, 17, 3]), Some(vec![1])]).is_err());
    }

    #[test]
    fn keypoints_keep_output_order() {
        let raw = vec![0.5; NUM_KEYPOINTS * 3];
        let pose = decode_keypoints(&raw, 100.0);
        for (i, kp) in pose.keypoints().iter().enumerate() {
            assert_eq!(kp.name() as usize, i);
        }
    }
}
