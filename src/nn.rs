//! Neural Network inference.
//!
//! Thin wrapper around [`tract_onnx`] that loads an ONNX model, exposes its single image input,
//! and runs it on RGB8 image data.

use std::{path::Path, sync::Arc};

use anyhow::{bail, Context};
use tract_onnx::prelude::{
    tvec, DatumType, Framework, Graph, InferenceModelExt, SimplePlan, TValue, Tensor, TypedFact,
    TypedOp,
};

use crate::image::{Image, Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Element type of a network's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputElement {
    U8,
    I32,
    F32,
}

/// A convolutional neural network taking a single NHWC RGB image as input.
///
/// This is a cheaply [`Clone`]able handle to the underlying network.
#[derive(Clone)]
pub struct Cnn(Arc<CnnImpl>);

struct CnnImpl {
    plan: Model,
    input_res: Resolution,
    element: InputElement,
    output_shapes: Vec<Option<Vec<usize>>>,
}

impl Cnn {
    /// Loads and optimizes an ONNX model from the file system.
    ///
    /// The path must have an `.onnx` extension. The network must have exactly one input of shape
    /// `[1, height, width, 3]` with element type `u8`, `i32` or `f32`. Color values are passed
    /// through unscaled (in `0..=255`). All outputs must be `f32` tensors.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read ONNX model '{}'", path.display()))?
            .into_optimized()?;

        if graph.inputs.len() != 1 {
            bail!(
                "CNN has to take exactly 1 input, this one takes {}",
                graph.inputs.len()
            );
        }

        let fact = graph.input_fact(0)?;
        let element = match fact.datum_type {
            DatumType::U8 => InputElement::U8,
            DatumType::I32 => InputElement::I32,
            DatumType::F32 => InputElement::F32,
            other => bail!("unsupported CNN input element type {:?}", other),
        };
        let input_res = match fact.shape.as_concrete() {
            Some(&[1, h, w, 3]) => Resolution::new(w.try_into()?, h.try_into()?),
            _ => bail!("invalid NHWC model input shape: {:?}", fact.shape),
        };

        let mut output_shapes = Vec::with_capacity(graph.outputs.len());
        for i in 0..graph.outputs.len() {
            let fact = graph.output_fact(i)?;
            if fact.datum_type != DatumType::F32 {
                bail!(
                    "CNN output {} has element type {:?}, expected F32",
                    i,
                    fact.datum_type
                );
            }
            output_shapes.push(fact.shape.as_concrete().map(<[usize]>::to_vec));
        }

        let plan = SimplePlan::new(graph)?;

        log::debug!(
            "loaded '{}': input {} ({:?}), outputs {:?}",
            path.display(),
            input_res,
            element,
            output_shapes,
        );

        Ok(Self(Arc::new(CnnImpl {
            plan,
            input_res,
            element,
            output_shapes,
        })))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.0.input_res
    }

    /// Returns the shape of every output, or `None` for outputs whose shape is not fixed.
    #[inline]
    pub fn output_shapes(&self) -> &[Option<Vec<usize>>] {
        &self.0.output_shapes
    }

    /// Runs the network on an image that already has the input resolution.
    ///
    /// Returns the shape and data of every `f32` output.
    pub fn estimate(&self, image: &Image) -> anyhow::Result<Vec<Output>> {
        let res = self.input_resolution();
        if image.resolution() != res {
            bail!(
                "CNN input image has resolution {}, expected {}",
                image.resolution(),
                res
            );
        }

        let shape = [1, res.height() as usize, res.width() as usize, 3];
        let rgb = image
            .data()
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]]);
        let tensor = match self.0.element {
            InputElement::U8 => Tensor::from_shape(&shape, &rgb.collect::<Vec<u8>>())?,
            InputElement::I32 => {
                Tensor::from_shape(&shape, &rgb.map(i32::from).collect::<Vec<_>>())?
            }
            InputElement::F32 => {
                Tensor::from_shape(&shape, &rgb.map(f32::from).collect::<Vec<_>>())?
            }
        };

        let outputs = self.0.plan.run(tvec![TValue::from_const(Arc::new(tensor))])?;
        outputs
            .iter()
            .map(|value| {
                Ok(Output {
                    shape: value.shape().to_vec(),
                    data: value.as_slice::<f32>()?.to_vec(),
                })
            })
            .collect()
    }
}

/// A network output tensor.
#[derive(Debug, Clone)]
pub struct Output {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Output {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
