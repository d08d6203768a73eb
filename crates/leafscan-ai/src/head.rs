//! Classification heads: embedding → one score per class.
//!
//! [`DenseHead`] evaluates a small feed-forward network in pure Rust from a
//! JSON weight export. The ONNX-backed head lives in the `onnx` module.

use std::path::Path;

use anyhow::Context;
use leafscan_core::InferenceError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Maps an embedding to a score per class. Higher is better.
pub trait ScoreHead: Send + Sync {
    /// Embedding width the head was trained on.
    fn input_dim(&self) -> usize;

    /// Number of scores returned by [`scores`](Self::scores).
    fn num_classes(&self) -> usize;

    fn scores(&self, embedding: &[f32]) -> Result<Vec<f32>, InferenceError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

/// Fully connected layer in Keras layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `[inputs][outputs]` weight matrix, as `Dense.get_weights()[0]`.
    pub kernel: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.kernel.len()
    }

    fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = self.bias.clone();
        for (x, row) in input.iter().zip(&self.kernel) {
            for (o, w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        match self.activation {
            Activation::Linear => {}
            Activation::Relu => out.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Softmax => softmax(&mut out),
        }
        out
    }
}

/// Feed-forward classifier evaluated on the CPU.
///
/// Deserialising goes through [`DenseHead::new`], so a parsed head has the
/// same shape guarantees as a constructed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDenseHead")]
pub struct DenseHead {
    layers: Vec<DenseLayer>,
}

#[derive(Deserialize)]
struct RawDenseHead {
    layers: Vec<DenseLayer>,
}

impl TryFrom<RawDenseHead> for DenseHead {
    type Error = anyhow::Error;

    fn try_from(raw: RawDenseHead) -> anyhow::Result<Self> {
        Self::new(raw.layers)
    }
}

impl DenseHead {
    /// Build a head, checking that consecutive layer shapes line up.
    pub fn new(layers: Vec<DenseLayer>) -> anyhow::Result<Self> {
        anyhow::ensure!(!layers.is_empty(), "dense head has no layers");

        for (i, layer) in layers.iter().enumerate() {
            anyhow::ensure!(
                layer.inputs() > 0 && layer.outputs() > 0,
                "layer {i} has an empty kernel or bias"
            );
            if let Some(bad) = layer.kernel.iter().position(|row| row.len() != layer.outputs()) {
                anyhow::bail!(
                    "layer {i}: kernel row {bad} has {} weights, bias has {}",
                    layer.kernel[bad].len(),
                    layer.outputs()
                );
            }
        }
        for (i, pair) in layers.windows(2).enumerate() {
            anyhow::ensure!(
                pair[0].outputs() == pair[1].inputs(),
                "layer {i} outputs {} values but layer {} takes {}",
                pair[0].outputs(),
                i + 1,
                pair[1].inputs()
            );
        }

        Ok(Self { layers })
    }

    /// Parse `{"layers": [{"kernel": [[...]], "bias": [...], "activation": "relu"}, ...]}`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parsing dense head weights")
    }

    /// Load a JSON weight export from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading head weights {}", path.display()))?;
        let head = Self::from_json(&json).with_context(|| format!("loading {}", path.display()))?;
        info!(
            input_dim = head.input_dim(),
            classes = head.num_classes(),
            layers = head.layers.len(),
            path = %path.display(),
            "loaded dense classification head"
        );
        Ok(head)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }
}

impl ScoreHead for DenseHead {
    fn input_dim(&self) -> usize {
        self.layers[0].inputs()
    }

    fn num_classes(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    fn scores(&self, embedding: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if embedding.len() != self.input_dim() {
            return Err(InferenceError::DimensionMismatch {
                expected: self.input_dim(),
                actual: embedding.len(),
            });
        }
        let mut activations = embedding.to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        Ok(activations)
    }
}

/// In-place numerically stable softmax.
fn softmax(v: &mut [f32]) {
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in v.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    if sum > 0.0 {
        for x in v.iter_mut() {
            *x /= sum;
        }
    }
}
