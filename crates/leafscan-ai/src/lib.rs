//! Inference layer: CLIP image preprocessing, embedding extraction, and the
//! crop/disease classification heads, with ONNX Runtime backends.

pub mod augment;
pub mod classifier;
pub mod config;
pub mod embedder;
pub mod head;
pub mod pipeline;
pub mod preprocess;

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use onnx::{OnnxHead, OnnxImageEncoder, load_head};

pub use augment::{AugmentConfig, Augmenter};
pub use classifier::{LabelClassifier, argmax, select};
pub use config::ModelConfig;
pub use embedder::{ImageEncoder, extract};
pub use head::{Activation, DenseHead, DenseLayer, ScoreHead};
pub use pipeline::Pipeline;
pub use preprocess::{decode_image, load_image, normalize, normalize_with_rng};
