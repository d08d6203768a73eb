//! ONNX Runtime backends for the CLIP vision encoder and the classification heads.
//!
//! The encoder expects a CLIP ViT-B/32 vision export taking `pixel_values`
//! `[1, 3, 224, 224]` and producing `image_embeds` `[1, 512]`. Heads are the
//! Keras classifiers converted with tf2onnx, `[1, 512]` → `[1, classes]`.
//!
//! Running an `ort` session needs `&mut`, so each session sits behind a
//! `Mutex`. Concurrent requests queue on the session; their tensors are
//! still allocated per call.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use leafscan_core::{ImageTensor, InferenceError, LabelSpace};
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::classifier::LabelClassifier;
use crate::config::ModelConfig;
use crate::embedder::ImageEncoder;
use crate::head::{DenseHead, ScoreHead};
use crate::pipeline::Pipeline;

/// Output used when the encoder exposes several (e.g. `last_hidden_state`).
const EMBEDS_OUTPUT: &str = "image_embeds";

/// CLIP ViT-B/32 projection width.
const DEFAULT_DIM: usize = 512;

/// CLIP vision encoder running on ONNX Runtime.
pub struct OnnxImageEncoder {
    session: Mutex<Session>,
    input_name: String,
    output_index: usize,
    dim: usize,
}

impl OnnxImageEncoder {
    pub fn load(model_path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(
            model_path.exists(),
            "encoder model not found at {model_path:?}"
        );

        let session = Session::builder()?.commit_from_file(model_path)?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| anyhow::anyhow!("encoder model has no inputs"))?;
        let output_index = session
            .outputs()
            .iter()
            .position(|output| output.name() == EMBEDS_OUTPUT)
            .unwrap_or(0);
        let dim = session
            .outputs()
            .get(output_index)
            .and_then(|output| infer_dim(output.dtype()))
            .unwrap_or(DEFAULT_DIM);

        info!(dim, input = %input_name, model = %model_path.display(), "loaded image encoder");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_index,
            dim,
        })
    }
}

impl ImageEncoder for OnnxImageEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn encode(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let input = Tensor::from_array((
            tensor.shape_i64(),
            tensor.as_slice().to_vec().into_boxed_slice(),
        ))
        .map_err(backend)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Backend("encoder session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(backend)?;

        let (shape, data) = outputs[self.output_index]
            .try_extract_tensor::<f32>()
            .map_err(backend)?;
        let dims: &[i64] = shape;
        if dims.last().copied() != Some(self.dim as i64) || data.len() != self.dim {
            return Err(InferenceError::Extraction(format!(
                "unexpected encoder output shape {dims:?}, expected [1, {}]",
                self.dim
            )));
        }
        Ok(data.to_vec())
    }
}

/// Classification head running on ONNX Runtime.
pub struct OnnxHead {
    session: Mutex<Session>,
    input_name: String,
    input_dim: usize,
    num_classes: usize,
}

impl OnnxHead {
    pub fn load(model_path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(model_path.exists(), "head model not found at {model_path:?}");

        let session = Session::builder()?.commit_from_file(model_path)?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| anyhow::anyhow!("head model has no inputs"))?;
        let input_name = input.name().to_string();
        let input_dim = infer_dim(input.dtype())
            .ok_or_else(|| anyhow::anyhow!("cannot read input width of {model_path:?}"))?;
        let num_classes = session
            .outputs()
            .first()
            .and_then(|output| infer_dim(output.dtype()))
            .ok_or_else(|| anyhow::anyhow!("cannot read class count of {model_path:?}"))?;

        info!(input_dim, num_classes, model = %model_path.display(), "loaded classification head");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            input_dim,
            num_classes,
        })
    }
}

impl ScoreHead for OnnxHead {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn scores(&self, embedding: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if embedding.len() != self.input_dim {
            return Err(InferenceError::DimensionMismatch {
                expected: self.input_dim,
                actual: embedding.len(),
            });
        }

        let input = Tensor::from_array((
            [1i64, self.input_dim as i64],
            embedding.to_vec().into_boxed_slice(),
        ))
        .map_err(backend)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Backend("head session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(backend)?;

        let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(backend)?;
        Ok(data.to_vec())
    }
}

/// Load a head by file extension: `.onnx` runs on ONNX Runtime, `.json` is
/// evaluated as dense weights.
pub fn load_head(path: &Path) -> anyhow::Result<Box<dyn ScoreHead>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("onnx") => Ok(Box::new(OnnxHead::load(path)?)),
        Some("json") => Ok(Box::new(DenseHead::load(path)?)),
        _ => anyhow::bail!("unsupported head format: {}", path.display()),
    }
}

pub(crate) fn load_pipeline(config: &ModelConfig) -> anyhow::Result<Pipeline> {
    let encoder = OnnxImageEncoder::load(&config.encoder).context("loading image encoder")?;

    let mut classifiers = Vec::with_capacity(2);
    for space in [LabelSpace::Crop, LabelSpace::Disease] {
        let head = load_head(config.head_path(space))
            .with_context(|| format!("loading {space} head"))?;
        let labels = config.label_map(space)?;
        classifiers.push(LabelClassifier::new(head, labels)?);
    }
    let disease = classifiers.pop().context("disease classifier missing")?;
    let crop = classifiers.pop().context("crop classifier missing")?;

    let pipeline = Pipeline::new(Box::new(encoder), crop, disease)
        .context("embedding model and classifier heads are incompatible")?;
    info!(
        dim = pipeline.embedding_dim(),
        crop_classes = pipeline.crop_labels().len(),
        disease_classes = pipeline.disease_labels().len(),
        "pipeline ready"
    );
    Ok(pipeline)
}

fn backend(err: ort::Error) -> InferenceError {
    InferenceError::Backend(err.to_string())
}

/// Try to read the last dimension of a tensor input/output.
fn infer_dim(value_type: &ort::value::ValueType) -> Option<usize> {
    match value_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::embedder::extract;
    use crate::preprocess::normalize;

    fn model_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("models")
    }

    /// Model-backed tests skip when the ONNX exports have not been downloaded.
    fn require_models() -> Option<ModelConfig> {
        let dir = model_dir();
        let config = ModelConfig::from_model_dir(&dir).ok()?;
        if !config.encoder.exists() || !config.crop_head.exists() || !config.disease_head.exists() {
            eprintln!(
                "skipping: ONNX models not found in {}; export the CLIP vision tower \
                 and both heads there to run this test",
                dir.display()
            );
            return None;
        }
        Some(config)
    }

    fn leaf() -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            32,
            32,
            image::Rgb([0, 255, 0]),
        ))
    }

    #[test]
    fn load_pipeline_from_model_dir() {
        let Some(config) = require_models() else { return };
        let pipeline = Pipeline::load(&config).unwrap();
        assert_eq!(pipeline.embedding_dim(), 512);
        assert_eq!(pipeline.crop_labels().len(), 14);
        assert_eq!(pipeline.disease_labels().len(), 21);
    }

    #[test]
    fn encoder_output_is_unit_norm_after_extract() {
        let Some(config) = require_models() else { return };
        let encoder = OnnxImageEncoder::load(&config.encoder).unwrap();
        let tensor = normalize(&leaf(), false).unwrap();
        let embedding = extract(&encoder, &tensor).unwrap();
        assert_eq!(embedding.dim(), encoder.dim());
        assert!((embedding.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn onnx_inference_is_deterministic() {
        let Some(config) = require_models() else { return };
        let pipeline = Pipeline::load(&config).unwrap();
        let first = pipeline.infer(&leaf()).unwrap();
        let second = pipeline.infer(&leaf()).unwrap();
        assert_eq!(first, second);
        assert!(first.crop.index < 14);
        assert!(first.disease.index < 21);
    }

    #[test]
    fn unknown_head_extension_is_rejected() {
        let err = load_head(Path::new("heads/crop.h5")).err().unwrap();
        assert!(err.to_string().contains("unsupported head format"));
    }

    #[test]
    fn missing_encoder_is_reported() {
        let err = OnnxImageEncoder::load(Path::new("does/not/exist.onnx")).err().unwrap();
        assert!(err.to_string().contains("encoder model not found"));
    }
}
