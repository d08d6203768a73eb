//! Two-stage inference: one embedding per image, two classifiers on top.
//!
//! ```text
//! image ─► normalize ─► extract ─► embedding ─┬─► crop classifier    ─► Prediction
//!                                             └─► disease classifier ─► Prediction
//! ```
//!
//! The embedding is computed once and shared by both classifiers. A
//! [`Pipeline`] is built once at startup and is read-only afterwards, so it
//! can be shared across threads behind an `Arc` without locking.

use image::DynamicImage;
use leafscan_core::{Diagnosis, ImageTensor, InferenceError, LabelMap};
use rand::Rng;
use tracing::debug;

use crate::classifier::LabelClassifier;
use crate::embedder::{ImageEncoder, extract};
use crate::preprocess::{decode_image, normalize, normalize_with_rng};

/// Fully loaded inference context: encoder plus crop and disease classifiers.
pub struct Pipeline {
    encoder: Box<dyn ImageEncoder>,
    crop: LabelClassifier,
    disease: LabelClassifier,
}

impl Pipeline {
    /// Assemble a pipeline, checking that both heads accept the encoder's
    /// embedding width.
    pub fn new(
        encoder: Box<dyn ImageEncoder>,
        crop: LabelClassifier,
        disease: LabelClassifier,
    ) -> Result<Self, InferenceError> {
        for classifier in [&crop, &disease] {
            if classifier.input_dim() != encoder.dim() {
                return Err(InferenceError::DimensionMismatch {
                    expected: classifier.input_dim(),
                    actual: encoder.dim(),
                });
            }
        }
        Ok(Self {
            encoder,
            crop,
            disease,
        })
    }

    /// Load encoder, heads and label maps described by `config`.
    #[cfg(feature = "onnx")]
    pub fn load(config: &crate::config::ModelConfig) -> anyhow::Result<Self> {
        crate::onnx::load_pipeline(config)
    }

    /// Classify an image in both label spaces.
    pub fn infer(&self, image: &DynamicImage) -> Result<Diagnosis, InferenceError> {
        let tensor = normalize(image, false)?;
        self.diagnose(&tensor)
    }

    /// Decode an uploaded file and classify it.
    pub fn infer_bytes(&self, bytes: &[u8]) -> Result<Diagnosis, InferenceError> {
        let image = decode_image(bytes)?;
        self.infer(&image)
    }

    /// Classify a randomly augmented copy of the image.
    pub fn infer_augmented<R: Rng + ?Sized>(
        &self,
        image: &DynamicImage,
        rng: &mut R,
    ) -> Result<Diagnosis, InferenceError> {
        let tensor = normalize_with_rng(image, Some(rng))?;
        self.diagnose(&tensor)
    }

    fn diagnose(&self, tensor: &ImageTensor) -> Result<Diagnosis, InferenceError> {
        let embedding = extract(self.encoder.as_ref(), tensor)?;
        let crop = self.crop.classify(&embedding)?;
        let disease = self.disease.classify(&embedding)?;
        debug!(
            crop = crop.index,
            crop_name = %crop.name,
            disease = disease.index,
            disease_name = %disease.name,
            "diagnosis"
        );
        Ok(Diagnosis { crop, disease })
    }

    pub fn embedding_dim(&self) -> usize {
        self.encoder.dim()
    }

    pub fn crop_labels(&self) -> &LabelMap {
        self.crop.labels()
    }

    pub fn disease_labels(&self) -> &LabelMap {
        self.disease.labels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{Rgb, RgbImage};
    use leafscan_core::LabelSpace;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::head::{Activation, DenseHead, DenseLayer, ScoreHead};

    const DIM: usize = 8;

    /// Encoder that summarises channel statistics and counts its calls.
    struct CountingEncoder {
        calls: Arc<AtomicUsize>,
    }

    impl ImageEncoder for CountingEncoder {
        fn dim(&self) -> usize {
            DIM
        }

        fn encode(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let means: Vec<f32> = (0..3)
                .map(|c| tensor.channel(c).iter().sum::<f32>() / tensor.channel(c).len() as f32)
                .collect();
            Ok(vec![
                means[0],
                means[1],
                means[2],
                1.0,
                means[0] * means[1],
                means[1] * means[2],
                means[0] - means[2],
                0.5,
            ])
        }
    }

    /// Head wrapper that counts how often it scores.
    struct CountingHead {
        inner: DenseHead,
        calls: Arc<AtomicUsize>,
    }

    impl ScoreHead for CountingHead {
        fn input_dim(&self) -> usize {
            self.inner.input_dim()
        }

        fn num_classes(&self) -> usize {
            self.inner.num_classes()
        }

        fn scores(&self, embedding: &[f32]) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.scores(embedding)
        }
    }

    fn dense_head(input: usize, classes: usize, seed: f32) -> DenseHead {
        let hidden = 16;
        let kernel = |rows: usize, cols: usize, salt: f32| -> Vec<Vec<f32>> {
            (0..rows)
                .map(|r| {
                    (0..cols)
                        .map(|c| ((r * cols + c) as f32 * 0.731 + salt).sin())
                        .collect()
                })
                .collect()
        };
        DenseHead::new(vec![
            DenseLayer {
                kernel: kernel(input, hidden, seed),
                bias: vec![0.01; hidden],
                activation: Activation::Relu,
            },
            DenseLayer {
                kernel: kernel(hidden, classes, seed + 1.0),
                bias: vec![0.0; classes],
                activation: Activation::Softmax,
            },
        ])
        .unwrap()
    }

    struct Counters {
        encoder: Arc<AtomicUsize>,
        crop: Arc<AtomicUsize>,
        disease: Arc<AtomicUsize>,
    }

    fn pipeline() -> (Pipeline, Counters) {
        let counters = Counters {
            encoder: Arc::new(AtomicUsize::new(0)),
            crop: Arc::new(AtomicUsize::new(0)),
            disease: Arc::new(AtomicUsize::new(0)),
        };
        let crop = LabelClassifier::new(
            Box::new(CountingHead {
                inner: dense_head(DIM, 14, 0.3),
                calls: counters.crop.clone(),
            }),
            LabelMap::crop(),
        )
        .unwrap();
        let disease = LabelClassifier::new(
            Box::new(CountingHead {
                inner: dense_head(DIM, 21, 2.1),
                calls: counters.disease.clone(),
            }),
            LabelMap::disease(),
        )
        .unwrap();
        let encoder = CountingEncoder {
            calls: counters.encoder.clone(),
        };
        let pipeline = Pipeline::new(Box::new(encoder), crop, disease).unwrap();
        (pipeline, counters)
    }

    fn solid_green() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([0, 255, 0])))
    }

    fn png(image: &DynamicImage) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn solid_green_leaf_end_to_end() {
        let (pipeline, _) = pipeline();
        let diagnosis = pipeline.infer(&solid_green()).unwrap();

        assert!(diagnosis.crop.index <= 13);
        assert!(diagnosis.disease.index <= 20);
        assert_eq!(
            Some(diagnosis.crop.name.as_str()),
            LabelMap::crop().get(diagnosis.crop.index)
        );
        assert_eq!(
            Some(diagnosis.disease.name.as_str()),
            LabelMap::disease().get(diagnosis.disease.index)
        );
    }

    #[test]
    fn inference_is_deterministic() {
        let (pipeline, _) = pipeline();
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(50, 40, |x, y| {
            Rgb([(x * 5) as u8, 120, (y * 6) as u8])
        }));
        let first = pipeline.infer(&image).unwrap();
        let second = pipeline.infer(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedding_is_computed_once_per_image() {
        let (pipeline, counters) = pipeline();
        pipeline.infer(&solid_green()).unwrap();
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 1);
        assert_eq!(counters.crop.load(Ordering::SeqCst), 1);
        assert_eq!(counters.disease.load(Ordering::SeqCst), 1);

        pipeline.infer(&solid_green()).unwrap();
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn extracted_embedding_is_unit_norm() {
        let (pipeline, _) = pipeline();
        for color in [[0, 255, 0], [90, 60, 30], [255, 255, 255]] {
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(color)));
            let tensor = normalize(&image, false).unwrap();
            let embedding = extract(pipeline.encoder.as_ref(), &tensor).unwrap();
            assert_eq!(embedding.dim(), pipeline.embedding_dim());
            assert!(
                (embedding.norm() - 1.0).abs() < 1e-5,
                "expected unit norm, got {}",
                embedding.norm()
            );
        }
    }

    #[test]
    fn empty_upload_fails_before_any_model_runs() {
        let (pipeline, counters) = pipeline();
        let err = pipeline.infer_bytes(&[]).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 0);
        assert_eq!(counters.crop.load(Ordering::SeqCst), 0);
        assert_eq!(counters.disease.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_extent_image_fails_before_any_model_runs() {
        let (pipeline, counters) = pipeline();
        let err = pipeline
            .infer(&DynamicImage::ImageRgb8(RgbImage::new(0, 0)))
            .unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn infer_bytes_matches_infer() {
        let (pipeline, _) = pipeline();
        let image = solid_green();
        assert_eq!(
            pipeline.infer_bytes(&png(&image)).unwrap(),
            pipeline.infer(&image).unwrap()
        );
    }

    #[test]
    fn degenerate_embedding_aborts_inference() {
        struct ZeroEncoder;
        impl ImageEncoder for ZeroEncoder {
            fn dim(&self) -> usize {
                DIM
            }
            fn encode(&self, _: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
                Ok(vec![0.0; DIM])
            }
        }

        let (_, counters) = pipeline();
        let crop = LabelClassifier::new(
            Box::new(CountingHead {
                inner: dense_head(DIM, 14, 0.3),
                calls: counters.crop.clone(),
            }),
            LabelMap::crop(),
        )
        .unwrap();
        let disease =
            LabelClassifier::new(Box::new(dense_head(DIM, 21, 2.1)), LabelMap::disease()).unwrap();
        let pipeline = Pipeline::new(Box::new(ZeroEncoder), crop, disease).unwrap();

        let err = pipeline.infer(&solid_green()).unwrap_err();
        assert!(matches!(err, InferenceError::Extraction(_)));
        assert_eq!(counters.crop.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mismatched_head_is_rejected_at_construction() {
        let (_, counters) = pipeline();
        let crop =
            LabelClassifier::new(Box::new(dense_head(DIM, 14, 0.3)), LabelMap::crop()).unwrap();
        let disease =
            LabelClassifier::new(Box::new(dense_head(DIM + 4, 21, 2.1)), LabelMap::disease())
                .unwrap();
        let encoder = CountingEncoder {
            calls: counters.encoder,
        };
        let err = Pipeline::new(Box::new(encoder), crop, disease)
            .err()
            .expect("pipeline should reject the disease head");
        assert_eq!(
            err,
            InferenceError::DimensionMismatch {
                expected: DIM + 4,
                actual: DIM
            }
        );
    }

    #[test]
    fn augmented_inference_is_well_formed() {
        let (pipeline, counters) = pipeline();
        let mut rng = StdRng::seed_from_u64(11);
        let diagnosis = pipeline.infer_augmented(&solid_green(), &mut rng).unwrap();
        assert!(diagnosis.crop.index < 14);
        assert!(diagnosis.disease.index < 21);
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn label_maps_match_classifier_widths() {
        let (pipeline, _) = pipeline();
        assert_eq!(pipeline.crop_labels().len(), 14);
        assert_eq!(pipeline.disease_labels().len(), 21);
        assert_eq!(pipeline.crop_labels().space(), LabelSpace::Crop);
        assert_eq!(pipeline.disease_labels().space(), LabelSpace::Disease);
    }

    #[test]
    fn pipeline_is_shareable_across_threads() {
        let (pipeline, counters) = pipeline();
        let pipeline = Arc::new(pipeline);
        let expected = pipeline.infer(&solid_green()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || pipeline.infer(&solid_green()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
        assert_eq!(counters.encoder.load(Ordering::SeqCst), 5);
    }
}
