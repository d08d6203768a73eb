//! Image decoding and CLIP ViT-B/32 input normalisation.
//!
//! Production path: shortest side scaled to 224 (bicubic), centre crop to
//! 224x224, pixels scaled to [0, 1], then per-channel mean/std normalisation
//! with the published CLIP statistics. The augmented path inserts random
//! flips, rotation and colour jitter before an exact 224x224 resize.

use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader, RgbImage};
use leafscan_core::tensor::IMAGE_SIZE;
use leafscan_core::{ImageTensor, InferenceError};
use rand::Rng;
use rand::rngs::ThreadRng;

use crate::augment::Augmenter;

/// CLIP per-channel mean (RGB).
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// CLIP per-channel standard deviation (RGB).
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];

const TARGET: u32 = IMAGE_SIZE as u32;

/// Decode an uploaded image, sniffing the format from its bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
    if bytes.is_empty() {
        return Err(InferenceError::InvalidImage("image data is empty".into()));
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| InferenceError::InvalidImage(format!("cannot read image: {e}")))?
        .decode()
        .map_err(|e| InferenceError::InvalidImage(format!("cannot decode image: {e}")))
}

/// Read and decode an image file.
pub fn load_image(path: &Path) -> Result<DynamicImage, InferenceError> {
    let bytes = std::fs::read(path).map_err(|e| {
        InferenceError::InvalidImage(format!("cannot read {}: {e}", path.display()))
    })?;
    decode_image(&bytes)
}

/// Turn an image into the `[1, 3, 224, 224]` tensor the encoder expects.
///
/// `augment` draws from the thread RNG; the production path never does.
pub fn normalize(image: &DynamicImage, augment: bool) -> Result<ImageTensor, InferenceError> {
    if augment {
        normalize_with_rng(image, Some(&mut rand::thread_rng()))
    } else {
        normalize_with_rng::<ThreadRng>(image, None)
    }
}

/// [`normalize`] with an explicit RNG. `None` disables augmentation.
pub fn normalize_with_rng<R: Rng + ?Sized>(
    image: &DynamicImage,
    rng: Option<&mut R>,
) -> Result<ImageTensor, InferenceError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(InferenceError::InvalidImage(format!(
            "image has zero extent ({width}x{height})"
        )));
    }

    let rgb = image.to_rgb8();
    let resized = match rng {
        Some(rng) => {
            let augmented = Augmenter::default().apply(rgb, rng);
            image::imageops::resize(&augmented, TARGET, TARGET, FilterType::Triangle)
        }
        None => resize_center_crop(&rgb),
    };

    to_tensor(&resized)
}

/// Scale the shortest side to 224, then take the central 224x224 window.
///
/// The window is located in source coordinates and cropped before resizing,
/// so the intermediate image never exceeds the source or the target size.
fn resize_center_crop(rgb: &RgbImage) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let (x, crop_w) = center_span(w, h);
    let (y, crop_h) = center_span(h, w);
    let window = image::imageops::crop_imm(rgb, x, y, crop_w, crop_h).to_image();
    image::imageops::resize(&window, TARGET, TARGET, FilterType::CatmullRom)
}

/// Source span `(start, len)` along an axis of length `len` that covers the
/// central 224 pixels once the shortest side (`len` or `other`) is scaled to
/// 224. Offsets round half to even, as torchvision's `CenterCrop` does.
fn center_span(len: u32, other: u32) -> (u32, u32) {
    let target = f64::from(TARGET);
    let len_f = f64::from(len);
    let scaled = (target * len_f / f64::from(len.min(other))).floor().max(target);
    let offset = ((scaled - target) / 2.0).round_ties_even();

    let start = (offset * len_f / scaled).floor() as u32;
    let end = (((offset + target) * len_f / scaled).ceil() as u32).min(len);
    let start = start.min(end.saturating_sub(1));
    (start, (end - start).max(1))
}

/// Scale to [0, 1], normalise per channel, and lay out as NCHW.
fn to_tensor(rgb: &RgbImage) -> Result<ImageTensor, InferenceError> {
    let (w, h) = rgb.dimensions();
    if w != TARGET || h != TARGET {
        return Err(InferenceError::InvalidImage(format!(
            "resized image is {w}x{h}, expected {TARGET}x{TARGET}"
        )));
    }

    let plane = IMAGE_SIZE * IMAGE_SIZE;
    let mut data = vec![0f32; ImageTensor::LEN];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * IMAGE_SIZE + x as usize;
        for (c, &value) in pixel.0.iter().enumerate() {
            data[c * plane + offset] = (value as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }

    ImageTensor::from_vec(data)
}
