//! Random image augmentation for offline robustness checks.
//!
//! Mirrors the torchvision pipeline the heads were evaluated with: random
//! horizontal and vertical flips, a random rotation, and colour jitter of
//! brightness, contrast, saturation and hue. Never used on the production
//! inference path.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rand::Rng;
use rand::seq::SliceRandom;

/// Augmentation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentConfig {
    pub horizontal_flip_p: f64,
    pub vertical_flip_p: f64,
    /// Rotation angle is drawn from `[-max_rotation, max_rotation]` degrees.
    pub max_rotation: f32,
    /// Brightness factor is drawn from `[1 - brightness, 1 + brightness]`.
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Hue shift, as a fraction of the colour wheel, from `[-hue, hue]`. At most 0.5.
    pub hue: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_p: 0.5,
            vertical_flip_p: 0.5,
            max_rotation: 20.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.1,
        }
    }
}

impl AugmentConfig {
    /// A config that leaves every image unchanged.
    pub fn identity() -> Self {
        Self {
            horizontal_flip_p: 0.0,
            vertical_flip_p: 0.0,
            max_rotation: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            hue: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Jitter {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
    Hue(f32),
}

/// Applies [`AugmentConfig`] to RGB images.
#[derive(Debug, Clone, Default)]
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Flip, rotate and colour-jitter an image. Output has the input's dimensions.
    pub fn apply<R: Rng + ?Sized>(&self, mut image: RgbImage, rng: &mut R) -> RgbImage {
        let cfg = &self.config;

        if cfg.horizontal_flip_p > 0.0 && rng.gen_bool(cfg.horizontal_flip_p.min(1.0)) {
            image::imageops::flip_horizontal_in_place(&mut image);
        }
        if cfg.vertical_flip_p > 0.0 && rng.gen_bool(cfg.vertical_flip_p.min(1.0)) {
            image::imageops::flip_vertical_in_place(&mut image);
        }

        if cfg.max_rotation > 0.0 {
            let angle = rng.gen_range(-cfg.max_rotation..=cfg.max_rotation);
            image = rotate(&image, angle);
        }

        // Factors are drawn first, then applied in a random order.
        let mut jitters = Vec::with_capacity(4);
        if cfg.brightness > 0.0 {
            jitters.push(Jitter::Brightness(factor(rng, cfg.brightness)));
        }
        if cfg.contrast > 0.0 {
            jitters.push(Jitter::Contrast(factor(rng, cfg.contrast)));
        }
        if cfg.saturation > 0.0 {
            jitters.push(Jitter::Saturation(factor(rng, cfg.saturation)));
        }
        if cfg.hue > 0.0 {
            let hue = cfg.hue.min(0.5);
            jitters.push(Jitter::Hue(rng.gen_range(-hue..=hue)));
        }
        jitters.shuffle(rng);

        for jitter in jitters {
            match jitter {
                Jitter::Brightness(f) => adjust_brightness(&mut image, f),
                Jitter::Contrast(f) => adjust_contrast(&mut image, f),
                Jitter::Saturation(f) => adjust_saturation(&mut image, f),
                Jitter::Hue(shift) => adjust_hue(&mut image, shift),
            }
        }

        image
    }
}

fn factor<R: Rng + ?Sized>(rng: &mut R, spread: f32) -> f32 {
    rng.gen_range((1.0 - spread).max(0.0)..=1.0 + spread)
}

/// Rotate counter-clockwise by `degrees` about the centre, keeping the canvas
/// size. Nearest-neighbour sampling; uncovered pixels are black.
pub fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    if degrees == 0.0 {
        return image.clone();
    }
    // imageproc rotates clockwise.
    rotate_about_center(
        image,
        -degrees.to_radians(),
        Interpolation::Nearest,
        Rgb([0, 0, 0]),
    )
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn blend(image: &mut RgbImage, factor: f32, other: impl Fn(&Rgb<u8>) -> [f32; 3]) {
    for pixel in image.pixels_mut() {
        let base = other(pixel);
        for c in 0..3 {
            let v = base[c] + factor * (pixel[c] as f32 - base[c]);
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

pub fn adjust_brightness(image: &mut RgbImage, factor: f32) {
    blend(image, factor, |_| [0.0; 3]);
}

/// Blend towards the mean grey level of the whole image.
pub fn adjust_contrast(image: &mut RgbImage, factor: f32) {
    let count = (image.width() as f32 * image.height() as f32).max(1.0);
    let mean = image.pixels().map(luma).sum::<f32>() / count;
    blend(image, factor, |_| [mean; 3]);
}

/// Blend towards each pixel's own grey level.
pub fn adjust_saturation(image: &mut RgbImage, factor: f32) {
    blend(image, factor, |p| [luma(p); 3]);
}

/// Rotate hue by `shift` turns (`-0.5..=0.5`).
pub fn adjust_hue(image: &mut RgbImage, shift: f32) {
    for pixel in image.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(pixel);
        *pixel = hsv_to_rgb((h + shift).rem_euclid(1.0), s, v);
    }
}

fn rgb_to_hsv(p: &Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = p.0.map(|c| c as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let sector = h * 6.0;
    let c = v * s;
    let x = c * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    Rgb([r, g, b].map(|ch| ((ch + m) * 255.0).round().clamp(0.0, 255.0) as u8))
}
