//! Luminance contrast enhancement and intensity normalization.
//!
//! The image is split into CIE L\*a\*b\* (D65) planes, [`clahe`] is
//! applied to the lightness plane only, the planes are recombined into
//! sRGB and finally every channel is scaled into `[0, 1]`.
//!
//! Lightness is quantized to 8 bits as `L* * 255 / 100` before
//! equalization, matching the usual 8-bit Lab encoding. The chroma planes
//! stay in floating point so equalization never shifts hue.
//!
//! [`clahe`]: crate::clahe::clahe

use image::GrayImage;
use palette::{FromColor, Lab, LinSrgb, Srgb};

use crate::error::StageError;
use crate::types::{NormalizedImage, RgbImage};

/// An image split into an 8-bit lightness plane and float chroma planes.
#[derive(Debug, Clone)]
pub struct LabPlanes {
    /// Quantized L\* in `[0, 255]`.
    pub lightness: GrayImage,
    /// `(a*, b*)` per pixel in row-major order.
    pub chroma: Vec<(f32, f32)>,
}

/// Run the enhance stage on a loaded image.
///
/// Returns a new buffer; the input is left untouched.
///
/// # Errors
///
/// Returns [`StageError::Enhancement`] if the image has no pixels.
pub fn enhance(
    image: &RgbImage,
    clip_limit: f32,
    tile_grid: (u32, u32),
) -> Result<NormalizedImage, StageError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(StageError::Enhancement(format!(
            "cannot enhance a {}x{} image",
            image.width(),
            image.height()
        )));
    }

    let planes = to_lab_planes(image);
    let equalized = LabPlanes {
        lightness: crate::clahe::clahe(&planes.lightness, clip_limit, tile_grid),
        chroma: planes.chroma,
    };
    let rgb = from_lab_planes(&equalized);
    Ok(normalize_intensities(&rgb))
}

/// Convert sRGB pixels into Lab planes.
#[must_use]
pub fn to_lab_planes(image: &RgbImage) -> LabPlanes {
    let mut chroma = Vec::with_capacity(image.as_raw().len() / 3);
    let lightness = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let linear: LinSrgb = Srgb::new(unit(r), unit(g), unit(b)).into_linear();
        let lab: Lab = Lab::from_color(linear);
        chroma.push((lab.a, lab.b));
        image::Luma([quantize(lab.l * 255.0 / 100.0)])
    });
    LabPlanes { lightness, chroma }
}

/// Recombine Lab planes into 8-bit sRGB, clamping out-of-gamut colors.
#[must_use]
pub fn from_lab_planes(planes: &LabPlanes) -> RgbImage {
    let width = planes.lightness.width();
    RgbImage::from_fn(width, planes.lightness.height(), |x, y| {
        let idx = (y as usize) * (width as usize) + x as usize;
        let (a, b) = planes.chroma.get(idx).copied().unwrap_or((0.0, 0.0));
        let l = f32::from(planes.lightness.get_pixel(x, y).0[0]) * 100.0 / 255.0;
        let lab: Lab = Lab::new(l, a, b);
        let linear: LinSrgb = LinSrgb::from_color(lab);
        let srgb: Srgb = Srgb::from_linear(linear);
        image::Rgb([
            quantize(srgb.red * 255.0),
            quantize(srgb.green * 255.0),
            quantize(srgb.blue * 255.0),
        ])
    })
}

/// Scale 8-bit samples into `[0, 1]`.
#[must_use]
pub fn normalize_intensities(image: &RgbImage) -> NormalizedImage {
    NormalizedImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        image::Rgb([unit(r), unit(g), unit(b)])
    })
}

fn unit(sample: u8) -> f32 {
    f32::from(sample) / 255.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn fundus_like(w: u32, h: u32) -> RgbImage {
        // Dim reddish disc with a faint brighter blob, similar in spirit to
        // a fundus photograph.
        RgbImage::from_fn(w, h, |x, y| {
            let dx = i64::from(x) - i64::from(w / 2);
            let dy = i64::from(y) - i64::from(h / 2);
            let blob = if dx * dx + dy * dy < i64::from(w * w / 36) { 20 } else { 0 };
            image::Rgb([
                120 + blob + (x % 8) as u8,
                50 + blob / 2,
                30 + (y % 4) as u8,
            ])
        })
    }

    #[test]
    fn output_is_normalized_and_same_size() {
        let img = fundus_like(64, 64);
        let out = enhance(&img, 2.0, (8, 8)).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
        for pixel in out.pixels() {
            for &c in &pixel.0 {
                assert!((0.0..=1.0).contains(&c), "component {c} out of range");
            }
        }
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        let img = RgbImage::new(0, 0);
        let result = enhance(&img, 2.0, (8, 8));
        assert!(matches!(result, Err(StageError::Enhancement(_))));
    }

    #[test]
    fn enhancement_is_deterministic() {
        let img = fundus_like(48, 32);
        let a = enhance(&img, 2.0, (8, 8)).unwrap();
        let b = enhance(&img, 2.0, (8, 8)).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn input_is_not_mutated() {
        let img = fundus_like(32, 32);
        let before = img.clone();
        let _ = enhance(&img, 2.0, (4, 4)).unwrap();
        assert_eq!(img, before);
    }

    #[test]
    fn lab_round_trip_is_near_identity() {
        let img = fundus_like(16, 16);
        let back = from_lab_planes(&to_lab_planes(&img));
        for (a, b) in img.pixels().zip(back.pixels()) {
            for c in 0..3 {
                assert!(
                    a.0[c].abs_diff(b.0[c]) <= 3,
                    "channel {c}: {} vs {}",
                    a.0[c],
                    b.0[c],
                );
            }
        }
    }

    #[test]
    fn white_and_black_map_to_lightness_extremes() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let planes = to_lab_planes(&img);
        assert_eq!(planes.lightness.get_pixel(0, 0).0[0], 0);
        assert!(planes.lightness.get_pixel(1, 0).0[0] >= 254);
    }

    #[test]
    fn normalize_scales_to_unit_range() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 51, 255])
            }
        });
        let out = normalize_intensities(&img);
        assert_eq!(out.get_pixel(0, 0).0, [0.0, 0.0, 0.0]);
        let [r, g, b] = out.get_pixel(1, 0).0;
        assert!((r - 1.0).abs() < f32::EPSILON);
        assert!((g - 0.2).abs() < 1e-6);
        assert!((b - 1.0).abs() < f32::EPSILON);
    }
}
