// THEORY:
// Frame ingestion. The engine works on single-channel intensity, so every colour
// frame that enters it goes through here first: raw RGBA byte buffers straight
// from a capture source, or decoded `image` crate buffers. Intensity is the plain
// mean of the three colour channels scaled to [0, 1]; alpha is ignored.
// The reverse direction (field to 8-bit image) is here too, for the display side.

use crate::core_modules::buffer2d::ScalarField;
use crate::error::{FlowError, Result};
use image::{GrayImage, Luma, Rgba, RgbaImage};

/// Bytes per pixel of an ingested frame.
pub const CHANNELS: usize = 4;
/// `3 * 255`: maps the channel sum to [0, 1].
pub const LUMA_DIVISOR: f32 = 765.0;
/// Gain applied to signed fields (Laplacian bands) before quantising.
pub const SIGNED_GAIN: f32 = 512.0;

#[inline]
fn luma(r: u8, g: u8, b: u8) -> f32 {
    (r as u16 + g as u16 + b as u16) as f32 / LUMA_DIVISOR
}

/// Converts a tightly packed RGBA frame to intensity.
pub fn rgba_to_intensity(frame: &[u8], width: usize, height: usize) -> Result<ScalarField> {
    let expected = width * height * CHANNELS;
    if frame.len() != expected {
        return Err(FlowError::FrameSize {
            expected,
            actual: frame.len(),
        });
    }
    Ok(ScalarField::par_from_fn(width, height, |x, y| {
        let i = (y * width + x) * CHANNELS;
        luma(frame[i], frame[i + 1], frame[i + 2])
    }))
}

/// Converts a decoded image to intensity.
pub fn from_rgba_image(image: &RgbaImage) -> ScalarField {
    let (w, h) = image.dimensions();
    ScalarField::par_from_fn(w as usize, h as usize, |x, y| {
        let Rgba([r, g, b, _]) = *image.get_pixel(x as u32, y as u32);
        luma(r, g, b)
    })
}

/// `clamp(v * 255, 0, 255)`.
#[inline]
pub fn quantize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

/// Grayscale view of a field whose values live in [0, 1].
pub fn to_gray_image(field: &ScalarField) -> GrayImage {
    GrayImage::from_fn(field.width() as u32, field.height() as u32, |x, y| {
        Luma([quantize(field[(x as usize, y as usize)])])
    })
}

/// Colour view of a signed field: negative values red, positive values green.
pub fn to_signed_rgba(field: &ScalarField) -> RgbaImage {
    RgbaImage::from_fn(field.width() as u32, field.height() as u32, |x, y| {
        let value = field[(x as usize, y as usize)] * SIGNED_GAIN;
        let level = value.abs().min(255.0) as u8;
        if value < 0.0 {
            Rgba([level, 0, 0, 255])
        } else {
            Rgba([0, level, 0, 255])
        }
    })
}
