use crate::core_modules::buffer2d::ScalarField;
use crate::core_modules::intensity::{from_rgba_image, to_gray_image, to_signed_rgba};
use image::{ImageEncoder, ImageError};
use std::path::Path;

/// Writes a tightly packed RGBA buffer as a PNG file.
pub fn save_rgba<P: AsRef<Path>>(path: P, width: u32, height: u32, buffer: &[u8]) -> Result<(), ImageError> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);

    encoder.write_image(buffer, width, height, image::ExtendedColorType::Rgba8)?;

    Ok(())
}

/// Writes a [0, 1] field as an 8-bit grayscale PNG.
pub fn save_field<P: AsRef<Path>>(path: P, field: &ScalarField) -> Result<(), ImageError> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    let gray = to_gray_image(field);

    encoder.write_image(gray.as_raw(), gray.width(), gray.height(), image::ExtendedColorType::L8)?;

    Ok(())
}

/// Writes a signed field (a Laplacian band) as a red/green PNG.
pub fn save_signed_field<P: AsRef<Path>>(path: P, field: &ScalarField) -> Result<(), ImageError> {
    let rgba = to_signed_rgba(field);
    save_rgba(path, rgba.width(), rgba.height(), rgba.as_raw())
}

/// Decodes any supported image file and returns its intensity.
pub fn load_intensity<P: AsRef<Path>>(path: P) -> Result<ScalarField, ImageError> {
    let rgba = image::open(path)?.to_rgba8();
    Ok(from_rgba_image(&rgba))
}

/// Decodes any supported image file into a packed RGBA frame and its size.
pub fn load_rgba<P: AsRef<Path>>(path: P) -> Result<(Vec<u8>, u32, u32), ImageError> {
    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((rgba.into_raw(), width, height))
}
