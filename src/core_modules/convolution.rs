// THEORY:
// The convolution engine turns a scalar intensity field into a vector field by
// applying a vector-weighted `Kernel` at every pixel. It is the gradient/edge
// engine that both the edge detector and the gradient-block motion variant use.
//
// Key architectural principles:
// 1.  **Two Modes, One Contract**: `Full` visits every tap, O(r^2) per pixel.
//     `Separable` runs an X pass over the kernel's centre row followed by a Y pass
//     over its centre column, O(2r) per pixel. The separable result only matches
//     the full result for kernels that factor by axis, such as `Kernel::separable`;
//     callers choose the mode knowing their kernel. `Cross` also visits only the
//     centre row and column, but sums the two sweeps instead of chaining them;
//     it is the cheap mode for kernels that do not factor, like the angular one.
// 2.  **Hard Zero Border**: a pixel whose (2r+1)-wide window would leave the field
//     is exactly the zero vector. No clamping, no wrap-around. The separable mode
//     keeps the same band because each pass zeroes its own axis.
// 3.  **Pure Passes**: each pass is a `par_from_fn` over the output grid. The Y pass
//     only starts once the X pass has returned its finished buffer.

use crate::core_modules::buffer2d::{ScalarField, VectorField};
use crate::core_modules::kernel::Kernel;
use crate::core_modules::vector2d::Vec2;
use crate::error::Result;
use tracing::trace;

/// How a kernel is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConvolutionMode {
    /// Every tap of the (2r+1)x(2r+1) window.
    #[default]
    Full,
    /// Centre row on X, then centre column on Y.
    Separable,
    /// Centre-row sweep plus centre-column sweep, added.
    Cross,
}

/// Applies `kernel` to `field` in the requested mode, scaling the result by
/// `scale / normaliser`.
pub fn convolve(field: &ScalarField, kernel: &Kernel, mode: ConvolutionMode, scale: f32) -> Result<VectorField> {
    match mode {
        ConvolutionMode::Full => convolve_full(field, kernel, scale),
        ConvolutionMode::Separable => convolve_separable(field, kernel, scale),
        ConvolutionMode::Cross => convolve_cross(field, kernel, scale),
    }
}

/// Full N×N convolution.
pub fn convolve_full(field: &ScalarField, kernel: &Kernel, scale: f32) -> Result<VectorField> {
    let factor = scale / kernel.normalizer(ConvolutionMode::Full)?;
    trace!(radius = kernel.radius(), width = field.width(), "full convolution");
    Ok(full_pass(field, kernel, factor))
}

/// Two-pass convolution over the kernel's centre row and centre column.
pub fn convolve_separable(field: &ScalarField, kernel: &Kernel, scale: f32) -> Result<VectorField> {
    let factor = scale / kernel.normalizer(ConvolutionMode::Separable)?;
    trace!(radius = kernel.radius(), width = field.width(), "separable convolution");
    let horizontal = horizontal_pass(field, kernel);
    Ok(vertical_pass(&horizontal, kernel, factor))
}

/// Sum of the centre-row and centre-column contributions, one pass.
pub fn convolve_cross(field: &ScalarField, kernel: &Kernel, scale: f32) -> Result<VectorField> {
    let factor = scale / kernel.normalizer(ConvolutionMode::Cross)?;
    trace!(radius = kernel.radius(), width = field.width(), "cross convolution");
    Ok(cross_pass(field, kernel, factor))
}

/// True when the window of radius `r` around `c` fits inside `0..len`.
#[inline]
fn window_fits(c: usize, r: usize, len: usize) -> bool {
    c >= r && c + r < len
}

fn full_pass(field: &ScalarField, kernel: &Kernel, factor: f32) -> VectorField {
    let (w, h) = field.dimensions();
    let r = kernel.radius();
    let size = kernel.size();
    VectorField::par_from_fn(w, h, |x, y| {
        if !window_fits(x, r, w) || !window_fits(y, r, h) {
            return Vec2::ZERO;
        }
        let mut acc = Vec2::ZERO;
        for ky in 0..size {
            for kx in 0..size {
                let tap = kernel.tap(kx, ky);
                acc += tap.direction * (field[(x + kx - r, y + ky - r)] * tap.weight);
            }
        }
        acc * factor
    })
}

fn cross_pass(field: &ScalarField, kernel: &Kernel, factor: f32) -> VectorField {
    let (w, h) = field.dimensions();
    let r = kernel.radius();
    VectorField::par_from_fn(w, h, |x, y| {
        if !window_fits(x, r, w) || !window_fits(y, r, h) {
            return Vec2::ZERO;
        }
        let mut acc = Vec2::ZERO;
        for k in 0..kernel.size() {
            let column = kernel.tap(r, k);
            acc += column.direction * (field[(x, y + k - r)] * column.weight);
            let row = kernel.tap(k, r);
            acc += row.direction * (field[(x + k - r, y)] * row.weight);
        }
        acc * factor
    })
}

/// Pass 1: sweeps X at kernel row `r`. Unscaled.
fn horizontal_pass(field: &ScalarField, kernel: &Kernel) -> VectorField {
    let (w, h) = field.dimensions();
    let r = kernel.radius();
    VectorField::par_from_fn(w, h, |x, y| {
        if !window_fits(x, r, w) {
            return Vec2::ZERO;
        }
        let mut acc = Vec2::ZERO;
        for kx in 0..kernel.size() {
            let tap = kernel.tap(kx, r);
            acc += tap.direction * (field[(x + kx - r, y)] * tap.weight);
        }
        acc
    })
}

/// Pass 2: sweeps Y at kernel column `r`, combining componentwise with pass 1.
fn vertical_pass(horizontal: &VectorField, kernel: &Kernel, factor: f32) -> VectorField {
    let (w, h) = horizontal.dimensions();
    let r = kernel.radius();
    VectorField::par_from_fn(w, h, |x, y| {
        if !window_fits(y, r, h) {
            return Vec2::ZERO;
        }
        let mut acc = Vec2::ZERO;
        for ky in 0..kernel.size() {
            let tap = kernel.tap(r, ky);
            acc += tap.direction.hadamard(horizontal[(x, y + ky - r)]) * tap.weight;
        }
        acc * factor
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::kernel::KernelTap;
    use crate::error::FlowError;

    fn ramp(w: usize, h: usize) -> ScalarField {
        ScalarField::from_fn(w, h, |x, y| ((x * 7 + y * 13) % 11) as f32 / 10.0)
    }

    fn assert_close(a: Vec2, b: Vec2, what: &str) {
        assert!((a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5, "{what}: {a:?} vs {b:?}");
    }

    #[test]
    fn border_band_is_exactly_zero() {
        let field = ScalarField::filled(12, 9, 1.0);
        let kernel = Kernel::weighted_angular(5).unwrap();
        let r = kernel.radius();
        for mode in [ConvolutionMode::Full, ConvolutionMode::Separable, ConvolutionMode::Cross] {
            let out = convolve(&field, &kernel, mode, 3.0).unwrap();
            for (x, y, v) in out.cells() {
                let border = x < r || y < r || x + r >= 12 || y + r >= 9;
                if border {
                    assert_eq!(v, Vec2::ZERO, "{mode:?} at ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn unit_kernel_scales_each_pixel() {
        let tap = KernelTap::new(Vec2::new(2.0, 3.0), 0.5);
        let kernel = Kernel::new(0, vec![tap]).unwrap();
        let field = ramp(6, 5);
        let out = convolve_full(&field, &kernel, 2.0).unwrap();
        for (x, y, v) in out.cells() {
            let expected = tap.direction * (field[(x, y)] * tap.weight * 2.0 / 0.5);
            assert_close(v, expected, "unit kernel");
        }
    }

    #[test]
    fn separable_kernel_agrees_with_full_mode() {
        let row = [
            KernelTap::new(Vec2::new(-1.0, 1.0), 1.0),
            KernelTap::new(Vec2::new(-0.5, 1.0), 0.5),
            KernelTap::new(Vec2::ONE, 1.0),
            KernelTap::new(Vec2::new(0.5, 1.0), 0.5),
            KernelTap::new(Vec2::new(1.0, 1.0), 1.0),
        ];
        let column = [
            KernelTap::new(Vec2::new(1.0, -1.0), 0.25),
            KernelTap::new(Vec2::new(1.0, -0.5), 1.0),
            KernelTap::new(Vec2::ONE, 1.0),
            KernelTap::new(Vec2::new(1.0, 0.5), 1.0),
            KernelTap::new(Vec2::new(1.0, 1.0), 0.25),
        ];
        let kernel = Kernel::separable(&row, &column).unwrap();
        let field = ramp(16, 12);
        let full = convolve_full(&field, &kernel, 1.5).unwrap();
        let separable = convolve_separable(&field, &kernel, 1.5).unwrap();
        for y in 2..10 {
            for x in 2..14 {
                assert_close(full[(x, y)], separable[(x, y)], "interior pixel");
            }
        }
    }

    #[test]
    fn angular_kernel_points_toward_brightness() {
        let field = ScalarField::from_fn(9, 9, |x, _| x as f32);
        let kernel = Kernel::weighted_angular(3).unwrap();
        let out = convolve_full(&field, &kernel, 1.0).unwrap();
        let v = out[(4, 4)];
        assert!(v.x > 0.0, "{v:?}");
        assert!(v.y.abs() < 1e-5, "{v:?}");
    }

    #[test]
    fn cross_mode_adds_row_and_column_sweeps() {
        let field = ramp(11, 9);
        let kernel = Kernel::weighted_angular(5).unwrap();
        let out = convolve_cross(&field, &kernel, 2.0).unwrap();
        let (x, y) = (5, 4);
        let mut expected = Vec2::ZERO;
        for k in 0..5 {
            let column = kernel.tap(2, k);
            expected += column.direction * (field[(x, y + k - 2)] * column.weight);
            let row = kernel.tap(k, 2);
            expected += row.direction * (field[(x + k - 2, y)] * row.weight);
        }
        assert_close(out[(x, y)], expected * (2.0 / kernel.separable_total_weight()), "cross");
    }

    #[test]
    fn cross_mode_finds_edges_the_angular_kernel_loses_when_chained() {
        let step = ScalarField::from_fn(12, 8, |x, _| if x < 6 { 0.0 } else { 1.0 });
        let kernel = Kernel::weighted_angular(5).unwrap();
        let cross = convolve_cross(&step, &kernel, 1.0).unwrap();
        let chained = convolve_separable(&step, &kernel, 1.0).unwrap();
        assert!(cross[(5, 4)].x > 0.1, "{:?}", cross[(5, 4)]);
        assert!(cross[(5, 4)].y.abs() < 1e-5);
        assert!(chained[(5, 4)].length() < 1e-5);
    }

    #[test]
    fn zero_weight_kernel_fails_fast() {
        let kernel = Kernel::new(1, vec![KernelTap::new(Vec2::ONE, 0.0); 9]).unwrap();
        let field = ScalarField::filled(4, 4, 1.0);
        assert!(matches!(
            convolve(&field, &kernel, ConvolutionMode::Full, 1.0),
            Err(FlowError::InvalidKernel(_))
        ));
        assert!(convolve(&field, &kernel, ConvolutionMode::Separable, 1.0).is_err());
        assert!(convolve(&field, &kernel, ConvolutionMode::Cross, 1.0).is_err());
    }

    #[test]
    fn field_smaller_than_kernel_is_all_zero() {
        let kernel = Kernel::weighted_angular(7).unwrap();
        let out = convolve_full(&ScalarField::filled(5, 5, 1.0), &kernel, 1.0).unwrap();
        assert!(out.as_slice().iter().all(|v| *v == Vec2::ZERO));
    }
}
