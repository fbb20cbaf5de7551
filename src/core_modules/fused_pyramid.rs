// THEORY:
// The fused kernels are the single-pass form of the pyramid stencils. Instead of
// sliding a 5-tap window along one axis of one field, they combine five (or three)
// pre-shifted source fields at the same coordinate. Whoever prepares the sources
// decides what "shifted" means: neighbouring columns, neighbouring rows, or
// neighbouring frames in time for the temporal pyramid. With matching weights the
// result is identical to the sliding-window pass it replaces.
//
// `compress_fused`, `expand_fused` and `collapse_fused` are the spatial entry
// points: they prepare the shifted copies of a field along each axis (zero
// outside the border band) and return exactly what `compress`, `expand` and
// `collapse` return.

use crate::core_modules::buffer2d::ScalarField;
use crate::core_modules::pyramid::{
    COMPRESS_TAPS, EXPAND_EVEN_TAPS, EXPAND_ODD_TAPS, check_expand_target, compressed_size, in_band,
};
use crate::error::Result;

/// Outputs of `expand3`, named after where they sit relative to the centre source.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedTriple {
    /// Halfway between the first and the centre source.
    pub odd_left: ScalarField,
    /// In line with the centre source.
    pub even: ScalarField,
    /// Halfway between the centre and the last source.
    pub odd_right: ScalarField,
}

impl ExpandedTriple {
    /// The three outputs in temporal order.
    pub fn as_array(&self) -> [&ScalarField; 3] {
        [&self.odd_left, &self.even, &self.odd_right]
    }
}

fn check_shapes(sources: &[&ScalarField], context: &'static str) -> Result<()> {
    if let Some((first, rest)) = sources.split_first() {
        for s in rest {
            first.ensure_same_shape(s, context)?;
        }
    }
    Ok(())
}

/// Weighted sum of five same-shape sources with the compress weights.
pub fn compress5(sources: [&ScalarField; 5]) -> Result<ScalarField> {
    check_shapes(&sources, "compress5")?;
    let (w, h) = sources[0].dimensions();
    Ok(ScalarField::par_from_fn(w, h, |x, y| {
        sources
            .iter()
            .zip(COMPRESS_TAPS)
            .map(|(s, weight)| s[(x, y)] * weight)
            .sum()
    }))
}

/// The three interpolations around the centre of three same-shape sources.
pub fn expand3(sources: [&ScalarField; 3]) -> Result<ExpandedTriple> {
    check_shapes(&sources, "expand3")?;
    let [a, b, c] = sources;
    let (w, h) = a.dimensions();
    let odd_left = ScalarField::par_from_fn(w, h, |x, y| {
        EXPAND_ODD_TAPS[0] * a[(x, y)] + EXPAND_ODD_TAPS[1] * b[(x, y)]
    });
    let even = ScalarField::par_from_fn(w, h, |x, y| {
        EXPAND_EVEN_TAPS[0] * a[(x, y)] + EXPAND_EVEN_TAPS[1] * b[(x, y)] + EXPAND_EVEN_TAPS[2] * c[(x, y)]
    });
    let odd_right = ScalarField::par_from_fn(w, h, |x, y| {
        EXPAND_ODD_TAPS[0] * b[(x, y)] + EXPAND_ODD_TAPS[1] * c[(x, y)]
    });
    Ok(ExpandedTriple {
        odd_left,
        even,
        odd_right,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// `N` copies of `source` resized to `out_len` along `axis`. Copy `k` holds, at
/// coordinate `c`, the source sample at `stride * c + k - N / 2`; coordinates
/// rejected by `keep` are zero.
fn shifted_sources<const N: usize>(
    source: &ScalarField,
    axis: Axis,
    out_len: usize,
    stride: usize,
    keep: impl Fn(usize) -> bool + Send + Sync,
) -> [ScalarField; N] {
    let (width, height) = match axis {
        Axis::X => (out_len, source.height()),
        Axis::Y => (source.width(), out_len),
    };
    std::array::from_fn(|k| {
        ScalarField::par_from_fn(width, height, |x, y| {
            let c = if axis == Axis::X { x } else { y };
            if !keep(c) {
                return 0.0;
            }
            let s = stride * c + k - N / 2;
            match axis {
                Axis::X => source[(s, y)],
                Axis::Y => source[(x, s)],
            }
        })
    })
}

fn compress_axis(source: &ScalarField, axis: Axis) -> Result<ScalarField> {
    let len = match axis {
        Axis::X => compressed_size(source.width()),
        Axis::Y => compressed_size(source.height()),
    };
    let shifted: [ScalarField; 5] = shifted_sources(source, axis, len, 2, |c| in_band(c, len));
    compress5(std::array::from_fn(|k| &shifted[k]))
}

/// Single-pass-per-axis form of `compress`; equal to it sample for sample.
pub fn compress_fused(source: &ScalarField) -> Result<ScalarField> {
    let horizontal = compress_axis(source, Axis::X)?;
    compress_axis(&horizontal, Axis::Y)
}

fn expand_axis(source: &ScalarField, axis: Axis, target_len: usize) -> Result<ScalarField> {
    let source_len = match axis {
        Axis::X => source.width(),
        Axis::Y => source.height(),
    };
    let shifted: [ScalarField; 3] = shifted_sources(source, axis, source_len, 1, |p| p >= 1 && p + 1 < source_len);
    let triple = expand3([&shifted[0], &shifted[1], &shifted[2]])?;
    let (width, height) = match axis {
        Axis::X => (target_len, source.height()),
        Axis::Y => (source.width(), target_len),
    };
    Ok(ScalarField::par_from_fn(width, height, |x, y| {
        let c = if axis == Axis::X { x } else { y };
        if !in_band(c, target_len) {
            return 0.0;
        }
        // Even outputs sit on a source sample, odd ones between it and the next.
        let half = if c % 2 == 0 { &triple.even } else { &triple.odd_right };
        match axis {
            Axis::X => half[(c / 2, y)],
            Axis::Y => half[(x, c / 2)],
        }
    }))
}

/// Single-pass-per-axis form of `expand`, Y then X; equal to it sample for sample.
pub fn expand_fused(source: &ScalarField, target_width: usize, target_height: usize) -> Result<ScalarField> {
    check_expand_target(source, target_width, target_height, "expand_fused")?;
    let vertical = expand_axis(source, Axis::Y, target_height)?;
    expand_axis(&vertical, Axis::X, target_width)
}

/// `band + expand(coarser)` with the fused expansion.
pub fn collapse_fused(band: &ScalarField, coarser: &ScalarField) -> Result<ScalarField> {
    let expanded = expand_fused(coarser, band.width(), band.height())?;
    band.par_zip_map(&expanded, "collapse_fused", |l, e| l + e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pyramid::{collapse, compress, compress_x, expand, laplacian};
    use crate::error::FlowError;

    fn assert_same(a: &ScalarField, b: &ScalarField, what: &str) {
        assert_eq!(a.dimensions(), b.dimensions(), "{what}");
        for (x, y, v) in b.cells() {
            assert!((a[(x, y)] - v).abs() < 1e-6, "{what} at ({x}, {y}): {} vs {v}", a[(x, y)]);
        }
    }

    fn texture(w: usize, h: usize) -> ScalarField {
        ScalarField::from_fn(w, h, |x, y| ((x * 5 + y * 3) % 17) as f32 / 16.0)
    }

    #[test]
    fn compress5_matches_the_sliding_window_pass() {
        let source = texture(30, 6);
        let tw = compressed_size(30);
        let shifted: Vec<ScalarField> = (0..5)
            .map(|k| {
                ScalarField::from_fn(tw, 6, |x, y| {
                    if x >= 2 && x + 2 < tw { source[(2 * x + k - 2, y)] } else { 0.0 }
                })
            })
            .collect();
        let fused = compress5([&shifted[0], &shifted[1], &shifted[2], &shifted[3], &shifted[4]]).unwrap();
        let sliding = compress_x(&source, tw);
        for (x, y, v) in sliding.cells() {
            assert!((fused[(x, y)] - v).abs() < 1e-6, "({x}, {y})");
        }
    }

    #[test]
    fn expand3_matches_the_sliding_window_pass() {
        // Rows vary, columns do not, so the X pass of `expand` is the identity
        // inside the band and the Y pass can be compared directly.
        let (sw, sh) = (8, 10);
        let source = ScalarField::from_fn(sw, sh, |_, y| (y as f32 * 0.7).sin());
        let expanded = expand(&source, 2 * sw, 2 * sh).unwrap();
        let shifted: Vec<ScalarField> = (0..3)
            .map(|j| {
                ScalarField::from_fn(sw, sh, |x, p| {
                    if p >= 1 && p + 1 < sh { source[(x, p + j - 1)] } else { 0.0 }
                })
            })
            .collect();
        let triple = expand3([&shifted[0], &shifted[1], &shifted[2]]).unwrap();
        let x = sw;
        for p in 2..sh - 2 {
            assert!((triple.even[(0, p)] - expanded[(x, 2 * p)]).abs() < 1e-5, "even {p}");
            assert!((triple.odd_right[(0, p)] - expanded[(x, 2 * p + 1)]).abs() < 1e-5, "right {p}");
            assert!((triple.odd_left[(0, p)] - expanded[(x, 2 * p - 1)]).abs() < 1e-5, "left {p}");
        }
    }

    #[test]
    fn fused_compress_equals_two_pass_compress() {
        for (w, h) in [(30, 22), (31, 17), (12, 10)] {
            let source = texture(w, h);
            assert_same(&compress_fused(&source).unwrap(), &compress(&source), "compress");
        }
    }

    #[test]
    fn fused_expand_equals_two_pass_expand() {
        for (w, h) in [(30, 22), (31, 17), (12, 10)] {
            let coarse = texture(compressed_size(w), compressed_size(h));
            let fused = expand_fused(&coarse, w, h).unwrap();
            let two_pass = expand(&coarse, w, h).unwrap();
            assert_same(&fused, &two_pass, "expand");
            // The border band is exactly zero in both.
            for (x, y, v) in fused.cells() {
                if x < 2 || y < 2 || x + 2 >= w || y + 2 >= h {
                    assert_eq!(v, 0.0, "({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn fused_collapse_rebuilds_the_level() {
        let level = texture(30, 22);
        let coarse = compress(&level);
        let band = laplacian(&level, &expand(&coarse, 30, 22).unwrap()).unwrap();
        let fused = collapse_fused(&band, &coarse).unwrap();
        assert_same(&fused, &collapse(&band, &expand(&coarse, 30, 22).unwrap()).unwrap(), "collapse");
        assert_same(&fused, &level, "round trip");
    }

    #[test]
    fn fused_expand_checks_the_target_size() {
        let coarse = texture(8, 8);
        assert!(matches!(
            expand_fused(&coarse, 20, 16),
            Err(FlowError::DimensionMismatch { context: "expand_fused", .. })
        ));
    }

    #[test]
    fn sources_must_share_a_shape() {
        let a = ScalarField::new(4, 4);
        let b = ScalarField::new(4, 5);
        assert!(expand3([&a, &a, &b]).is_err());
        assert!(compress5([&a, &a, &a, &a, &b]).is_err());
    }

    #[test]
    fn constant_sources_are_preserved() {
        let a = ScalarField::filled(3, 3, 2.0);
        let fused = compress5([&a; 5]).unwrap();
        assert!(fused.as_slice().iter().all(|v| (v - 2.0).abs() < 1e-6));
        let triple = expand3([&a; 3]).unwrap();
        for field in triple.as_array() {
            assert!(field.as_slice().iter().all(|v| (v - 2.0).abs() < 1e-6));
        }
    }
}
