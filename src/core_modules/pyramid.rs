// THEORY:
// The pyramid engine decomposes an intensity field into progressively coarser
// Gaussian levels and the band-pass Laplacian levels between them, and rebuilds
// the input field from the Laplacian stack.
//
// Key architectural principles:
// 1.  **Transitions Are Functions**: `compress`, `expand`, `laplacian` and
//     `collapse` each take immutable fields and return a new one. The pyramid types
//     are just ordered `Vec`s of their results; nothing is rewritten in place.
// 2.  **Fixed Stencils**: compress is a separable 5-tap binomial blur centred on
//     every second source sample. Expand interpolates with a 3-tap stencil on
//     samples that line up with the source and a 2-tap average in between.
// 3.  **Sizing Rule**: a compressed axis is `ceil(n / 2)` long. Expand only
//     accepts targets that compress back to the source size, so every level pair
//     of a pyramid round-trips its geometry exactly.
// 4.  **Border Band**: outputs within 2 samples of an edge are left at 0 in both
//     directions. This makes decomposition lossy near the edges, and the builder
//     stops before a level gets too small to have any interior at all.

use crate::core_modules::buffer2d::ScalarField;
use crate::error::{FlowError, Result};
use tracing::{debug, warn};

/// Binomial weights of the compress stencil.
pub const COMPRESS_TAPS: [f32; 5] = [0.05, 0.25, 0.4, 0.25, 0.05];
/// Expand weights for outputs in line with a source sample.
pub const EXPAND_EVEN_TAPS: [f32; 3] = [0.175, 0.65, 0.175];
/// Expand weights for outputs between two source samples.
pub const EXPAND_ODD_TAPS: [f32; 2] = [0.5, 0.5];
/// Width of the zeroed border band.
pub const BORDER: usize = 2;
/// Smallest axis length a pyramid level may have.
pub const MIN_LEVEL_SIZE: usize = 5;

/// Length of an axis after one compress step.
#[inline]
pub fn compressed_size(len: usize) -> usize {
    len.div_ceil(2)
}

/// True when output coordinate `c` of an axis of length `len` is outside the border band.
#[inline]
pub(crate) fn in_band(c: usize, len: usize) -> bool {
    c >= BORDER && c + BORDER < len
}

/// 2:1 Gaussian reduction, X pass then Y pass.
pub fn compress(source: &ScalarField) -> ScalarField {
    let target_height = compressed_size(source.height());
    let horizontal = compress_x(source, compressed_size(source.width()));
    compress_y(&horizontal, target_height)
}

pub(crate) fn compress_x(source: &ScalarField, target_width: usize) -> ScalarField {
    ScalarField::par_from_fn(target_width, source.height(), |x, y| {
        if !in_band(x, target_width) {
            return 0.0;
        }
        let center = 2 * x;
        COMPRESS_TAPS
            .iter()
            .enumerate()
            .map(|(k, w)| source[(center + k - 2, y)] * w)
            .sum()
    })
}

pub(crate) fn compress_y(source: &ScalarField, target_height: usize) -> ScalarField {
    ScalarField::par_from_fn(source.width(), target_height, |x, y| {
        if !in_band(y, target_height) {
            return 0.0;
        }
        let center = 2 * y;
        COMPRESS_TAPS
            .iter()
            .enumerate()
            .map(|(k, w)| source[(x, center + k - 2)] * w)
            .sum()
    })
}

/// Interpolates output coordinate `c` from a half-resolution axis read by `at`.
#[inline]
fn expand_sample(c: usize, at: impl Fn(usize) -> f32) -> f32 {
    let p = c / 2;
    if p * 2 == c {
        EXPAND_EVEN_TAPS[0] * at(p - 1) + EXPAND_EVEN_TAPS[1] * at(p) + EXPAND_EVEN_TAPS[2] * at(p + 1)
    } else {
        EXPAND_ODD_TAPS[0] * at(p) + EXPAND_ODD_TAPS[1] * at(p + 1)
    }
}

/// 1:2 interpolation back to `target_width x target_height`, Y pass then X pass.
///
/// The target must compress to the source's size on both axes.
pub fn expand(source: &ScalarField, target_width: usize, target_height: usize) -> Result<ScalarField> {
    check_expand_target(source, target_width, target_height, "expand")?;

    let vertical = ScalarField::par_from_fn(source.width(), target_height, |x, y| {
        if !in_band(y, target_height) {
            return 0.0;
        }
        expand_sample(y, |p| source[(x, p)])
    });
    Ok(ScalarField::par_from_fn(target_width, target_height, |x, y| {
        if !in_band(x, target_width) {
            return 0.0;
        }
        expand_sample(x, |p| vertical[(p, y)])
    }))
}

/// Fails unless `target` compresses to the size of `source`.
pub(crate) fn check_expand_target(
    source: &ScalarField,
    target_width: usize,
    target_height: usize,
    context: &'static str,
) -> Result<()> {
    let expected = (compressed_size(target_width), compressed_size(target_height));
    if source.dimensions() != expected {
        return Err(FlowError::DimensionMismatch {
            context,
            expected,
            actual: source.dimensions(),
        });
    }
    Ok(())
}

/// Band-pass difference, `level - expanded`.
pub fn laplacian(level: &ScalarField, expanded: &ScalarField) -> Result<ScalarField> {
    level.par_zip_map(expanded, "laplacian", |g, e| g - e)
}

/// Inverse of `laplacian`, `band + expanded`.
pub fn collapse(band: &ScalarField, expanded: &ScalarField) -> Result<ScalarField> {
    band.par_zip_map(expanded, "collapse", |l, e| l + e)
}

/// A field tagged with its pyramid depth; 0 is the finest.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub index: usize,
    pub field: ScalarField,
}

/// Gaussian levels from finest to coarsest.
#[derive(Debug, Clone)]
pub struct GaussianPyramid {
    levels: Vec<PyramidLevel>,
}

impl GaussianPyramid {
    /// Builds up to `level_count` levels (level 0 included) from `base`.
    ///
    /// Stops early, with a warning, when the next level would be smaller than
    /// `MIN_LEVEL_SIZE` on either axis.
    pub fn build(base: ScalarField, level_count: usize) -> Result<Self> {
        if level_count == 0 {
            return Err(FlowError::config("a pyramid needs at least one level"));
        }
        let mut levels = Vec::with_capacity(level_count);
        levels.push(PyramidLevel { index: 0, field: base });

        while levels.len() < level_count {
            let Some(last) = levels.last() else { break };
            let (w, h) = last.field.dimensions();
            let (nw, nh) = (compressed_size(w), compressed_size(h));
            if nw < MIN_LEVEL_SIZE || nh < MIN_LEVEL_SIZE {
                warn!(
                    requested = level_count,
                    built = levels.len(),
                    "pyramid truncated: level {} would be {}x{}",
                    levels.len(),
                    nw,
                    nh
                );
                break;
            }
            let field = compress(&last.field);
            let index = levels.len();
            levels.push(PyramidLevel { index, field });
        }

        debug!(levels = levels.len(), "gaussian pyramid built");
        Ok(Self { levels })
    }

    /// Wraps already-computed levels, checking that each one is the compressed
    /// size of its predecessor.
    pub fn from_levels(fields: Vec<ScalarField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(FlowError::config("a pyramid needs at least one level"));
        }
        for pair in fields.windows(2) {
            let (w, h) = pair[0].dimensions();
            let expected = (compressed_size(w), compressed_size(h));
            if pair[1].dimensions() != expected {
                return Err(FlowError::DimensionMismatch {
                    context: "pyramid level",
                    expected,
                    actual: pair[1].dimensions(),
                });
            }
        }
        let levels = fields
            .into_iter()
            .enumerate()
            .map(|(index, field)| PyramidLevel { index, field })
            .collect();
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    pub fn into_levels(self) -> Vec<PyramidLevel> {
        self.levels
    }

    /// Level `index + 1` expanded to the size of level `index`.
    pub fn expanded(&self, index: usize) -> Result<ScalarField> {
        let (Some(fine), Some(coarse)) = (self.levels.get(index), self.levels.get(index + 1)) else {
            return Err(FlowError::config(format!(
                "level {index} has no coarser neighbour in a {}-level pyramid",
                self.levels.len()
            )));
        };
        expand(&coarse.field, fine.field.width(), fine.field.height())
    }
}

/// Band-pass levels; the last band is the coarsest Gaussian level unchanged.
#[derive(Debug, Clone)]
pub struct LaplacianPyramid {
    bands: Vec<PyramidLevel>,
}

impl LaplacianPyramid {
    pub fn from_gaussian(gaussian: &GaussianPyramid) -> Result<Self> {
        let n = gaussian.len();
        let mut bands = Vec::with_capacity(n);
        for (index, level) in gaussian.levels().iter().enumerate() {
            let field = if index + 1 < n {
                laplacian(&level.field, &gaussian.expanded(index)?)?
            } else {
                level.field.clone()
            };
            bands.push(PyramidLevel { index, field });
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[PyramidLevel] {
        &self.bands
    }

    pub fn band(&self, index: usize) -> Option<&PyramidLevel> {
        self.bands.get(index)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Rebuilds every Gaussian level, coarsest first.
    pub fn collapse(&self) -> Result<GaussianPyramid> {
        let Some(top) = self.bands.last() else {
            return Err(FlowError::config("cannot collapse an empty pyramid"));
        };
        let mut rebuilt = vec![top.field.clone()];
        for band in self.bands.iter().rev().skip(1) {
            let coarser = rebuilt.last().ok_or_else(|| FlowError::config("collapse lost its base"))?;
            let expanded = expand(coarser, band.field.width(), band.field.height())?;
            rebuilt.push(collapse(&band.field, &expanded)?);
        }
        rebuilt.reverse();
        GaussianPyramid::from_levels(rebuilt)
    }
}
