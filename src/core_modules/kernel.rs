// THEORY:
// A `Kernel` is the immutable configuration object of the convolution engine: a
// square (2r+1)x(2r+1) grid of taps, each tap carrying a 2D direction vector and a
// scalar weight. Applying it to an intensity field yields a vector field whose
// vectors point toward the brighter side of each neighbourhood.
//
// Key architectural principles:
// 1.  **Validated Once**: grid shape and weight sanity are checked when the kernel
//     is built, so a kernel that reaches a frame is always well formed. The total
//     weights are stored alongside the grid and are consistent with it.
// 2.  **Two Normalisers**: the full mode divides by the sum of all weights. The
//     separable and cross modes only ever visit the centre row and the centre
//     column, so they divide by their combined weight instead. A zero normaliser is rejected as
//     `InvalidKernel` for the mode that would divide by it.
// 3.  **Generators**: `weighted_angular` builds the circular direction kernel used
//     for edges and gradient blocks; `separable` builds an outer-product kernel for
//     which both convolution modes agree.

use crate::core_modules::convolution::ConvolutionMode;
use crate::core_modules::vector2d::Vec2;
use crate::error::{FlowError, Result};

/// Width of the linear fall-off band at the rim of an angular kernel, in pixels.
const ANGULAR_EDGE_SIZE: f32 = 1.0;

/// A single kernel entry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KernelTap {
    /// The vector contributed by this position.
    pub direction: Vec2,
    /// How strongly this position contributes.
    pub weight: f32,
}

impl KernelTap {
    pub const fn new(direction: Vec2, weight: f32) -> Self {
        Self { direction, weight }
    }
}

/// An immutable square convolution kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    radius: usize,
    /// Row-major taps, `taps[ky * size + kx]`.
    taps: Vec<KernelTap>,
    /// Sum of every weight; the full-mode normaliser.
    total_weight: f32,
    /// Centre-row plus centre-column weights; the separable-mode normaliser.
    separable_total_weight: f32,
}

impl Kernel {
    /// Builds a kernel from a row-major tap grid and derives both totals from it.
    pub fn new(radius: usize, taps: Vec<KernelTap>) -> Result<Self> {
        let size = 2 * radius + 1;
        Self::check_grid(size, &taps)?;
        let total_weight = taps.iter().map(|t| t.weight).sum();
        let separable_total_weight = (0..size)
            .map(|d| taps[radius * size + d].weight + taps[d * size + radius].weight)
            .sum();
        Ok(Self {
            radius,
            taps,
            total_weight,
            separable_total_weight,
        })
    }

    /// Builds a kernel with caller-supplied totals.
    pub fn with_totals(
        radius: usize,
        taps: Vec<KernelTap>,
        total_weight: f32,
        separable_total_weight: f32,
    ) -> Result<Self> {
        Self::check_grid(2 * radius + 1, &taps)?;
        if !total_weight.is_finite() || !separable_total_weight.is_finite() {
            return Err(FlowError::kernel("total weights must be finite"));
        }
        Ok(Self {
            radius,
            taps,
            total_weight,
            separable_total_weight,
        })
    }

    /// The circular direction kernel.
    ///
    /// Every tap points away from the centre (`atan2` of its offset). The centre
    /// has weight 0 because it has no direction; taps whose radius (plus half a
    /// pixel) lies inside `size / 2 - 1` weigh 1, and the rim decays linearly to 0.
    pub fn weighted_angular(size: usize) -> Result<Self> {
        if size < 3 || size % 2 == 0 {
            return Err(FlowError::kernel(format!(
                "angular kernel size must be odd and at least 3, got {size}"
            )));
        }
        let radius = size / 2;
        let center = radius as f32;
        let edge_boundary = (size / 2) as f32 - ANGULAR_EDGE_SIZE;
        let edge_step = 1.0 / (1.0 + ANGULAR_EDGE_SIZE);

        let mut taps = Vec::with_capacity(size * size);
        for ky in 0..size {
            let yp = ky as f32 - center;
            for kx in 0..size {
                let xp = kx as f32 - center;
                let (sin, cos) = yp.atan2(xp).sin_cos();
                let tap_radius = xp.hypot(yp) + 0.5;

                let weight = if kx == radius && ky == radius {
                    0.0
                } else if tap_radius <= edge_boundary {
                    1.0
                } else {
                    (1.0 - (tap_radius - edge_boundary) * edge_step).max(0.0)
                };
                taps.push(KernelTap::new(Vec2::new(cos, sin), weight));
            }
        }
        Self::new(radius, taps)
    }

    /// Outer product of a row profile and a column profile.
    ///
    /// Tap `(kx, ky)` has direction `row[kx].direction ⊙ column[ky].direction` and
    /// weight `row[kx].weight * column[ky].weight`. Both profiles must have a unit
    /// centre tap (direction (1, 1), weight 1), which makes the centre row equal to
    /// `row` and the centre column equal to `column`; the two-pass result then
    /// matches the full result, so both modes share one normaliser.
    pub fn separable(row: &[KernelTap], column: &[KernelTap]) -> Result<Self> {
        if row.len() != column.len() || row.len() % 2 == 0 {
            return Err(FlowError::kernel(format!(
                "separable profiles must share one odd length, got {} and {}",
                row.len(),
                column.len()
            )));
        }
        let radius = row.len() / 2;
        let unit = KernelTap::new(Vec2::ONE, 1.0);
        if row[radius] != unit || column[radius] != unit {
            return Err(FlowError::kernel("separable profiles need a unit centre tap"));
        }

        let taps: Vec<KernelTap> = column
            .iter()
            .flat_map(|c| {
                row.iter()
                    .map(move |r| KernelTap::new(r.direction.hadamard(c.direction), r.weight * c.weight))
            })
            .collect();
        let total: f32 = taps.iter().map(|t| t.weight).sum();
        Self::with_totals(radius, taps, total, total)
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Side length, `2 * radius + 1`.
    pub fn size(&self) -> usize {
        2 * self.radius + 1
    }

    /// Tap at kernel coordinate `(kx, ky)`, both in `0..size`.
    #[inline]
    pub fn tap(&self, kx: usize, ky: usize) -> KernelTap {
        self.taps[ky * self.size() + kx]
    }

    pub fn taps(&self) -> &[KernelTap] {
        &self.taps
    }

    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    pub fn separable_total_weight(&self) -> f32 {
        self.separable_total_weight
    }

    /// The weight a convolution in `mode` divides by; zero is `InvalidKernel`.
    pub fn normalizer(&self, mode: ConvolutionMode) -> Result<f32> {
        let total = match mode {
            ConvolutionMode::Full => self.total_weight,
            ConvolutionMode::Separable | ConvolutionMode::Cross => self.separable_total_weight,
        };
        if total == 0.0 {
            return Err(FlowError::kernel(format!(
                "total weight for {mode:?} convolution is zero"
            )));
        }
        Ok(total)
    }

    /// True when the two-pass separable mode reproduces the full mode for this
    /// kernel: every tap equals the componentwise product of its centre-row and
    /// centre-column taps, and both normalisers agree.
    pub fn is_axis_separable(&self) -> bool {
        const TOLERANCE: f32 = 1e-5;
        let r = self.radius;
        let size = self.size();
        if (self.total_weight - self.separable_total_weight).abs() > TOLERANCE * self.total_weight.abs().max(1.0) {
            return false;
        }
        (0..size).all(|ky| {
            (0..size).all(|kx| {
                let row = self.tap(kx, r);
                let column = self.tap(r, ky);
                let expected = (row.direction * row.weight).hadamard(column.direction * column.weight);
                let tap = self.tap(kx, ky);
                let actual = tap.direction * tap.weight;
                (expected - actual).length() <= TOLERANCE
            })
        })
    }

    fn check_grid(size: usize, taps: &[KernelTap]) -> Result<()> {
        if taps.len() != size * size {
            return Err(FlowError::kernel(format!(
                "a {size}x{size} kernel needs {} taps, got {}",
                size * size,
                taps.len()
            )));
        }
        if let Some(bad) = taps.iter().find(|t| !t.weight.is_finite() || !t.direction.is_finite()) {
            return Err(FlowError::kernel(format!("non-finite tap {bad:?}")));
        }
        Ok(())
    }
}
