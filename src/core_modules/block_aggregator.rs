// THEORY:
// The block aggregator is the spatial reduction layer, the counterpart of the
// chunk grid in a frame-differencing engine. It tiles a field with fixed-size,
// non-overlapping blocks and reduces each one to a compact feature, producing a
// much smaller grid that the motion estimator compares frame to frame.
//
// Key architectural principles:
// 1.  **Fixed Tiling**: the grid is `(width / block_width) x (height / block_height)`.
//     Pixels of a partial trailing block are ignored, never padded.
// 2.  **Two Features**: the brightness-centre feature is the energy-weighted
//     centroid of a block (relative to the block's origin) plus its total energy.
//     The gradient feature applies a block-sized direction kernel to the block,
//     giving an average gradient direction plus a weighted energy.
// 3.  **Degenerate Blocks Are Data**: a block with zero energy has no centroid.
//     Its centroid is left as the NaN the division produces and its energy is 0;
//     consumers check `is_degenerate()` rather than the engine raising an error.
// 4.  **Parallel Per Block**: each output block is a pure function of its own
//     input pixels, computed with `par_from_fn` over the block grid.

use crate::core_modules::buffer2d::{Buffer2D, ScalarField};
use crate::core_modules::convolution::ConvolutionMode;
use crate::core_modules::kernel::Kernel;
use crate::core_modules::vector2d::Vec2;
use crate::error::{FlowError, Result};

/// How a field of a given size is tiled into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    /// Width of the field being tiled, in pixels.
    pub field_width: usize,
    /// Height of the field being tiled, in pixels.
    pub field_height: usize,
    pub block_width: usize,
    pub block_height: usize,
    /// Number of whole blocks per row.
    pub blocks_x: usize,
    /// Number of whole blocks per column.
    pub blocks_y: usize,
}

impl BlockGeometry {
    pub fn new(field_width: usize, field_height: usize, block_width: usize, block_height: usize) -> Result<Self> {
        if block_width == 0 || block_height == 0 {
            return Err(FlowError::config("block size must be non-zero"));
        }
        if block_width > field_width || block_height > field_height {
            return Err(FlowError::config(format!(
                "a {block_width}x{block_height} block does not fit in a {field_width}x{field_height} field"
            )));
        }
        Ok(Self {
            field_width,
            field_height,
            block_width,
            block_height,
            blocks_x: field_width / block_width,
            blocks_y: field_height / block_height,
        })
    }

    /// `(blocks_x, blocks_y)`.
    pub fn grid_dimensions(&self) -> (usize, usize) {
        (self.blocks_x, self.blocks_y)
    }

    pub fn block_count(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    /// Top-left pixel of block `(bx, by)`.
    pub fn block_origin(&self, bx: usize, by: usize) -> (usize, usize) {
        (bx * self.block_width, by * self.block_height)
    }

    /// Pixel at the middle of block `(bx, by)`.
    pub fn block_center(&self, bx: usize, by: usize) -> Vec2 {
        let (x, y) = self.block_origin(bx, by);
        Vec2::new(
            x as f32 + self.block_width as f32 / 2.0,
            y as f32 + self.block_height as f32 / 2.0,
        )
    }

    fn ensure_field(&self, field: &ScalarField) -> Result<()> {
        let expected = (self.field_width, self.field_height);
        if field.dimensions() != expected {
            return Err(FlowError::DimensionMismatch {
                context: "block aggregation",
                expected,
                actual: field.dimensions(),
            });
        }
        Ok(())
    }
}

/// Brightness-centre feature of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockAggregate {
    /// Energy-weighted centroid relative to the block origin.
    pub centroid: Vec2,
    /// Sum of the block's pixel values.
    pub energy: f32,
}

impl BlockAggregate {
    /// A block with no energy has no meaningful centroid.
    pub fn is_degenerate(&self) -> bool {
        self.energy == 0.0 || !self.centroid.is_finite()
    }
}

/// Gradient feature of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradientBlock {
    /// Kernel-weighted average gradient direction.
    pub direction: Vec2,
    /// Kernel-weighted average intensity.
    pub energy: f32,
    /// Kernel-weighted intensity sum before normalisation. On the same scale as
    /// `BlockAggregate::energy`, so it drives the block's validity.
    pub strength: f32,
}

pub type BlockGrid = Buffer2D<BlockAggregate>;
pub type GradientBlockGrid = Buffer2D<GradientBlock>;

/// Reduces every block of `field` to its brightness centre and energy.
pub fn aggregate_brightness_centers(field: &ScalarField, geometry: &BlockGeometry) -> Result<BlockGrid> {
    geometry.ensure_field(field)?;
    Ok(BlockGrid::par_from_fn(geometry.blocks_x, geometry.blocks_y, |bx, by| {
        let (xs, ys) = geometry.block_origin(bx, by);
        let mut weighted = Vec2::ZERO;
        let mut energy = 0.0;
        for dy in 0..geometry.block_height {
            for dx in 0..geometry.block_width {
                let pixel = field[(xs + dx, ys + dy)];
                weighted += Vec2::new(dx as f32, dy as f32) * pixel;
                energy += pixel;
            }
        }
        BlockAggregate {
            centroid: weighted / energy,
            energy,
        }
    }))
}

/// Applies a block-sized direction kernel to every block.
#[derive(Debug, Clone)]
pub struct GradientBlockAggregator {
    kernel: Kernel,
    total_weight: f32,
    geometry: BlockGeometry,
}

impl GradientBlockAggregator {
    /// The kernel must be square with the block's size, and blocks must be square.
    pub fn new(kernel: Kernel, geometry: BlockGeometry) -> Result<Self> {
        if geometry.block_width != geometry.block_height {
            return Err(FlowError::config(format!(
                "gradient blocks must be square, got {}x{}",
                geometry.block_width, geometry.block_height
            )));
        }
        if kernel.size() != geometry.block_width {
            return Err(FlowError::config(format!(
                "kernel size {} does not match block size {}",
                kernel.size(),
                geometry.block_width
            )));
        }
        let total_weight = kernel.normalizer(ConvolutionMode::Full)?;
        Ok(Self {
            kernel,
            total_weight,
            geometry,
        })
    }

    /// Aggregator over a `Kernel::weighted_angular(block_size)` kernel.
    pub fn angular(field_width: usize, field_height: usize, block_size: usize) -> Result<Self> {
        let geometry = BlockGeometry::new(field_width, field_height, block_size, block_size)?;
        Self::new(Kernel::weighted_angular(block_size)?, geometry)
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    pub fn aggregate(&self, field: &ScalarField) -> Result<GradientBlockGrid> {
        self.geometry.ensure_field(field)?;
        let size = self.kernel.size();
        Ok(GradientBlockGrid::par_from_fn(self.geometry.blocks_x, self.geometry.blocks_y, |bx, by| {
            let (xs, ys) = self.geometry.block_origin(bx, by);
            let mut direction = Vec2::ZERO;
            let mut energy = 0.0;
            for ky in 0..size {
                for kx in 0..size {
                    let tap = self.kernel.tap(kx, ky);
                    let weighted = field[(xs + kx, ys + ky)] * tap.weight;
                    direction += tap.direction * weighted;
                    energy += weighted;
                }
            }
            GradientBlock {
                direction: direction / self.total_weight,
                energy: energy / self.total_weight,
                strength: energy,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_field_centres_each_block() {
        let field = ScalarField::filled(4, 4, 1.0);
        let geometry = BlockGeometry::new(4, 4, 2, 2).unwrap();
        let blocks = aggregate_brightness_centers(&field, &geometry).unwrap();
        assert_eq!(blocks.dimensions(), (2, 2));
        for block in blocks.as_slice() {
            assert_eq!(block.centroid, Vec2::new(0.5, 0.5));
            assert_eq!(block.energy, 4.0);
        }
    }

    #[test]
    fn centroid_is_relative_to_the_block() {
        let mut field = ScalarField::new(4, 4);
        field.set(3, 2, 2.0).unwrap();
        let geometry = BlockGeometry::new(4, 4, 2, 2).unwrap();
        let blocks = aggregate_brightness_centers(&field, &geometry).unwrap();
        assert_eq!(blocks[(1, 1)].centroid, Vec2::new(1.0, 0.0));
        assert_eq!(blocks[(1, 1)].energy, 2.0);
        assert!(blocks[(0, 0)].is_degenerate());
        assert!(blocks[(0, 0)].centroid.x.is_nan());
    }

    #[test]
    fn energy_is_conserved_over_whole_blocks() {
        let field = ScalarField::from_fn(10, 7, |x, y| (x + 3 * y) as f32 * 0.1);
        let geometry = BlockGeometry::new(10, 7, 3, 2).unwrap();
        assert_eq!(geometry.grid_dimensions(), (3, 3));
        let blocks = aggregate_brightness_centers(&field, &geometry).unwrap();
        let total: f32 = blocks.as_slice().iter().map(|b| b.energy).sum();
        let covered: f32 = field.cells().filter(|(x, y, _)| *x < 9 && *y < 6).map(|(_, _, v)| v).sum();
        assert!((total - covered).abs() < 1e-4);
    }

    #[test]
    fn geometry_and_field_must_agree() {
        assert!(BlockGeometry::new(4, 4, 0, 2).is_err());
        assert!(BlockGeometry::new(4, 4, 5, 2).is_err());
        let geometry = BlockGeometry::new(4, 4, 2, 2).unwrap();
        assert!(matches!(
            aggregate_brightness_centers(&ScalarField::new(6, 4), &geometry),
            Err(FlowError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn gradient_blocks_of_a_flat_field() {
        let aggregator = GradientBlockAggregator::angular(6, 6, 3).unwrap();
        let blocks = aggregator.aggregate(&ScalarField::filled(6, 6, 1.0)).unwrap();
        assert_eq!(blocks.dimensions(), (2, 2));
        for block in blocks.as_slice() {
            assert!((block.energy - 1.0).abs() < 1e-5);
            assert!((block.strength - aggregator.kernel.total_weight()).abs() < 1e-5);
            assert!(block.direction.length() < 1e-5);
        }
    }

    #[test]
    fn gradient_blocks_point_toward_brightness() {
        let field = ScalarField::from_fn(5, 5, |x, _| x as f32);
        let aggregator = GradientBlockAggregator::angular(5, 5, 5).unwrap();
        let blocks = aggregator.aggregate(&field).unwrap();
        assert!(blocks[(0, 0)].direction.x > 0.0);
        assert!(blocks[(0, 0)].direction.y.abs() < 1e-5);
    }

    #[test]
    fn gradient_kernel_must_match_the_block() {
        let geometry = BlockGeometry::new(8, 8, 4, 4).unwrap();
        assert!(GradientBlockAggregator::new(Kernel::weighted_angular(3).unwrap(), geometry).is_err());
        let wide = BlockGeometry::new(8, 8, 3, 1).unwrap();
        assert!(GradientBlockAggregator::new(Kernel::weighted_angular(3).unwrap(), wide).is_err());
    }
}
