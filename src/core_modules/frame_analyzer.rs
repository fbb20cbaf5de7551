// THEORY:
// The `FrameAnalyzer` is the stateless half of the per-frame work. It takes one
// raw frame and runs every stage that does not depend on earlier frames:
// ingestion, pyramid construction, optional edge extraction, and block reduction.
// What comes out is a `FrameFeatures` package ready for the motion estimator.
//
// Key architectural principles:
// 1.  **Stateless and Shareable**: the analyzer only holds immutable setup
//     (kernels, geometry, level choices), so it is `Clone + Send + Sync` and many
//     frames can be analysed at once on different workers.
// 2.  **Configured Once**: every kernel and geometry is built and validated in
//     `new`. A frame can only fail on its own data (wrong buffer size).
// 3.  **Strict Stage Order**: intensity -> pyramid -> (edges) -> blocks. Each stage
//     returns a finished buffer before the next one reads it.

use crate::core_modules::block_aggregator::{
    BlockGeometry, BlockGrid, GradientBlockAggregator, GradientBlockGrid, aggregate_brightness_centers,
};
use crate::core_modules::buffer2d::ScalarField;
use crate::core_modules::edge_detection::EdgeDetector;
use crate::core_modules::intensity::rgba_to_intensity;
use crate::core_modules::pyramid::{GaussianPyramid, PyramidLevel};
use crate::error::{FlowError, Result};
use crate::pipeline::{InputSource, MotionVariant, PipelineConfig};
use tracing::trace;

/// Per-frame block features, one variant per motion model.
#[derive(Debug, Clone)]
pub enum BlockFeatures {
    Brightness(BlockGrid),
    Gradient(GradientBlockGrid),
}

impl BlockFeatures {
    pub fn grid_dimensions(&self) -> (usize, usize) {
        match self {
            BlockFeatures::Brightness(grid) => grid.dimensions(),
            BlockFeatures::Gradient(grid) => grid.dimensions(),
        }
    }
}

/// Everything the analyzer extracts from one frame.
#[derive(Debug, Clone)]
pub struct FrameFeatures {
    pub blocks: BlockFeatures,
    /// The configured export level, if any.
    pub exported_level: Option<PyramidLevel>,
}

#[derive(Debug, Clone)]
enum BlockStage {
    Brightness(BlockGeometry),
    Gradient(GradientBlockAggregator),
}

/// Stateless per-frame feature extraction.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    width: usize,
    height: usize,
    pyramid_levels: usize,
    analysis_level: usize,
    export_level: Option<usize>,
    /// Present when the blocks read edge magnitudes instead of intensity.
    edges: Option<EdgeDetector>,
    blocks: BlockStage,
}

impl FrameAnalyzer {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (level_width, level_height) = config.analysis_dimensions();

        let edges = match config.input {
            InputSource::Intensity => None,
            InputSource::EdgeMagnitudes => Some(
                EdgeDetector::angular(config.edge_kernel_size, config.edge_mode)?
                    .with_amplification(config.input_amplification),
            ),
        };
        let block_width = config.block_width as usize;
        let block_height = config.block_height as usize;
        let blocks = match config.variant {
            MotionVariant::BrightnessCenter => {
                BlockStage::Brightness(BlockGeometry::new(level_width, level_height, block_width, block_height)?)
            }
            MotionVariant::GradientDirection => {
                BlockStage::Gradient(GradientBlockAggregator::angular(level_width, level_height, block_width)?)
            }
        };

        Ok(Self {
            width: config.image_width as usize,
            height: config.image_height as usize,
            pyramid_levels: config.pyramid_levels,
            analysis_level: config.analysis_level,
            export_level: config.export_level,
            edges,
            blocks,
        })
    }

    /// Block grid geometry of the analysed level.
    pub fn geometry(&self) -> BlockGeometry {
        match &self.blocks {
            BlockStage::Brightness(geometry) => *geometry,
            BlockStage::Gradient(aggregator) => *aggregator.geometry(),
        }
    }

    /// Analyses one packed RGBA frame.
    pub fn analyze(&self, frame: &[u8]) -> Result<FrameFeatures> {
        let intensity = rgba_to_intensity(frame, self.width, self.height)?;
        self.analyze_intensity(intensity)
    }

    /// Analyses a frame that is already an intensity field.
    pub fn analyze_intensity(&self, intensity: ScalarField) -> Result<FrameFeatures> {
        if intensity.dimensions() != (self.width, self.height) {
            return Err(FlowError::DimensionMismatch {
                context: "frame analysis",
                expected: (self.width, self.height),
                actual: intensity.dimensions(),
            });
        }

        let pyramid = GaussianPyramid::build(intensity, self.pyramid_levels)?;
        let level = pyramid.level(self.analysis_level).ok_or_else(|| {
            FlowError::config(format!("analysis level {} was not built", self.analysis_level))
        })?;

        let edge_field;
        let input = match &self.edges {
            None => &level.field,
            Some(detector) => {
                edge_field = detector.edge_magnitudes(&level.field)?;
                &edge_field
            }
        };

        let blocks = match &self.blocks {
            BlockStage::Brightness(geometry) => BlockFeatures::Brightness(aggregate_brightness_centers(input, geometry)?),
            BlockStage::Gradient(aggregator) => BlockFeatures::Gradient(aggregator.aggregate(input)?),
        };
        trace!(grid = ?blocks.grid_dimensions(), level = self.analysis_level, "frame analysed");

        let exported_level = self.export_level.and_then(|i| pyramid.level(i).cloned());
        Ok(FrameFeatures { blocks, exported_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            image_width: 40,
            image_height: 30,
            block_width: 5,
            block_height: 5,
            pyramid_levels: 2,
            ..PipelineConfig::default()
        }
    }

    fn grey_frame(width: usize, height: usize, value: u8) -> Vec<u8> {
        let mut frame = vec![value; width * height * 4];
        frame.chunks_mut(4).for_each(|px| px[3] = 255);
        frame
    }

    #[test]
    fn brightness_blocks_tile_the_analysis_level() {
        let analyzer = FrameAnalyzer::new(&config()).unwrap();
        let features = analyzer.analyze(&grey_frame(40, 30, 255)).unwrap();
        assert_eq!(features.blocks.grid_dimensions(), (8, 6));
        assert!(features.exported_level.is_none());
        let BlockFeatures::Brightness(grid) = features.blocks else {
            panic!("expected brightness blocks");
        };
        assert!((grid[(3, 3)].energy - 25.0).abs() < 1e-4);
    }

    #[test]
    fn coarser_analysis_level_and_export() {
        let analyzer = FrameAnalyzer::new(&PipelineConfig {
            analysis_level: 1,
            export_level: Some(1),
            ..config()
        })
        .unwrap();
        assert_eq!(analyzer.geometry().grid_dimensions(), (4, 3));
        let features = analyzer.analyze(&grey_frame(40, 30, 128)).unwrap();
        let level = features.exported_level.unwrap();
        assert_eq!(level.index, 1);
        assert_eq!(level.field.dimensions(), (20, 15));
    }

    #[test]
    fn gradient_variant_with_edge_input() {
        let analyzer = FrameAnalyzer::new(&PipelineConfig {
            variant: MotionVariant::GradientDirection,
            input: InputSource::EdgeMagnitudes,
            ..config()
        })
        .unwrap();
        let features = analyzer.analyze(&grey_frame(40, 30, 90)).unwrap();
        let BlockFeatures::Gradient(grid) = features.blocks else {
            panic!("expected gradient blocks");
        };
        assert_eq!(grid.dimensions(), (8, 6));
        // A flat frame has no edges away from the border band.
        assert!(grid[(4, 3)].energy.abs() < 1e-5);
    }

    #[test]
    fn frame_of_wrong_size_is_rejected() {
        let analyzer = FrameAnalyzer::new(&config()).unwrap();
        assert!(matches!(
            analyzer.analyze(&grey_frame(40, 29, 0)),
            Err(FlowError::FrameSize { .. })
        ));
        assert!(analyzer.analyze_intensity(ScalarField::new(30, 40)).is_err());
    }
}
