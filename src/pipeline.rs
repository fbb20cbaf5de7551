// THEORY:
// The `pipeline` module is the top-level API of the engine. It wires the full
// stack (ingestion, pyramid, edges, block features, motion estimation, global
// summary) into a single object that takes raw frames and hands back a
// `FrameReport` per frame, ready for whatever renders or consumes it.
//
// Key architectural principles:
// 1.  **Configuration Up Front**: `PipelineConfig` replaces every piece of
//     process-wide tuning state. It is validated once in the constructor; after
//     that a frame can only fail on its own data.
// 2.  **Stateless Analysis, Stateful Commit**: per-frame feature extraction lives
//     in `FrameAnalyzer` and holds no history. The only state carried from frame
//     to frame is the motion estimator's retained snapshot, wrapped here in
//     `MotionStage`. The parallel pipeline reuses both pieces unchanged.
// 3.  **Reports, Not Side Effects**: each call returns the motion field, the
//     global summary and optionally one pyramid level. The pipeline draws nothing.

use crate::core_modules::block_aggregator::BlockGeometry;
use crate::core_modules::buffer2d::ScalarField;
use crate::core_modules::convolution::ConvolutionMode;
use crate::core_modules::frame_analyzer::{BlockFeatures, FrameAnalyzer, FrameFeatures};
use crate::core_modules::motion::{
    BrightnessCenterMotion, BrightnessMotionEstimator, GradientDirectionMotion, GradientMotionEstimator,
    MotionEstimator, global_motion,
};
use crate::core_modules::pyramid::{MIN_LEVEL_SIZE, compressed_size};
use crate::error::{FlowError, Result};
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::motion::{EstimatorState, GlobalMotion, MotionField, MotionVector};
pub use crate::core_modules::pyramid::PyramidLevel;

/// Which block feature and motion model the pipeline runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MotionVariant {
    /// Energy-weighted block centroids.
    #[default]
    BrightnessCenter,
    /// Block-sized gradient kernel; blocks must be square with an odd size.
    GradientDirection,
}

/// What the block stage reads from the analysed pyramid level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputSource {
    #[default]
    Intensity,
    /// Edge strength from the edge detector, scaled by `input_amplification`.
    EdgeMagnitudes,
}

/// Configuration for the motion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Block size on the analysed level, not on the input frame.
    pub block_width: u32,
    pub block_height: u32,
    pub variant: MotionVariant,
    pub input: InputSource,
    /// Side of the angular edge kernel; odd and at least 3.
    pub edge_kernel_size: usize,
    pub edge_mode: ConvolutionMode,
    pub input_amplification: f32,
    pub motion_amplification: f32,
    /// Gaussian levels built per frame, level 0 included.
    pub pyramid_levels: usize,
    /// Level the block features are computed on.
    pub analysis_level: usize,
    /// Level copied into every `FrameReport`, if any.
    pub export_level: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_width: 640,
            image_height: 480,
            block_width: 15,
            block_height: 15,
            variant: MotionVariant::default(),
            input: InputSource::default(),
            edge_kernel_size: 3,
            edge_mode: ConvolutionMode::default(),
            input_amplification: 1.0,
            motion_amplification: 1.0,
            pyramid_levels: 3,
            analysis_level: 0,
            export_level: None,
        }
    }
}

impl PipelineConfig {
    /// Size of pyramid level `level` for this frame size.
    pub fn level_dimensions(&self, level: usize) -> (usize, usize) {
        (0..level).fold(
            (self.image_width as usize, self.image_height as usize),
            |(w, h), _| (compressed_size(w), compressed_size(h)),
        )
    }

    /// Size of the level the blocks tile.
    pub fn analysis_dimensions(&self) -> (usize, usize) {
        self.level_dimensions(self.analysis_level)
    }

    /// Checks every field; nothing is re-validated per frame.
    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(FlowError::config("image size must be non-zero"));
        }
        if self.pyramid_levels == 0 {
            return Err(FlowError::config("pyramid_levels must be at least 1"));
        }
        for level in 1..self.pyramid_levels {
            let (w, h) = self.level_dimensions(level);
            if w < MIN_LEVEL_SIZE || h < MIN_LEVEL_SIZE {
                return Err(FlowError::config(format!(
                    "pyramid level {level} of a {}x{} frame would be {w}x{h}",
                    self.image_width, self.image_height
                )));
            }
        }
        if self.analysis_level >= self.pyramid_levels {
            return Err(FlowError::config(format!(
                "analysis_level {} is outside a {}-level pyramid",
                self.analysis_level, self.pyramid_levels
            )));
        }
        if let Some(level) = self.export_level.filter(|l| *l >= self.pyramid_levels) {
            return Err(FlowError::config(format!(
                "export_level {level} is outside a {}-level pyramid",
                self.pyramid_levels
            )));
        }
        if self.edge_kernel_size < 3 || self.edge_kernel_size % 2 == 0 {
            return Err(FlowError::config(format!(
                "edge_kernel_size must be odd and at least 3, got {}",
                self.edge_kernel_size
            )));
        }
        if self.input == InputSource::EdgeMagnitudes && self.edge_mode == ConvolutionMode::Separable {
            return Err(FlowError::config(
                "the angular edge kernel does not factor by axis; use Full or Cross edge_mode",
            ));
        }
        if !self.input_amplification.is_finite() || !self.motion_amplification.is_finite() {
            return Err(FlowError::config("amplification factors must be finite"));
        }
        if self.variant == MotionVariant::GradientDirection
            && (self.block_width != self.block_height || self.block_width < 3 || self.block_width % 2 == 0)
        {
            return Err(FlowError::config(format!(
                "gradient blocks must be square with an odd side of at least 3, got {}x{}",
                self.block_width, self.block_height
            )));
        }
        let (w, h) = self.analysis_dimensions();
        BlockGeometry::new(w, h, self.block_width as usize, self.block_height as usize)?;
        Ok(())
    }
}

/// The output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Position of the frame in the input sequence, from 0.
    pub frame_index: u64,
    pub motion: MotionField,
    pub global_motion: GlobalMotion,
    /// Estimator state after this frame.
    pub state: EstimatorState,
    pub pyramid_level: Option<PyramidLevel>,
}

/// The stateful half of the pipeline: one motion estimator of the configured variant.
#[derive(Debug, Clone)]
pub(crate) enum MotionStage {
    Brightness(BrightnessMotionEstimator),
    Gradient(GradientMotionEstimator),
}

impl MotionStage {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        let amplification = config.motion_amplification;
        match config.variant {
            MotionVariant::BrightnessCenter => {
                MotionStage::Brightness(MotionEstimator::new(BrightnessCenterMotion { amplification }))
            }
            MotionVariant::GradientDirection => {
                MotionStage::Gradient(MotionEstimator::new(GradientDirectionMotion { amplification }))
            }
        }
    }

    /// Estimates motion for one frame's features and turns it into a report.
    pub(crate) fn commit(&mut self, frame_index: u64, features: FrameFeatures) -> Result<FrameReport> {
        let motion = match (&mut *self, features.blocks) {
            (MotionStage::Brightness(estimator), BlockFeatures::Brightness(grid)) => estimator.estimate(grid)?,
            (MotionStage::Gradient(estimator), BlockFeatures::Gradient(grid)) => estimator.estimate(grid)?,
            _ => return Err(FlowError::config("block features do not match the motion variant")),
        };
        let report = FrameReport {
            frame_index,
            global_motion: global_motion(&motion),
            motion,
            state: self.state(),
            pyramid_level: features.exported_level,
        };
        debug!(
            frame = frame_index,
            state = ?report.state,
            global = ?report.global_motion,
            "frame committed"
        );
        Ok(report)
    }

    pub(crate) fn state(&self) -> EstimatorState {
        match self {
            MotionStage::Brightness(estimator) => estimator.state(),
            MotionStage::Gradient(estimator) => estimator.state(),
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            MotionStage::Brightness(estimator) => estimator.reset(),
            MotionStage::Gradient(estimator) => estimator.reset(),
        }
    }
}

/// The main, top-level struct for the motion engine. Processes one frame per call.
pub struct MotionPipeline {
    analyzer: FrameAnalyzer,
    stage: MotionStage,
    config: PipelineConfig,
    frame_counter: u64,
    last_motion: Option<MotionField>,
}

impl MotionPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let analyzer = FrameAnalyzer::new(&config)?;
        info!(
            width = config.image_width,
            height = config.image_height,
            variant = ?config.variant,
            input = ?config.input,
            grid = ?analyzer.geometry().grid_dimensions(),
            "motion pipeline configured"
        );
        Ok(Self {
            analyzer,
            stage: MotionStage::new(&config),
            config,
            frame_counter: 0,
            last_motion: None,
        })
    }

    /// Runs one packed RGBA frame through the whole stack.
    pub fn process_frame(&mut self, frame_buffer: &[u8]) -> Result<FrameReport> {
        let frame_index = self.next_index();
        // Stage 1: stateless analysis
        let features = self.analyzer.analyze(frame_buffer)?;
        // Stage 2: motion against the retained snapshot
        self.commit(frame_index, features)
    }

    /// Same as `process_frame` for a caller that already has intensity.
    pub fn process_intensity(&mut self, intensity: ScalarField) -> Result<FrameReport> {
        let frame_index = self.next_index();
        let features = self.analyzer.analyze_intensity(intensity)?;
        self.commit(frame_index, features)
    }

    /// Returns true when the frame produced any qualifying block motion.
    pub fn motion_detected(&mut self, frame_buffer: &[u8]) -> Result<bool> {
        let report = self.process_frame(frame_buffer)?;
        Ok(matches!(report.global_motion, GlobalMotion::Detected { .. }))
    }

    /// Forgets the previous frame; the next frame starts a new sequence.
    pub fn reset(&mut self) {
        self.stage.reset();
        self.last_motion = None;
    }

    pub fn state(&self) -> EstimatorState {
        self.stage.state()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn get_last_motion_field(&self) -> Option<&MotionField> {
        self.last_motion.as_ref()
    }

    fn next_index(&mut self) -> u64 {
        let index = self.frame_counter;
        self.frame_counter += 1;
        index
    }

    fn commit(&mut self, frame_index: u64, features: FrameFeatures) -> Result<FrameReport> {
        let report = self.stage.commit(frame_index, features)?;
        self.last_motion = Some(report.motion.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::vector2d::Vec2;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            image_width: 32,
            image_height: 24,
            block_width: 8,
            block_height: 8,
            pyramid_levels: 2,
            ..PipelineConfig::default()
        }
    }

    /// A bright 4x4 square on black at `(left, top)`.
    fn square_frame(left: usize, top: usize) -> Vec<u8> {
        let (w, h) = (32, 24);
        let mut frame = vec![0u8; w * h * 4];
        for y in top..top + 4 {
            for x in left..left + 4 {
                let i = (y * w + x) * 4;
                frame[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        frame
    }

    /// A bright `rw`x`rh` rectangle on black in a `w`x`h` frame.
    fn rectangle_frame(w: usize, h: usize, left: usize, top: usize, rw: usize, rh: usize) -> Vec<u8> {
        let mut frame = vec![0u8; w * h * 4];
        for y in top..top + rh {
            for x in left..left + rw {
                let i = (y * w + x) * 4;
                frame[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        frame
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected_up_front() {
        let bad = [
            PipelineConfig { pyramid_levels: 0, ..small_config() },
            PipelineConfig { analysis_level: 2, ..small_config() },
            PipelineConfig { export_level: Some(5), ..small_config() },
            PipelineConfig { edge_kernel_size: 4, ..small_config() },
            PipelineConfig { block_width: 40, ..small_config() },
            PipelineConfig { pyramid_levels: 4, ..small_config() },
            PipelineConfig { variant: MotionVariant::GradientDirection, ..small_config() },
            PipelineConfig {
                input: InputSource::EdgeMagnitudes,
                edge_mode: ConvolutionMode::Separable,
                ..small_config()
            },
        ];
        for config in bad {
            let err = MotionPipeline::new(config.clone()).err();
            assert!(matches!(err, Some(FlowError::InvalidConfig(_))), "{config:?}");
        }
    }

    #[test]
    fn first_frame_reports_no_motion() {
        let mut pipeline = MotionPipeline::new(small_config()).unwrap();
        let report = pipeline.process_frame(&square_frame(10, 10)).unwrap();
        assert_eq!(report.frame_index, 0);
        assert_eq!(report.state, EstimatorState::AwaitingPreviousFrame);
        assert_eq!(report.global_motion, GlobalMotion::NoMotionDetected);
        assert!(report.motion.as_slice().iter().all(|m| *m == MotionVector::ZERO));
    }

    #[test]
    fn moving_square_is_tracked_inside_its_block() {
        let mut pipeline = MotionPipeline::new(small_config()).unwrap();
        pipeline.process_frame(&square_frame(9, 9)).unwrap();
        let report = pipeline.process_frame(&square_frame(11, 9)).unwrap();
        assert_eq!(report.state, EstimatorState::SteadyState);

        let block = report.motion[(1, 1)];
        assert!(block.dx > 0.0, "{block:?}");
        assert!(block.dy.abs() < 1e-3, "{block:?}");
        match report.global_motion {
            GlobalMotion::Detected { motion, contributing_blocks } => {
                assert_eq!(contributing_blocks, 1);
                assert_eq!(motion, Vec2::new(block.dx, block.dy));
            }
            GlobalMotion::NoMotionDetected => panic!("expected motion"),
        }
        assert_eq!(pipeline.get_last_motion_field(), Some(&report.motion));
    }

    #[test]
    fn edge_input_tracks_motion_in_full_and_cross_modes() {
        for edge_mode in [ConvolutionMode::Full, ConvolutionMode::Cross] {
            let config = PipelineConfig {
                input: InputSource::EdgeMagnitudes,
                input_amplification: 4.0,
                edge_mode,
                ..small_config()
            };
            let mut pipeline = MotionPipeline::new(config).unwrap();
            pipeline.process_frame(&square_frame(9, 9)).unwrap();
            let report = pipeline.process_frame(&square_frame(11, 9)).unwrap();
            match report.global_motion {
                GlobalMotion::Detected { motion, .. } => assert!(motion.x > 0.0, "{edge_mode:?}: {motion:?}"),
                GlobalMotion::NoMotionDetected => panic!("{edge_mode:?}: expected motion"),
            }
        }
    }

    #[test]
    fn reset_starts_a_new_sequence() {
        let mut pipeline = MotionPipeline::new(small_config()).unwrap();
        pipeline.process_frame(&square_frame(9, 9)).unwrap();
        pipeline.reset();
        assert_eq!(pipeline.state(), EstimatorState::Idle);
        let report = pipeline.process_frame(&square_frame(11, 9)).unwrap();
        assert_eq!(report.frame_index, 1);
        assert_eq!(report.state, EstimatorState::AwaitingPreviousFrame);
    }

    #[test]
    fn gradient_variant_runs_end_to_end() {
        let config = PipelineConfig {
            variant: MotionVariant::GradientDirection,
            block_width: 7,
            block_height: 7,
            export_level: Some(1),
            ..small_config()
        };
        let mut pipeline = MotionPipeline::new(config).unwrap();
        pipeline.process_frame(&square_frame(8, 8)).unwrap();
        let report = pipeline.process_frame(&square_frame(9, 8)).unwrap();
        assert_eq!(report.motion.dimensions(), (4, 3));
        assert!(report.motion.as_slice().iter().all(|m| m.displacement().length() <= 10.0));
        assert_eq!(report.pyramid_level.map(|l| l.field.dimensions()), Some((16, 12)));
    }

    #[test]
    fn gradient_variant_reports_global_motion() {
        let config = PipelineConfig {
            image_width: 64,
            image_height: 48,
            variant: MotionVariant::GradientDirection,
            block_width: 7,
            block_height: 7,
            ..PipelineConfig::default()
        };
        let mut pipeline = MotionPipeline::new(config).unwrap();
        let mut detected = 0;
        for t in 0..20 {
            let report = pipeline.process_frame(&rectangle_frame(64, 48, 8 + t, 6 + t, 12, 16)).unwrap();
            if let GlobalMotion::Detected { contributing_blocks, .. } = report.global_motion {
                assert!(contributing_blocks > 0);
                detected += 1;
            }
            assert!(report.motion.as_slice().iter().all(|m| m.displacement().length() <= 10.0));
        }
        assert!(detected > 0, "a sliding rectangle never registered as motion");
    }

    #[test]
    fn wrong_frame_size_fails_without_touching_state() {
        let mut pipeline = MotionPipeline::new(small_config()).unwrap();
        pipeline.process_frame(&square_frame(9, 9)).unwrap();
        assert!(pipeline.process_frame(&[0u8; 7]).is_err());
        assert_eq!(pipeline.state(), EstimatorState::AwaitingPreviousFrame);
    }

    #[test]
    fn intensity_input_matches_raw_frames() {
        let mut raw = MotionPipeline::new(small_config()).unwrap();
        let mut direct = MotionPipeline::new(small_config()).unwrap();
        for left in [9, 11] {
            let frame = square_frame(left, 9);
            let a = raw.process_frame(&frame).unwrap();
            let intensity = crate::core_modules::intensity::rgba_to_intensity(&frame, 32, 24).unwrap();
            let b = direct.process_intensity(intensity).unwrap();
            assert_eq!(a.motion, b.motion);
        }
    }
}
