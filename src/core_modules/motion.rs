// THEORY:
// The motion estimator is the temporal layer of the engine. It compares the block
// grid of the current frame with the grid it retained from the previous frame and
// turns every block pair into a motion vector with a validity score.
//
// Key architectural principles:
// 1.  **One Retained Snapshot**: the estimator owns exactly one previous grid.
//     Each call computes motion against it and only then replaces it with the
//     current grid. Because `estimate` takes `&mut self`, the swap can never
//     overlap a computation that still reads the old snapshot.
// 2.  **Pluggable Block Models**: the per-block arithmetic lives behind the
//     `MotionModel` trait. The brightness-centre model compares energy-weighted
//     centroids; the gradient-direction model divides the energy change by the
//     previous average gradient. The estimator's state handling is shared.
// 3.  **Clamp, Don't Fail**: a near-zero gradient component or an implausibly
//     long vector produces a zero vector with zero validity. Degenerate inputs
//     never surface as errors or as NaN in the motion field.
// 4.  **Validity Is Energy**: validity is a signal-strength proxy, not a
//     probability. Both models score it from un-normalised block sums, so one
//     threshold serves both. The global summary only averages blocks whose
//     validity clears `VALIDITY_THRESHOLD`, and reports "no motion" when none do.

use crate::core_modules::block_aggregator::{BlockAggregate, GradientBlock};
use crate::core_modules::buffer2d::Buffer2D;
use crate::core_modules::vector2d::Vec2;
use crate::error::Result;
use std::fmt::Debug;
use tracing::trace;

/// Blocks at or below this validity are ignored by the global summary.
pub const VALIDITY_THRESHOLD: f32 = 1.0;
/// Gradient-model vectors longer than this are rejected as outliers.
pub const OUTLIER_MAGNITUDE: f32 = 10.0;
/// Gradient components at or below this magnitude count as zero.
pub const DIRECTION_EPSILON: f32 = 1e-6;

/// Motion of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionVector {
    pub dx: f32,
    pub dy: f32,
    /// Confidence proxy derived from block energy; thresholded by consumers.
    pub validity: f32,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector {
        dx: 0.0,
        dy: 0.0,
        validity: 0.0,
    };

    pub fn new(displacement: Vec2, validity: f32) -> Self {
        Self {
            dx: displacement.x,
            dy: displacement.y,
            validity,
        }
    }

    pub fn displacement(&self) -> Vec2 {
        Vec2::new(self.dx, self.dy)
    }

    pub fn is_valid(&self) -> bool {
        self.validity > VALIDITY_THRESHOLD
    }
}

pub type MotionField = Buffer2D<MotionVector>;

/// Per-block motion arithmetic.
pub trait MotionModel: Send + Sync {
    type Block: Copy + Default + Debug + Send + Sync;

    fn block_motion(&self, current: &Self::Block, previous: &Self::Block) -> MotionVector;
}

/// Motion from the shift of energy-weighted brightness centres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessCenterMotion {
    pub amplification: f32,
}

impl Default for BrightnessCenterMotion {
    fn default() -> Self {
        Self { amplification: 1.0 }
    }
}

/// Centroid scaled by energy; degenerate blocks contribute nothing.
fn weighted_centroid(block: &BlockAggregate) -> Vec2 {
    if block.is_degenerate() {
        Vec2::ZERO
    } else {
        block.centroid * block.energy
    }
}

impl MotionModel for BrightnessCenterMotion {
    type Block = BlockAggregate;

    fn block_motion(&self, current: &BlockAggregate, previous: &BlockAggregate) -> MotionVector {
        let shift = (weighted_centroid(current) - weighted_centroid(previous)) * self.amplification;
        let validity = current.energy + (current.energy - previous.energy).abs();
        MotionVector::new(shift, validity)
    }
}

/// Motion from the energy change along the previous average gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientDirectionMotion {
    pub amplification: f32,
}

impl Default for GradientDirectionMotion {
    fn default() -> Self {
        Self { amplification: 1.0 }
    }
}

impl MotionModel for GradientDirectionMotion {
    type Block = GradientBlock;

    fn block_motion(&self, current: &GradientBlock, previous: &GradientBlock) -> MotionVector {
        let delta = (current.energy - previous.energy) * self.amplification;
        let gradient = previous.direction;
        if gradient.x.abs() <= DIRECTION_EPSILON || gradient.y.abs() <= DIRECTION_EPSILON {
            return MotionVector::ZERO;
        }
        let shift = Vec2::new(delta / gradient.x, delta / gradient.y);
        if !shift.is_finite() || shift.length() > OUTLIER_MAGNITUDE {
            return MotionVector::ZERO;
        }
        let validity = current.strength + (current.strength - previous.strength).abs();
        MotionVector::new(shift, validity)
    }
}

/// Motion of every block pair of two same-shape grids.
pub fn block_motion_field<M: MotionModel>(
    model: &M,
    current: &Buffer2D<M::Block>,
    previous: &Buffer2D<M::Block>,
) -> Result<MotionField> {
    current.par_zip_map(previous, "motion estimation", |c, p| model.block_motion(&c, &p))
}

/// Where the estimator is in its frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorState {
    /// No frame seen yet.
    Idle,
    /// One frame seen; it only primed the snapshot.
    AwaitingPreviousFrame,
    /// Every frame is compared with its predecessor.
    SteadyState,
}

/// Block motion between consecutive frames.
#[derive(Debug, Clone)]
pub struct MotionEstimator<M: MotionModel> {
    model: M,
    previous: Option<Buffer2D<M::Block>>,
    state: EstimatorState,
}

pub type BrightnessMotionEstimator = MotionEstimator<BrightnessCenterMotion>;
pub type GradientMotionEstimator = MotionEstimator<GradientDirectionMotion>;

impl<M: MotionModel> MotionEstimator<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            previous: None,
            state: EstimatorState::Idle,
        }
    }

    /// Motion of `current` against the retained snapshot, which `current` then
    /// replaces. The first frame yields an all-zero field.
    ///
    /// A grid of a different shape is a `DimensionMismatch` and leaves the
    /// retained snapshot untouched.
    pub fn estimate(&mut self, current: Buffer2D<M::Block>) -> Result<MotionField> {
        let field = match &self.previous {
            None => MotionField::new(current.width(), current.height()),
            Some(previous) => block_motion_field(&self.model, &current, previous)?,
        };
        self.state = if self.previous.is_some() {
            EstimatorState::SteadyState
        } else {
            EstimatorState::AwaitingPreviousFrame
        };
        trace!(state = ?self.state, blocks = field.len(), "motion estimated");
        self.previous = Some(current);
        Ok(field)
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    pub fn previous_snapshot(&self) -> Option<&Buffer2D<M::Block>> {
        self.previous.as_ref()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Drops the snapshot; the next frame is treated as the first.
    pub fn reset(&mut self) {
        self.previous = None;
        self.state = EstimatorState::Idle;
    }
}

/// Scene-wide motion summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobalMotion {
    /// No block cleared the validity threshold.
    NoMotionDetected,
    Detected {
        /// Mean displacement of the contributing blocks.
        motion: Vec2,
        contributing_blocks: usize,
    },
}

impl GlobalMotion {
    pub fn motion(&self) -> Option<Vec2> {
        match self {
            GlobalMotion::NoMotionDetected => None,
            GlobalMotion::Detected { motion, .. } => Some(*motion),
        }
    }
}

/// Averages the motion of every block with validity above `VALIDITY_THRESHOLD`.
pub fn global_motion(field: &MotionField) -> GlobalMotion {
    let (sum, count) = field
        .as_slice()
        .iter()
        .filter(|m| m.is_valid())
        .fold((Vec2::ZERO, 0usize), |(sum, n), m| (sum + m.displacement(), n + 1));
    if count == 0 {
        GlobalMotion::NoMotionDetected
    } else {
        GlobalMotion::Detected {
            motion: sum / count as f32,
            contributing_blocks: count,
        }
    }
}
