// THEORY:
// The `TemporalPyramid` is a Gaussian/Laplacian pyramid stacked along time instead
// of space. Every level keeps full-resolution frames; a coarser level holds frames
// that are each a 5-tap binomial blend of five consecutive finer frames, stepping
// two frames at a time.
//
// Key architectural principles:
// 1.  **Ring Buffers**: level 0 is a ring of the most recent input frames. Shifting
//     in a frame overwrites the oldest slot; temporal index 0 is always the oldest.
// 2.  **Aligned Centres**: a level of `n` frames feeds `2n + 3` frames below it, so
//     the temporal centre of every level is the same instant. Only the three
//     frames around that instant are expanded and differenced, which is all the
//     Laplacian and the collapse need.
// 3.  **Fused Kernels**: compress and expand run as `compress5`/`expand3` over
//     neighbouring frames. The Laplacian and collapse reuse the spatial pyramid's
//     per-pixel difference and sum.
// 4.  **Recomputed Per Frame**: every shift recomputes the coarser levels from the
//     ring. The structure holds no partial state between calls.

use crate::core_modules::buffer2d::ScalarField;
use crate::core_modules::fused_pyramid::{ExpandedTriple, compress5, expand3};
use crate::core_modules::pyramid::{collapse, laplacian};
use crate::error::{FlowError, Result};
use tracing::debug;

/// Number of frames level `level` keeps in a pyramid of `level_count` levels.
pub fn frames_per_level(level: usize, level_count: usize) -> usize {
    (level..level_count).fold(0, |n, _| 2 * n + 3)
}

/// One temporal level.
#[derive(Debug, Clone)]
pub struct TemporalLevel {
    index: usize,
    frames: Vec<ScalarField>,
    /// Ring slot holding temporal index 0.
    oldest: usize,
    /// The coarser level's interpolations around the centre; `None` on level 0.
    expanded: Option<ExpandedTriple>,
    /// Band-pass frames at centre - 1, centre, centre + 1.
    laplacians: [ScalarField; 3],
}

impl TemporalLevel {
    fn new(index: usize, frame_count: usize, width: usize, height: usize) -> Self {
        Self {
            index,
            frames: vec![ScalarField::new(width, height); frame_count],
            oldest: 0,
            expanded: None,
            laplacians: std::array::from_fn(|_| ScalarField::new(width, height)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame at `temporal_index`, 0 being the oldest.
    pub fn frame(&self, temporal_index: usize) -> &ScalarField {
        &self.frames[(self.oldest + temporal_index) % self.frames.len()]
    }

    /// Frame at `offset` from the temporal centre; `offset` is -1, 0 or 1.
    pub fn centre_frame(&self, offset: isize) -> &ScalarField {
        let centre = (self.frames.len() - 1) / 2;
        self.frame(centre.saturating_add_signed(offset))
    }

    pub fn expanded(&self) -> Option<&ExpandedTriple> {
        self.expanded.as_ref()
    }

    pub fn laplacians(&self) -> &[ScalarField; 3] {
        &self.laplacians
    }

    fn shift_in(&mut self, frame: ScalarField) {
        let slot = self.oldest;
        self.frames[slot] = frame;
        self.oldest = (slot + 1) % self.frames.len();
    }
}

/// A pyramid stacked along time.
#[derive(Debug, Clone)]
pub struct TemporalPyramid {
    width: usize,
    height: usize,
    levels: Vec<TemporalLevel>,
    frames_seen: u64,
}

impl TemporalPyramid {
    pub fn new(width: usize, height: usize, level_count: usize) -> Result<Self> {
        if level_count == 0 {
            return Err(FlowError::config("a temporal pyramid needs at least one level"));
        }
        if width == 0 || height == 0 {
            return Err(FlowError::config("temporal pyramid frames must not be empty"));
        }
        let levels: Vec<TemporalLevel> = (0..level_count)
            .map(|l| TemporalLevel::new(l, frames_per_level(l, level_count), width, height))
            .collect();
        for level in &levels {
            debug!(level = level.index, frames = level.frame_count(), "temporal level created");
        }
        Ok(Self {
            width,
            height,
            levels,
            frames_seen: 0,
        })
    }

    pub fn levels(&self) -> &[TemporalLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&TemporalLevel> {
        self.levels.get(index)
    }

    /// True once level 0 holds no placeholder frames.
    pub fn is_primed(&self) -> bool {
        self.frames_seen >= self.levels[0].frame_count() as u64
    }

    /// Adds the newest frame and recomputes every coarser level, expansion and band.
    pub fn shift_in(&mut self, frame: ScalarField) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(FlowError::DimensionMismatch {
                context: "temporal pyramid",
                expected: (self.width, self.height),
                actual: frame.dimensions(),
            });
        }
        self.levels[0].shift_in(frame);
        self.frames_seen += 1;

        for l in 1..self.levels.len() {
            let (lower, upper) = self.levels.split_at_mut(l);
            let source = &lower[l - 1];
            let target = &mut upper[0];

            for d in 0..target.frames.len() {
                let blended = compress5(std::array::from_fn(|k| source.frame(2 * d + k)))?;
                let slot = (target.oldest + d) % target.frames.len();
                target.frames[slot] = blended;
            }
            target.expanded = Some(expand3([
                target.centre_frame(-1),
                target.centre_frame(0),
                target.centre_frame(1),
            ])?);
        }

        let top = self.levels.len() - 1;
        let top_level = &mut self.levels[top];
        top_level.laplacians = [
            top_level.centre_frame(-1).clone(),
            top_level.centre_frame(0).clone(),
            top_level.centre_frame(1).clone(),
        ];

        for l in (0..top).rev() {
            let (lower, upper) = self.levels.split_at_mut(l + 1);
            let target = &mut lower[l];
            let Some(expanded) = upper[0].expanded.as_ref() else {
                return Err(FlowError::config("coarser temporal level was never expanded"));
            };
            let parts = expanded.as_array();
            target.laplacians = [
                laplacian(target.centre_frame(-1), parts[0])?,
                laplacian(target.centre_frame(0), parts[1])?,
                laplacian(target.centre_frame(1), parts[2])?,
            ];
        }
        Ok(())
    }

    /// Rebuilds the level-0 centre frame from the bands.
    pub fn collapse(&self) -> Result<ScalarField> {
        let mut levels = self.levels.iter().rev();
        let top = levels
            .next()
            .ok_or_else(|| FlowError::config("cannot collapse an empty temporal pyramid"))?;
        let mut current = top.laplacians.clone();
        for level in levels {
            let expanded = expand3([&current[0], &current[1], &current[2]])?;
            let parts = expanded.as_array();
            current = [
                collapse(&level.laplacians[0], parts[0])?,
                collapse(&level.laplacians[1], parts[1])?,
                collapse(&level.laplacians[2], parts[2])?,
            ];
        }
        let [_, centre, _] = current;
        Ok(centre)
    }
}
