// THEORY:
// This file is the main entry point for the `pyramid_flow` library crate.
// It exposes the `MotionPipeline` (sequential) and the `ParallelPipeline`
// (worker pool, ordered commit) together with their configuration and report
// types as the high-level interface of the engine.
//
// The building blocks live in `core_modules` and stay public: the 2D buffers,
// vector-kernel convolution, the spatial and temporal pyramids, block
// aggregation and the motion estimators are all usable on their own, in the
// same order the pipelines chain them.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use error::{FlowError, Result};
