pub mod block_aggregator;
pub mod buffer2d;
pub mod convolution;
pub mod edge_detection;
pub mod frame_analyzer;
pub mod fused_pyramid;
pub mod intensity;
pub mod kernel;
pub mod motion;
pub mod pyramid;
pub mod temporal_pyramid;
pub mod utils;
pub mod vector2d;
