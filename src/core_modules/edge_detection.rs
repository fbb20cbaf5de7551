// THEORY:
// The `EdgeDetector` is a small stateful wrapper around the convolution engine that
// owns a kernel, a convolution mode and an amplification factor. It is the only
// place the pipeline configures convolution for whole frames, and it offers the
// three views downstream stages ask for: raw edge vectors, their magnitudes (the
// "edges" input source of the motion pipeline), and polar vectors for display.

use crate::core_modules::buffer2d::{PolarField, ScalarField, VectorField};
use crate::core_modules::convolution::{ConvolutionMode, convolve};
use crate::core_modules::kernel::Kernel;
use crate::error::{FlowError, Result};

/// Vector edge detection over an intensity field.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    kernel: Kernel,
    mode: ConvolutionMode,
    /// The `scale` handed to the convolution engine.
    amplification: f32,
}

impl EdgeDetector {
    /// Fails with `InvalidKernel` if the kernel cannot be normalised in `mode`, or
    /// if `mode` is `Separable` and the kernel does not factor by axis.
    pub fn new(kernel: Kernel, mode: ConvolutionMode) -> Result<Self> {
        Self::check_mode(&kernel, mode)?;
        Ok(Self {
            kernel,
            mode,
            amplification: 1.0,
        })
    }

    /// Detector over a `Kernel::weighted_angular(size)` kernel.
    pub fn angular(size: usize, mode: ConvolutionMode) -> Result<Self> {
        Self::new(Kernel::weighted_angular(size)?, mode)
    }

    pub fn with_amplification(mut self, amplification: f32) -> Self {
        self.amplification = amplification;
        self
    }

    pub fn set_amplification(&mut self, amplification: f32) {
        self.amplification = amplification;
    }

    pub fn set_mode(&mut self, mode: ConvolutionMode) -> Result<()> {
        Self::check_mode(&self.kernel, mode)?;
        self.mode = mode;
        Ok(())
    }

    fn check_mode(kernel: &Kernel, mode: ConvolutionMode) -> Result<()> {
        kernel.normalizer(mode)?;
        if mode == ConvolutionMode::Separable && !kernel.is_axis_separable() {
            // Chaining the passes of a non-factoring kernel cancels its edges.
            return Err(FlowError::kernel(
                "kernel does not factor by axis; use Full or Cross convolution",
            ));
        }
        Ok(())
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn mode(&self) -> ConvolutionMode {
        self.mode
    }

    pub fn amplification(&self) -> f32 {
        self.amplification
    }

    /// Cartesian edge vectors.
    pub fn edge_vectors(&self, intensity: &ScalarField) -> Result<VectorField> {
        convolve(intensity, &self.kernel, self.mode, self.amplification)
    }

    /// Edge strength, `|v|` per pixel.
    pub fn edge_magnitudes(&self, intensity: &ScalarField) -> Result<ScalarField> {
        Ok(self.edge_vectors(intensity)?.par_map(|v| v.length()))
    }

    /// Edge vectors as (angle, magnitude).
    pub fn edge_polar(&self, intensity: &ScalarField) -> Result<PolarField> {
        Ok(self.edge_vectors(intensity)?.par_map(|v| v.to_polar()))
    }
}
