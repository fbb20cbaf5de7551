// THEORY:
// `Buffer2D<T>` is the foundation every other component stands on: a fixed-size,
// row-major grid of `T` whose width and height never change after construction.
// Intensity images, pyramid levels, gradient fields, block aggregates and motion
// fields are all `Buffer2D`s with different element types.
//
// Key architectural principles:
// 1.  **Loud Bounds**: `get`/`set` return `FlowError::OutOfBounds` and indexing
//     with `field[(x, y)]` panics with the offending coordinate. Nothing clamps
//     silently; border policies belong to the stages that define them.
// 2.  **Pure Passes**: stages never mutate their inputs. They build a new buffer
//     with `par_from_fn`, where each output coordinate is computed by a pure
//     closure. Rows are handed out to rayon workers, so no element is ever written
//     by more than one worker, and the call returns only once every row is done.
// 3.  **Value Semantics**: buffers own their data and are moved between stages.

use crate::core_modules::vector2d::{Polar, Vec2};
use crate::error::{FlowError, Result};
use rayon::prelude::*;
use std::ops::{Index, IndexMut};

/// A fixed-size 2D array with bounds-checked access.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2D<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// Single-channel data: intensity, pyramid levels, edge magnitudes.
pub type ScalarField = Buffer2D<f32>;
/// Cartesian vector data: gradients, edge vectors.
pub type VectorField = Buffer2D<Vec2>;
/// Polar vector data, the display form of a `VectorField`.
pub type PolarField = Buffer2D<Polar>;

impl<T: Copy + Default> Buffer2D<T> {
    /// A buffer with every element set to `T::default()`.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, T::default())
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wraps row-major data. The length must be exactly `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(FlowError::DimensionMismatch {
                context: "Buffer2D::from_vec",
                expected: (width, height),
                actual: (data.len(), 1),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Sequential constructor, for small grids and tests.
    pub fn from_fn<F: FnMut(usize, usize) -> T>(width: usize, height: usize, mut f: F) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Bounds-checked read.
    pub fn get(&self, x: usize, y: usize) -> Result<T> {
        if self.contains(x, y) {
            Ok(self.data[y * self.width + x])
        } else {
            Err(self.out_of_bounds(x, y))
        }
    }

    /// Bounds-checked write.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> Result<()> {
        if self.contains(x, y) {
            self.data[y * self.width + x] = value;
            Ok(())
        } else {
            Err(self.out_of_bounds(x, y))
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Iterates rows from top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        // chunks(0) panics, and an empty buffer has no rows anyway.
        self.data.chunks(self.width.max(1)).take(self.height)
    }

    /// Iterates `(x, y, value)` in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let width = self.width.max(1);
        self.data
            .iter()
            .enumerate()
            .map(move |(i, v)| (i % width, i / width, *v))
    }

    pub fn same_shape<U>(&self, other: &Buffer2D<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Fails with `DimensionMismatch` unless `other` shares this buffer's grid.
    pub fn ensure_same_shape<U>(&self, other: &Buffer2D<U>, context: &'static str) -> Result<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(FlowError::DimensionMismatch {
                context,
                expected: self.dimensions(),
                actual: (other.width, other.height),
            })
        }
    }

    fn out_of_bounds(&self, x: usize, y: usize) -> FlowError {
        FlowError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Copy + Default + Send + Sync> Buffer2D<T> {
    /// Builds a buffer in parallel, one rayon task per row.
    ///
    /// `f(x, y)` must be a pure function of its coordinates and captured
    /// immutable inputs.
    pub fn par_from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> T + Send + Sync,
    {
        let mut data = vec![T::default(); width * height];
        if width > 0 {
            data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    *cell = f(x, y);
                }
            });
        }
        Self { width, height, data }
    }

    /// Elementwise transform into a new buffer of the same shape.
    pub fn par_map<U, F>(&self, f: F) -> Buffer2D<U>
    where
        U: Copy + Default + Send + Sync,
        F: Fn(T) -> U + Send + Sync,
    {
        Buffer2D {
            width: self.width,
            height: self.height,
            data: self.data.par_iter().map(|v| f(*v)).collect(),
        }
    }

    /// Elementwise combination of two same-shape buffers.
    pub fn par_zip_map<U, V, F>(&self, other: &Buffer2D<U>, context: &'static str, f: F) -> Result<Buffer2D<V>>
    where
        U: Copy + Default + Send + Sync,
        V: Copy + Default + Send + Sync,
        F: Fn(T, U) -> V + Send + Sync,
    {
        self.ensure_same_shape(other, context)?;
        Ok(Buffer2D {
            width: self.width,
            height: self.height,
            data: self
                .data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }
}

impl ScalarField {
    /// Sum of every sample.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }
}

impl<T> Index<(usize, usize)> for Buffer2D<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        assert!(
            x < self.width && y < self.height,
            "sample ({x}, {y}) is outside the {}x{} field",
            self.width,
            self.height
        );
        &self.data[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2D<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        assert!(
            x < self.width && y < self.height,
            "sample ({x}, {y}) is outside the {}x{} field",
            self.width,
            self.height
        );
        &mut self.data[y * self.width + x]
    }
}
