use ndarray::{Array, ArrayD, ArrayView2, ArrayViewMut2, Dimension, IxDyn};

use crate::error::Result;

/// A pair of equally shaped arrays flowing through layers: the values computed by the forward
/// pass and the gradients computed by the backward pass.
///
/// The first axis is the batch axis. Layers that work sample by sample view a blob as a
/// `(num, count / num)` matrix.
#[derive(Clone, Debug)]
pub struct Blob {
    data: ArrayD<f32>,
    diff: ArrayD<f32>,
}

impl Blob {
    /// Creates a zero-filled blob.
    ///
    /// # Arguments
    ///
    /// `shape` - shape of the blob, an empty slice gives a scalar.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
            diff: ArrayD::zeros(IxDyn(shape)),
        }
    }

    /// Creates a blob that takes ownership of `array` as its data. The gradient is zeroed.
    pub fn from_ndarray<D>(array: Array<f32, D>) -> Self
    where
        D: Dimension,
    {
        let data = array.into_dyn();
        let diff = ArrayD::zeros(data.raw_dim());

        Self { data, diff }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes.
    pub fn num_axes(&self) -> usize {
        self.data.ndim()
    }

    /// Size of the batch axis. A scalar counts as a batch of one.
    pub fn num(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    /// Total number of elements.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Number of elements spanned by the axes starting at `axis`.
    pub fn count_from(&self, axis: usize) -> usize {
        self.shape().iter().skip(axis).product()
    }

    /// Changes the shape of the blob.
    ///
    /// Storage is reallocated and zeroed only when the shape actually changes, calling this
    /// again with the same shape leaves both data and gradient untouched.
    pub fn reshape(&mut self, shape: &[usize]) {
        if self.shape() == shape {
            return;
        }

        self.data = ArrayD::zeros(IxDyn(shape));
        self.diff = ArrayD::zeros(IxDyn(shape));
    }

    /// Gives this blob the shape of `other`.
    pub fn reshape_like(&mut self, other: &Blob) {
        let shape = other.shape().to_vec();
        self.reshape(&shape);
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    pub fn diff(&self) -> &ArrayD<f32> {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.diff
    }

    /// Returns the first element of the data, the value of a scalar blob.
    pub fn scalar(&self) -> f32 {
        self.data.iter().next().copied().unwrap_or(0.)
    }

    /// Returns the first element of the gradient.
    pub fn scalar_diff(&self) -> f32 {
        self.diff.iter().next().copied().unwrap_or(0.)
    }

    /// Shape of the `(num, count / num)` matrix view.
    fn matrix_dim(&self) -> (usize, usize) {
        let num = self.num();
        let dim = if num == 0 { 0 } else { self.count() / num };

        (num, dim)
    }

    pub(crate) fn data_matrix(&self) -> Result<ArrayView2<f32>> {
        Ok(self.data.view().into_shape(self.matrix_dim())?)
    }

    pub(crate) fn data_matrix_mut(&mut self) -> Result<ArrayViewMut2<f32>> {
        let dim = self.matrix_dim();
        Ok(self.data.view_mut().into_shape(dim)?)
    }

    pub(crate) fn diff_matrix(&self) -> Result<ArrayView2<f32>> {
        Ok(self.diff.view().into_shape(self.matrix_dim())?)
    }

    pub(crate) fn diff_matrix_mut(&mut self) -> Result<ArrayViewMut2<f32>> {
        let dim = self.matrix_dim();
        Ok(self.diff.view_mut().into_shape(dim)?)
    }

    /// Borrows the data for reading and the gradient for writing at the same time.
    pub(crate) fn matrices_mut(&mut self) -> Result<(ArrayView2<f32>, ArrayViewMut2<f32>)> {
        let dim = self.matrix_dim();
        let data = self.data.view().into_shape(dim)?;
        let diff = self.diff.view_mut().into_shape(dim)?;

        Ok((data, diff))
    }
}

impl Default for Blob {
    /// An empty blob, waiting to be shaped by a layer.
    fn default() -> Self {
        Self::new(&[0])
    }
}
