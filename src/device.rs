use ndarray::{ArrayViewMut1, ArrayViewMut2, Axis};

use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Where the per-sample work of a layer runs.
///
/// Both devices compute the same values; they may differ only in the order floating-point
/// sums are accumulated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Device {
    /// The calling thread.
    #[default]
    Cpu,
    /// rayon's global thread pool, one task per sample.
    Parallel,
}

/// Per-sample execution strategy.
pub(crate) trait Executor {
    /// Calls `f` on every row of `rows`, together with its index.
    fn for_each_row<F>(&self, rows: ArrayViewMut2<f32>, f: F)
    where
        F: Fn(usize, ArrayViewMut1<f32>) + Send + Sync;

    /// Collects `f(0), .., f(n - 1)`.
    fn map_rows<F>(&self, n: usize, f: F) -> Vec<f32>
    where
        F: Fn(usize) -> f32 + Send + Sync;
}

pub(crate) struct Serial;

pub(crate) struct Threaded;

impl Executor for Serial {
    fn for_each_row<F>(&self, mut rows: ArrayViewMut2<f32>, f: F)
    where
        F: Fn(usize, ArrayViewMut1<f32>) + Send + Sync,
    {
        rows.outer_iter_mut()
            .enumerate()
            .for_each(|(idx, row)| f(idx, row));
    }

    fn map_rows<F>(&self, n: usize, f: F) -> Vec<f32>
    where
        F: Fn(usize) -> f32 + Send + Sync,
    {
        (0..n).map(f).collect()
    }
}

impl Executor for Threaded {
    fn for_each_row<F>(&self, mut rows: ArrayViewMut2<f32>, f: F)
    where
        F: Fn(usize, ArrayViewMut1<f32>) + Send + Sync,
    {
        rows.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(idx, row)| f(idx, row));
    }

    fn map_rows<F>(&self, n: usize, f: F) -> Vec<f32>
    where
        F: Fn(usize) -> f32 + Send + Sync,
    {
        (0..n).into_par_iter().map(f).collect()
    }
}

impl Device {
    pub(crate) fn for_each_row<F>(self, rows: ArrayViewMut2<f32>, f: F)
    where
        F: Fn(usize, ArrayViewMut1<f32>) + Send + Sync,
    {
        match self {
            Device::Cpu => Serial.for_each_row(rows, f),
            Device::Parallel => Threaded.for_each_row(rows, f),
        }
    }

    pub(crate) fn map_rows<F>(self, n: usize, f: F) -> Vec<f32>
    where
        F: Fn(usize) -> f32 + Send + Sync,
    {
        match self {
            Device::Cpu => Serial.map_rows(n, f),
            Device::Parallel => Threaded.map_rows(n, f),
        }
    }
}
