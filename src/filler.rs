use ndarray::{ArrayD, IxDyn};

use ndarray_rand::{
    rand_distr::{Normal, Uniform},
    RandomExt,
};

use rand::{thread_rng, Rng};

use crate::{
    blob::Blob,
    error::{LayerError, Result},
};

/// Initializes the data of a blob.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Filler {
    Constant(f32),
    /// Values sampled uniformly from `[min, max)`.
    Uniform { min: f32, max: f32 },
    Gaussian { mean: f32, std: f32 },
}

impl Filler {
    /// Fills `blob` using the thread-local random number generator.
    pub fn fill(&self, blob: &mut Blob) -> Result<()> {
        self.fill_using(blob, &mut thread_rng())
    }

    /// Fills `blob` drawing from `rng`, seeded generators give reproducible blobs.
    pub fn fill_using<R>(&self, blob: &mut Blob, rng: &mut R) -> Result<()>
    where
        R: Rng + ?Sized,
    {
        let shape = IxDyn(blob.shape());

        *blob.data_mut() = match *self {
            Filler::Constant(value) => ArrayD::from_elem(shape, value),
            Filler::Uniform { min, max } => {
                if !(min < max && (max - min).is_finite()) {
                    return Err(LayerError::InvalidFiller(format!(
                        "uniform range [{}, {}) must be finite and non-empty",
                        min, max
                    )));
                }
                ArrayD::random_using(shape, Uniform::new(min, max), rng)
            }
            Filler::Gaussian { mean, std } => {
                let distr = Normal::new(mean, std)
                    .map_err(|err| LayerError::InvalidFiller(err.to_string()))?;
                ArrayD::random_using(shape, distr, rng)
            }
        };

        Ok(())
    }
}
