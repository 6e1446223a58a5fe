use std::{ops::RangeInclusive, rc::Rc};

use tracing::debug;

use crate::{
    blob::Blob,
    error::{LayerError, Result},
    utils::Shared,
};

/// Number of bottom and top blobs a layer accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobCounts {
    pub bottom: RangeInclusive<usize>,
    pub top: RangeInclusive<usize>,
}

impl BlobCounts {
    /// Exactly `bottom` inputs and `top` outputs.
    pub fn exact(bottom: usize, top: usize) -> Self {
        Self {
            bottom: bottom..=bottom,
            top: top..=top,
        }
    }

    /// Allows between `min` and `max` outputs.
    pub fn with_top(self, min: usize, max: usize) -> Self {
        Self {
            top: min..=max,
            ..self
        }
    }

    /// Checks the given counts, failing before any computation takes place.
    pub fn check(&self, layer: &'static str, bottom: usize, top: usize) -> Result<()> {
        if !self.bottom.contains(&bottom) {
            return Err(LayerError::BlobCount {
                layer,
                side: "bottom",
                expected: self.bottom.clone(),
                got: bottom,
            });
        }

        if !self.top.contains(&top) {
            return Err(LayerError::BlobCount {
                layer,
                side: "top",
                expected: self.top.clone(),
                got: top,
            });
        }

        Ok(())
    }
}

/// Fails when a top is the very same blob as a bottom, unless the layer computes in place and
/// the two sit at the same position.
fn check_aliasing(
    layer: &'static str,
    in_place: bool,
    bottom: &[Shared<Blob>],
    top: &[Shared<Blob>],
) -> Result<()> {
    for (top_idx, top_blob) in top.iter().enumerate() {
        for (bottom_idx, bottom_blob) in bottom.iter().enumerate() {
            if Rc::ptr_eq(top_blob, bottom_blob) && !(in_place && top_idx == bottom_idx) {
                return Err(LayerError::invalid_input(
                    layer,
                    format!("top {} is the same blob as bottom {}", top_idx, bottom_idx),
                ));
            }
        }
    }

    Ok(())
}

/// Lifecycle shared by all layers.
///
/// A host drives a layer through [`setup`](Layer::setup) once, then through any number of
/// [`forward`](Layer::forward) and [`backward`](Layer::backward) calls. Inputs are called
/// *bottom* blobs and outputs *top* blobs. Layers size their tops and their private scratch
/// buffers in [`reshape`](Layer::reshape), which runs again before every forward pass so that
/// a change in the input shape is always picked up.
///
/// Backward passes overwrite the gradient of every bottom whose `propagate_down` flag is set
/// and leave the others alone.
pub trait Layer {
    /// Name of the layer type.
    fn kind(&self) -> &'static str;

    /// Declared number of bottom and top blobs.
    fn blob_counts(&self) -> BlobCounts;

    /// Weight of top `top_index` in the objective, zero for non-loss outputs.
    fn loss_weight(&self, _top_index: usize) -> f32 {
        0.
    }

    /// Whether a host may force back-propagation into bottom `bottom_index`.
    fn allow_force_backward(&self, _bottom_index: usize) -> bool {
        true
    }

    /// Whether the layer accepts the same blob as its bottom and its top.
    fn allow_in_place(&self) -> bool {
        false
    }

    /// One-time initialization, run by `setup` before the first reshape.
    fn layer_setup(&mut self, _bottom: &[Shared<Blob>], _top: &[Shared<Blob>]) -> Result<()> {
        Ok(())
    }

    /// Checks the bottom shapes and sizes tops and scratch buffers accordingly.
    fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()>;

    /// Fills the tops from the bottoms.
    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()>;

    /// Fills the gradients of the bottoms selected by `propagate_down` from the gradients of
    /// the tops.
    fn compute_input_gradient(
        &mut self,
        top: &[Shared<Blob>],
        propagate_down: &[bool],
        bottom: &[Shared<Blob>],
    ) -> Result<()>;

    /// Validates the blob counts, initializes the layer and shapes its outputs.
    ///
    /// The gradient of every loss top is set to its loss weight, so that `backward` can be
    /// called right after `forward`.
    fn setup(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        self.blob_counts()
            .check(self.kind(), bottom.len(), top.len())?;
        check_aliasing(self.kind(), self.allow_in_place(), bottom, top)?;
        self.layer_setup(bottom, top)?;
        self.reshape(bottom, top)?;

        for (idx, blob) in top.iter().enumerate() {
            let weight = self.loss_weight(idx);
            if weight != 0. {
                blob.borrow_mut().diff_mut().fill(weight);
            }
        }

        debug!(
            layer = self.kind(),
            bottom = ?bottom.iter().map(|blob| blob.borrow().shape().to_vec()).collect::<Vec<_>>(),
            "layer set up"
        );

        Ok(())
    }

    /// Runs the forward pass and returns the weighted sum of the loss tops.
    fn forward(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<f32> {
        check_aliasing(self.kind(), self.allow_in_place(), bottom, top)?;
        self.reshape(bottom, top)?;
        self.compute_output(bottom, top)?;

        Ok(top
            .iter()
            .enumerate()
            .map(|(idx, blob)| self.loss_weight(idx) * blob.borrow().data().sum())
            .sum())
    }

    /// Runs the backward pass.
    fn backward(
        &mut self,
        top: &[Shared<Blob>],
        propagate_down: &[bool],
        bottom: &[Shared<Blob>],
    ) -> Result<()> {
        if propagate_down.len() != bottom.len() {
            return Err(LayerError::PropagateDownMask {
                layer: self.kind(),
                expected: bottom.len(),
                got: propagate_down.len(),
            });
        }

        check_aliasing(self.kind(), self.allow_in_place(), bottom, top)?;
        self.compute_input_gradient(top, propagate_down, bottom)
    }
}
