//! The `neuronika-layers` crate provides loss and normalization layers for metric learning and
//! multi-label classification.
//!
//! # Layers
//!
//! Every layer implements the [`Layer`] trait and follows the same lifecycle: it is set up once
//! against its input (*bottom*) and output (*top*) blobs, then it alternates forward passes,
//! which fill the tops, with backward passes, which fill the gradients of the bottoms.
//!
//! * [`MultiLabelLoss`] - sigmoid cross-entropy over independent binary labels, with optional
//! ignored entries.
//! * [`Normalize`] - scales each sample to unit L2 norm.
//! * [`TripletExpLoss`] - exponential hinge over externally provided triplets.
//! * [`OnlineTripletLoss`] - triplets mined within each batch from the sample labels, mixed with
//! a pairwise attraction term.
//! * [`Sigmoid`] - element-wise logistic activation.
//!
//! # Blobs
//!
//! A [`Blob`] holds two equally shaped arrays: the data and its gradient. Blobs are passed to
//! layers as [`Shared`] handles, so that the output of a layer can be fed to the next one without
//! copies.
//!
//! ```
//! use ndarray::arr2;
//! use neuronika_layers::{
//!     new_shared, Blob, Layer, TripletExpLoss, TripletExpLossParameter,
//! };
//!
//! let bottom = [
//!     new_shared(Blob::from_ndarray(arr2(&[[0., 0.]]))),
//!     new_shared(Blob::from_ndarray(arr2(&[[1., 0.]]))),
//!     new_shared(Blob::from_ndarray(arr2(&[[0., 1.]]))),
//! ];
//! let top = [new_shared(Blob::default())];
//!
//! let mut loss = TripletExpLoss::new(TripletExpLossParameter { margin: 1. }).unwrap();
//! loss.setup(&bottom, &top).unwrap();
//!
//! // 1 + 1 - 1 = 1, hence exp(1 / 2) - 1.
//! let value = loss.forward(&bottom, &top).unwrap();
//! assert!((value - (0.5f32.exp() - 1.)).abs() < 1e-6);
//!
//! loss.backward(&top, &[true, true, true], &bottom).unwrap();
//! ```
//!
//! # Configuration
//!
//! Layers can be built directly or from a [`LayerParameter`] through [`layers::create`]. With
//! the `serialize` feature enabled parameters implement serde's traits.
//!
//! # Devices
//!
//! Per-sample work runs serially on [`Device::Cpu`], or is spread across a thread pool on
//! [`Device::Parallel`]. Both give the same results.

mod blob;
mod device;
mod error;
mod filler;
mod layer;
mod utils;

pub mod check;
pub mod layers;
pub mod param;

pub use blob::Blob;
pub use device::Device;
pub use error::{LayerError, Result};
pub use filler::Filler;
pub use layer::{BlobCounts, Layer};
pub use layers::{MultiLabelLoss, Normalize, OnlineTripletLoss, Sigmoid, Triplet, TripletExpLoss};
pub use param::{
    LayerKind, LayerParameter, MultiLabelLossParameter, NormalizeParameter,
    OnlineTripletLossParameter, TripletExpLossParameter,
};
pub use utils::{new_shared, Shared};
