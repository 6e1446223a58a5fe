//! The layers provided by this crate.
//!
//! * [`MultiLabelLoss`] - sigmoid cross-entropy over independent labels.
//! * [`Normalize`] - per-sample L2 normalization.
//! * [`OnlineTripletLoss`] - ranking loss over triplets mined within the batch.
//! * [`TripletExpLoss`] - exponential ranking loss over given triplets.
//! * [`Sigmoid`] - element-wise logistic activation.

mod multilabel_loss;
mod normalize;
mod online_triplet_loss;
mod sigmoid;
mod triplet_exp_loss;

pub use multilabel_loss::MultiLabelLoss;
pub use normalize::Normalize;
pub use online_triplet_loss::{OnlineTripletLoss, Triplet};
pub use sigmoid::Sigmoid;
pub use triplet_exp_loss::TripletExpLoss;

use tracing::debug;

use crate::{
    error::Result,
    layer::Layer,
    param::{LayerKind, LayerParameter},
};

/// Builds the layer described by `param`.
///
/// # Errors
///
/// If the layer-specific parameters are out of range.
///
/// # Examples
///
/// ```
/// use neuronika_layers::{layers, LayerKind, LayerParameter, TripletExpLossParameter};
///
/// let param = LayerParameter::new(LayerKind::TripletExpLoss(TripletExpLossParameter {
///     margin: 0.5,
/// }));
/// let layer = layers::create(&param).unwrap();
///
/// assert_eq!(layer.kind(), "TripletExpLoss");
/// assert_eq!(layer.loss_weight(0), 1.);
/// ```
pub fn create(param: &LayerParameter) -> Result<Box<dyn Layer>> {
    let device = param.device;

    let layer: Box<dyn Layer> = match param.kind {
        LayerKind::MultiLabelLoss(kind) => {
            let layer = MultiLabelLoss::new(kind)?.with_device(device);
            match param.loss_weight {
                Some(weight) => Box::new(layer.with_loss_weight(weight)),
                None => Box::new(layer),
            }
        }
        LayerKind::Normalize(kind) => Box::new(Normalize::new(kind)?.with_device(device)),
        LayerKind::OnlineTripletLoss(kind) => {
            let layer = OnlineTripletLoss::new(kind)?.with_device(device);
            match param.loss_weight {
                Some(weight) => Box::new(layer.with_loss_weight(weight)),
                None => Box::new(layer),
            }
        }
        LayerKind::Sigmoid => Box::new(Sigmoid::new().with_device(device)),
        LayerKind::TripletExpLoss(kind) => {
            let layer = TripletExpLoss::new(kind)?.with_device(device);
            match param.loss_weight {
                Some(weight) => Box::new(layer.with_loss_weight(weight)),
                None => Box::new(layer),
            }
        }
    };

    debug!(name = %param.name, layer = layer.kind(), ?device, "created layer");
    Ok(layer)
}
