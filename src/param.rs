//! Layer configuration.
//!
//! Every layer is configured by a small parameter struct. [`LayerParameter`] bundles one of
//! them, tagged by layer type, with the settings shared by all layers, and is what
//! [`layers::create`](crate::layers::create) consumes.
//!
//! With the `serialize` feature enabled all of these types can be read from and written to any
//! serde format; missing fields take their default values.

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::device::Device;

/// Configuration of a [`MultiLabelLoss`](crate::MultiLabelLoss) layer.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct MultiLabelLossParameter {
    /// Target value marking entries that take no part in the loss.
    pub ignore_label: Option<i32>,
}

/// Configuration of a [`Normalize`](crate::Normalize) layer.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct NormalizeParameter {
    /// Norms at or below this value are treated as zero.
    pub eps: f32,
}

impl Default for NormalizeParameter {
    fn default() -> Self {
        Self { eps: 1e-10 }
    }
}

/// Configuration of an [`OnlineTripletLoss`](crate::OnlineTripletLoss) layer.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct OnlineTripletLossParameter {
    /// Required gap between negative and positive squared distances.
    pub margin: f32,
    /// Mixing weight: `mu * rank_loss + (1 - mu) * pair_loss`.
    pub mu: f32,
}

impl Default for OnlineTripletLossParameter {
    fn default() -> Self {
        Self {
            margin: 1.,
            mu: 0.5,
        }
    }
}

/// Configuration of a [`TripletExpLoss`](crate::TripletExpLoss) layer.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct TripletExpLossParameter {
    pub margin: f32,
}

impl Default for TripletExpLossParameter {
    fn default() -> Self {
        Self { margin: 1. }
    }
}

/// Layer type together with its specific configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "type"))]
pub enum LayerKind {
    MultiLabelLoss(MultiLabelLossParameter),
    Normalize(NormalizeParameter),
    OnlineTripletLoss(OnlineTripletLossParameter),
    Sigmoid,
    TripletExpLoss(TripletExpLossParameter),
}

impl LayerKind {
    /// Name of the layer type.
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::MultiLabelLoss(_) => "MultiLabelLoss",
            LayerKind::Normalize(_) => "Normalize",
            LayerKind::OnlineTripletLoss(_) => "OnlineTripletLoss",
            LayerKind::Sigmoid => "Sigmoid",
            LayerKind::TripletExpLoss(_) => "TripletExpLoss",
        }
    }
}

/// Full description of a layer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct LayerParameter {
    #[cfg_attr(feature = "serialize", serde(default))]
    pub name: String,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub device: Device,
    /// Overrides the weight of the first top in the objective.
    #[cfg_attr(feature = "serialize", serde(default))]
    pub loss_weight: Option<f32>,
    pub kind: LayerKind,
}

impl LayerParameter {
    /// Describes an unnamed layer of the given kind, running on the [`Device::Cpu`].
    pub fn new(kind: LayerKind) -> Self {
        Self {
            name: String::new(),
            device: Device::default(),
            loss_weight: None,
            kind,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn with_device(self, device: Device) -> Self {
        Self { device, ..self }
    }

    pub fn with_loss_weight(self, loss_weight: f32) -> Self {
        Self {
            loss_weight: Some(loss_weight),
            ..self
        }
    }
}
