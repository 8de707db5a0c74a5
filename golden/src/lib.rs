//! Fixed-point LeNet-5 reference model.
//!
//! Integer-only inference over 8-bit activations and weights and 16-bit
//! biases. Every layer requantizes with the same shift-based rescale the
//! accelerator uses, so outputs can be diffed against hardware bit for bit.

pub mod error;
pub mod layer;
pub mod params;
pub mod pipeline;
pub mod quant;
pub mod tensor;
pub mod topology;

pub use error::{GoldenError, Result};
pub use params::{LayerParams, ParamSet};
pub use pipeline::{argmax, Activations, Inference, Model, ResultSink, StageOutput};
pub use quant::{Activation, QuantScales, RescaleParams};
pub use tensor::{FeatureMap, Matrix, Tensor3, Tensor4};
pub use topology::{LayerSpec, Network, Stage, Topology};
