//! Quantized weights and biases, loaded once per run.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::{GoldenError, Result};
use crate::tensor::{Matrix, Tensor4};
use crate::topology::{Network, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerParams {
    Conv { weight: Tensor4<i8>, bias: Vec<i16> },
    Fc { weight: Matrix<i8>, bias: Vec<i16> },
}

impl LayerParams {
    pub fn bias(&self) -> &[i16] {
        match self {
            LayerParams::Conv { bias, .. } | LayerParams::Fc { bias, .. } => bias,
        }
    }

    pub fn weight_bytes(&self) -> &[u8] {
        match self {
            LayerParams::Conv { weight, .. } => bytemuck::cast_slice(weight.as_slice()),
            LayerParams::Fc { weight, .. } => bytemuck::cast_slice(weight.as_slice()),
        }
    }
}

/// Parameters keyed by layer name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    layers: BTreeMap<String, LayerParams>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: impl Into<String>, params: LayerParams) -> Option<LayerParams> {
        self.layers.insert(layer.into(), params)
    }

    pub fn get(&self, layer: &str) -> Option<&LayerParams> {
        self.layers.get(layer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LayerParams)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// SHA-256 over every layer's name, weights and little-endian biases,
    /// in name order. Lets a trace be tied to the exact parameter files.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, params) in &self.layers {
            hasher.update(name.as_bytes());
            hasher.update(params.weight_bytes());
            for b in params.bias() {
                hasher.update(b.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Checks that each parameterised stage of `network` has parameters of
    /// the right kind and shape.
    pub fn check_against(&self, network: &Network) -> Result<()> {
        for stage in network.stages() {
            let name = stage.name();
            match stage {
                Stage::Conv { shape, .. } => {
                    let LayerParams::Conv { weight, bias } = self.require(name)? else {
                        return Err(kind_mismatch(name, "conv"));
                    };
                    if weight.dims() != shape.weight_dims() {
                        return Err(GoldenError::shape(
                            name,
                            "conv weight",
                            &shape.weight_dims(),
                            &weight.dims(),
                        ));
                    }
                    check_bias(name, shape.out_channels, bias)?;
                }
                Stage::Fc { shape, .. } => {
                    let LayerParams::Fc { weight, bias } = self.require(name)? else {
                        return Err(kind_mismatch(name, "fc"));
                    };
                    if weight.dims() != shape.weight_dims() {
                        return Err(GoldenError::shape(
                            name,
                            "fc weight",
                            &shape.weight_dims(),
                            &weight.dims(),
                        ));
                    }
                    check_bias(name, shape.out_features, bias)?;
                }
                Stage::Pool { .. } | Stage::Flatten { .. } => {}
            }
        }
        Ok(())
    }

    fn require(&self, layer: &str) -> Result<&LayerParams> {
        self.layers.get(layer).ok_or_else(|| GoldenError::MissingParams {
            layer: layer.to_string(),
        })
    }
}

fn check_bias(layer: &str, expected: usize, bias: &[i16]) -> Result<()> {
    if bias.len() != expected {
        return Err(GoldenError::shape(layer, "bias", &[expected], &[bias.len()]));
    }
    Ok(())
}

fn kind_mismatch(layer: &str, kind: &str) -> GoldenError {
    GoldenError::TopologyMismatch {
        layer: layer.to_string(),
        reason: format!("expected {kind} parameters"),
    }
}
