//! Per-sample executor over a validated [`Network`].

use tracing::trace;

use crate::error::{GoldenError, Result};
use crate::layer::{conv2d, flatten, fully_connected, max_pool};
use crate::params::{LayerParams, ParamSet};
use crate::tensor::FeatureMap;
use crate::topology::{Network, Stage};

/// Value flowing between two stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activations {
    Map(FeatureMap),
    Vector(Vec<i8>),
}

impl Activations {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Activations::Map(map) => bytemuck::cast_slice(map.as_slice()),
            Activations::Vector(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Snapshot of one stage's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub name: String,
    pub value: Activations,
}

/// Result of running one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    /// Index of the first maximum among `logits`.
    pub class: usize,
    /// Output of the last stage.
    pub logits: Vec<i8>,
    /// Every stage output in execution order; empty unless requested.
    pub stages: Vec<StageOutput>,
}

/// Consumer of per-sample results, e.g. a trace writer or a hardware diff.
pub trait ResultSink {
    type Error;

    fn record(&mut self, sample: usize, label: Option<u8>, inference: &Inference)
        -> std::result::Result<(), Self::Error>;
}

/// A network bound to its parameters.
///
/// Immutable once built: every call to [`Model::infer`] starts from the
/// given input only, so one model can serve any number of samples.
#[derive(Debug, Clone)]
pub struct Model {
    network: Network,
    params: ParamSet,
}

impl Model {
    pub fn new(network: Network, params: ParamSet) -> Result<Self> {
        params.check_against(&network)?;
        Ok(Model { network, params })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Runs one sample and returns only the prediction and logits.
    pub fn infer(&self, input: FeatureMap) -> Result<Inference> {
        self.run(input, false)
    }

    /// Like [`Model::infer`] but also keeps every intermediate tensor.
    pub fn infer_traced(&self, input: FeatureMap) -> Result<Inference> {
        self.run(input, true)
    }

    fn run(&self, input: FeatureMap, capture: bool) -> Result<Inference> {
        if input.dims() != self.network.input_dims() {
            return Err(GoldenError::shape(
                "input",
                "input map",
                &self.network.input_dims(),
                &input.dims(),
            ));
        }

        let mut stages = Vec::new();
        let mut value = Activations::Map(input);

        for stage in self.network.stages() {
            value = self.step(stage, value)?;
            trace!(layer = stage.name(), "stage done");
            if capture {
                stages.push(StageOutput {
                    name: stage.name().to_string(),
                    value: value.clone(),
                });
            }
        }

        let Activations::Vector(logits) = value else {
            return Err(GoldenError::TopologyMismatch {
                layer: "output".to_string(),
                reason: "network produced a feature map".to_string(),
            });
        };
        let class = argmax(&logits).ok_or_else(|| GoldenError::TopologyMismatch {
            layer: "output".to_string(),
            reason: "network produced no class scores".to_string(),
        })?;

        Ok(Inference {
            class,
            logits,
            stages,
        })
    }

    fn step(&self, stage: &Stage, value: Activations) -> Result<Activations> {
        let name = stage.name();
        match (stage, value) {
            (Stage::Conv { shape, rescale, .. }, Activations::Map(map)) => {
                let Some(LayerParams::Conv { weight, bias }) = self.params.get(name) else {
                    return Err(missing(name));
                };
                conv2d(name, shape, &map, weight, bias, rescale).map(Activations::Map)
            }
            (Stage::Pool { shape, .. }, Activations::Map(map)) => {
                max_pool(name, shape, &map).map(Activations::Map)
            }
            (Stage::Flatten { .. }, Activations::Map(map)) => {
                Ok(Activations::Vector(flatten(map)))
            }
            (
                Stage::Fc {
                    shape,
                    rescale,
                    activation,
                    ..
                },
                Activations::Vector(v),
            ) => {
                let Some(LayerParams::Fc { weight, bias }) = self.params.get(name) else {
                    return Err(missing(name));
                };
                fully_connected(name, shape, &v, weight, bias, rescale, *activation)
                    .map(Activations::Vector)
            }
            (_, other) => Err(GoldenError::TopologyMismatch {
                layer: name.to_string(),
                reason: format!(
                    "stage cannot consume a {}",
                    match other {
                        Activations::Map(_) => "feature map",
                        Activations::Vector(_) => "vector",
                    }
                ),
            }),
        }
    }
}

fn missing(layer: &str) -> GoldenError {
    GoldenError::MissingParams {
        layer: layer.to_string(),
    }
}

/// Index of the first maximum; later equal values do not win.
pub fn argmax(values: &[i8]) -> Option<usize> {
    let (first, rest) = values.split_first()?;
    let mut best = (0, *first);
    for (i, &v) in rest.iter().enumerate() {
        if v > best.1 {
            best = (i + 1, v);
        }
    }
    Some(best.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[5, 5, 3, 0, 0, 0, 0, 0, 0, 0]), Some(0));
        assert_eq!(argmax(&[-3, -1, -1, -7]), Some(1));
        assert_eq!(argmax(&[-128, -128]), Some(0));
        assert_eq!(argmax(&[0, 1, 2, 127]), Some(3));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn activation_bytes_reinterpret_twos_complement() {
        let v = Activations::Vector(vec![-1, 0, 127, -128]);
        assert_eq!(v.as_bytes(), &[0xff, 0x00, 0x7f, 0x80]);
    }
}
