//! Declarative layer graph and its validation into an executable [`Network`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GoldenError, Result};
use crate::layer::{ConvShape, FcShape, PoolShape};
use crate::quant::{Activation, QuantScales, RescaleParams};

/// One layer record of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerSpec {
    Conv {
        name: String,
        shape: ConvShape,
        scales: QuantScales,
    },
    Pool {
        name: String,
        shape: PoolShape,
    },
    Flatten {
        name: String,
    },
    Fc {
        name: String,
        shape: FcShape,
        scales: QuantScales,
        activation: Activation,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::Conv { name, .. }
            | LayerSpec::Pool { name, .. }
            | LayerSpec::Flatten { name }
            | LayerSpec::Fc { name, .. } => name,
        }
    }
}

/// Input geometry plus the ordered layer records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// `[channels, rows, cols]` of the already padded input map.
    pub input: [usize; 3],
    pub layers: Vec<LayerSpec>,
}

impl Topology {
    /// LeNet-5 on a 32x32 zero-padded MNIST digit, with the calibration
    /// scales the accelerator was built against.
    pub fn lenet5() -> Self {
        let conv = |name: &str, shape: ConvShape, scales: QuantScales| LayerSpec::Conv {
            name: name.to_string(),
            shape,
            scales,
        };
        let pool = |name: &str, channels: usize, out: usize| LayerSpec::Pool {
            name: name.to_string(),
            shape: PoolShape {
                channels,
                out_height: out,
                out_width: out,
                kernel_height: 2,
                kernel_width: 2,
            },
        };
        let fc = |name: &str, out: usize, inp: usize, scales: QuantScales, act: Activation| {
            LayerSpec::Fc {
                name: name.to_string(),
                shape: FcShape {
                    out_features: out,
                    in_features: inp,
                },
                scales,
                activation: act,
            }
        };

        Topology {
            input: [1, 32, 32],
            layers: vec![
                conv(
                    "conv1",
                    ConvShape {
                        out_channels: 6,
                        out_height: 28,
                        out_width: 28,
                        in_channels: 1,
                        in_height: 32,
                        in_width: 32,
                        kernel_height: 5,
                        kernel_width: 5,
                    },
                    QuantScales::new(32, 256, 8192, 16),
                ),
                pool("pool1", 6, 14),
                conv(
                    "conv2",
                    ConvShape {
                        out_channels: 16,
                        out_height: 10,
                        out_width: 10,
                        in_channels: 6,
                        in_height: 14,
                        in_width: 14,
                        kernel_height: 5,
                        kernel_width: 5,
                    },
                    QuantScales::new(16, 128, 2048, 4),
                ),
                pool("pool2", 16, 5),
                LayerSpec::Flatten {
                    name: "flatten".to_string(),
                },
                fc("fc1", 120, 400, QuantScales::new(4, 128, 512, 2), Activation::Relu),
                fc("fc2", 84, 120, QuantScales::new(2, 256, 512, 2), Activation::Relu),
                fc("fc3", 10, 84, QuantScales::new(2, 256, 512, 2), Activation::Identity),
            ],
        }
    }

    /// Validates scales, accumulator bounds and the shape chain, and derives
    /// the per-layer rescale parameters.
    pub fn validate(&self) -> Result<Network> {
        let mut seen = HashSet::new();
        let mut flowing = Flow::Map(self.input);
        let mut stages = Vec::with_capacity(self.layers.len());

        for spec in &self.layers {
            let name = spec.name();
            if !seen.insert(name) {
                return Err(mismatch(name, "duplicate layer name"));
            }

            let stage = match spec {
                LayerSpec::Conv {
                    shape, scales, ..
                } => {
                    shape.validate(name)?;
                    flowing.expect_map(name, "conv input", shape.input_dims())?;
                    let rescale = scales.derive(name)?;
                    rescale.check_accumulator(name, shape.terms())?;
                    flowing = Flow::Map(shape.output_dims());
                    Stage::Conv {
                        name: name.to_string(),
                        shape: *shape,
                        rescale,
                    }
                }
                LayerSpec::Pool { shape, .. } => {
                    shape.validate(name)?;
                    flowing.expect_map(name, "pool input", shape.input_dims())?;
                    flowing = Flow::Map(shape.output_dims());
                    Stage::Pool {
                        name: name.to_string(),
                        shape: *shape,
                    }
                }
                LayerSpec::Flatten { .. } => {
                    let Flow::Map(dims) = flowing else {
                        return Err(mismatch(name, "flatten needs a feature map input"));
                    };
                    flowing = Flow::Vector(dims.iter().product());
                    Stage::Flatten {
                        name: name.to_string(),
                        dims,
                    }
                }
                LayerSpec::Fc {
                    shape,
                    scales,
                    activation,
                    ..
                } => {
                    shape.validate(name)?;
                    flowing.expect_vector(name, shape.in_features)?;
                    let rescale = scales.derive(name)?;
                    rescale.check_accumulator(name, shape.in_features)?;
                    flowing = Flow::Vector(shape.out_features);
                    Stage::Fc {
                        name: name.to_string(),
                        shape: *shape,
                        rescale,
                        activation: *activation,
                    }
                }
            };

            debug!(layer = name, ?flowing, "validated layer");
            stages.push(stage);
        }

        let Flow::Vector(classes) = flowing else {
            return Err(mismatch(
                self.layers.last().map_or("<empty>", LayerSpec::name),
                "network must end in a vector of class scores",
            ));
        };

        Ok(Network {
            input: self.input,
            classes,
            stages,
        })
    }
}

fn mismatch(layer: &str, reason: &str) -> GoldenError {
    GoldenError::TopologyMismatch {
        layer: layer.to_string(),
        reason: reason.to_string(),
    }
}

/// Shape of the value travelling between stages during validation.
#[derive(Debug, Clone, Copy)]
enum Flow {
    Map([usize; 3]),
    Vector(usize),
}

impl Flow {
    fn expect_map(&self, layer: &str, what: &'static str, want: [usize; 3]) -> Result<()> {
        match self {
            Flow::Map(dims) if *dims == want => Ok(()),
            Flow::Map(dims) => Err(GoldenError::shape(layer, what, &want, dims)),
            Flow::Vector(len) => Err(GoldenError::shape(layer, what, &want, &[*len])),
        }
    }

    fn expect_vector(&self, layer: &str, want: usize) -> Result<()> {
        match self {
            Flow::Vector(len) if *len == want => Ok(()),
            Flow::Vector(len) => Err(GoldenError::shape(layer, "fc input", &[want], &[*len])),
            Flow::Map(dims) => Err(GoldenError::shape(layer, "fc input", &[want], dims)),
        }
    }
}

/// A validated layer ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Conv {
        name: String,
        shape: ConvShape,
        rescale: RescaleParams,
    },
    Pool {
        name: String,
        shape: PoolShape,
    },
    Flatten {
        name: String,
        dims: [usize; 3],
    },
    Fc {
        name: String,
        shape: FcShape,
        rescale: RescaleParams,
        activation: Activation,
    },
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Conv { name, .. }
            | Stage::Pool { name, .. }
            | Stage::Flatten { name, .. }
            | Stage::Fc { name, .. } => name,
        }
    }
}

/// Topology that passed [`Topology::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    input: [usize; 3],
    classes: usize,
    stages: Vec<Stage>,
}

impl Network {
    pub fn input_dims(&self) -> [usize; 3] {
        self.input
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenet5_validates() {
        let net = Topology::lenet5().validate().unwrap();
        assert_eq!(net.input_dims(), [1, 32, 32]);
        assert_eq!(net.classes(), 10);
        assert_eq!(net.stages().len(), 8);

        let names: Vec<_> = net.stages().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            ["conv1", "pool1", "conv2", "pool2", "flatten", "fc1", "fc2", "fc3"]
        );

        let Stage::Conv { rescale, .. } = &net.stages()[2] else {
            panic!("conv2 is not a conv stage");
        };
        assert_eq!((rescale.m_inv(), rescale.b_scale()), (512, 1));

        let Stage::Fc {
            rescale,
            activation,
            ..
        } = &net.stages()[7]
        else {
            panic!("fc3 is not a dense stage");
        };
        assert_eq!((rescale.m_inv(), rescale.b_scale()), (256, 1));
        assert_eq!(*activation, Activation::Identity);
    }

    #[test]
    fn rejects_broken_chain() {
        let mut topo = Topology::lenet5();
        if let LayerSpec::Fc { shape, .. } = &mut topo.layers[5] {
            shape.in_features = 399;
        }
        let err = topo.validate().unwrap_err();
        assert!(matches!(
            err,
            GoldenError::ShapeMismatch { ref layer, .. } if layer == "fc1"
        ));
    }

    #[test]
    fn rejects_bad_scales() {
        let mut topo = Topology::lenet5();
        if let LayerSpec::Conv { scales, .. } = &mut topo.layers[0] {
            scales.output_inv = 24;
        }
        assert!(matches!(
            topo.validate(),
            Err(GoldenError::InvalidScaleConfig { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names_and_map_output() {
        let mut topo = Topology::lenet5();
        topo.layers.truncate(4);
        assert!(matches!(
            topo.validate(),
            Err(GoldenError::TopologyMismatch { .. })
        ));

        let mut topo = Topology::lenet5();
        if let LayerSpec::Fc { name, .. } = &mut topo.layers[6] {
            *name = "fc1".to_string();
        }
        assert!(matches!(
            topo.validate(),
            Err(GoldenError::TopologyMismatch { .. })
        ));
    }

    #[test]
    fn rejects_accumulator_overflow() {
        let topo = Topology {
            input: [1, 1, 1],
            layers: vec![
                LayerSpec::Flatten {
                    name: "flatten".into(),
                },
                LayerSpec::Fc {
                    name: "fc".into(),
                    shape: FcShape {
                        out_features: 1,
                        in_features: 1,
                    },
                    // B_SCALE = 2^16 pushes the bias term past i32
                    scales: QuantScales::new(1, 1, 1 << 16, 1),
                    activation: Activation::Identity,
                },
            ],
        };
        assert!(matches!(
            topo.validate(),
            Err(GoldenError::AccumulatorOverflow { .. })
        ));
    }

    #[test]
    fn json_round_trip_of_lenet5() {
        let topo = Topology::lenet5();
        let json = serde_json::to_string(&topo).unwrap();
        assert!(json.contains(r#""kind":"conv""#));
        assert!(json.contains(r#""activation":"identity""#));
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topo);
    }

    #[test]
    fn pool_kernel_defaults_to_two() {
        let json = r#"{
            "input": [1, 4, 4],
            "layers": [
                {
                    "kind": "pool",
                    "name": "p",
                    "shape": { "channels": 1, "out_height": 2, "out_width": 2 }
                },
                { "kind": "flatten", "name": "f" }
            ]
        }"#;
        let topo: Topology = serde_json::from_str(json).unwrap();
        let net = topo.validate().unwrap();
        assert_eq!(net.classes(), 4);
    }
}
