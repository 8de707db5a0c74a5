use serde::{Deserialize, Serialize};

use crate::error::{GoldenError, Result};
use crate::quant::{Acc, Activation, RescaleParams};
use crate::tensor::{FeatureMap, Tensor4};

/// Geometry of a valid, stride-1 convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvShape {
    pub out_channels: usize,
    pub out_height: usize,
    pub out_width: usize,
    pub in_channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
}

impl ConvShape {
    pub fn input_dims(&self) -> [usize; 3] {
        [self.in_channels, self.in_height, self.in_width]
    }

    pub fn output_dims(&self) -> [usize; 3] {
        [self.out_channels, self.out_height, self.out_width]
    }

    pub fn weight_dims(&self) -> [usize; 4] {
        [
            self.out_channels,
            self.in_channels,
            self.kernel_height,
            self.kernel_width,
        ]
    }

    /// Number of products summed into each output element.
    pub fn terms(&self) -> usize {
        self.in_channels * self.kernel_height * self.kernel_width
    }

    /// Checks that every kernel placement stays inside the input.
    pub fn validate(&self, layer: &str) -> Result<()> {
        let dims = [
            self.out_channels,
            self.out_height,
            self.out_width,
            self.in_channels,
            self.kernel_height,
            self.kernel_width,
        ];
        if dims.contains(&0) {
            return Err(GoldenError::TopologyMismatch {
                layer: layer.to_string(),
                reason: format!("zero-sized convolution dimension in {self:?}"),
            });
        }
        let need_y = self.out_height + self.kernel_height - 1;
        let need_x = self.out_width + self.kernel_width - 1;
        if self.in_height < need_y || self.in_width < need_x {
            return Err(GoldenError::shape(
                layer,
                "conv input window",
                &[need_y, need_x],
                &[self.in_height, self.in_width],
            ));
        }
        Ok(())
    }
}

/// Valid 2D convolution with ReLU requantization.
///
/// Padding is never applied here; callers bake it into `input`. The shape
/// and the accumulator bound are checked before any arithmetic runs.
pub fn conv2d(
    layer: &str,
    shape: &ConvShape,
    input: &FeatureMap,
    weight: &Tensor4<i8>,
    bias: &[i16],
    rescale: &RescaleParams,
) -> Result<FeatureMap> {
    shape.validate(layer)?;
    rescale.check_accumulator(layer, shape.terms())?;
    if input.dims() != shape.input_dims() {
        return Err(GoldenError::shape(
            layer,
            "conv input",
            &shape.input_dims(),
            &input.dims(),
        ));
    }
    if weight.dims() != shape.weight_dims() {
        return Err(GoldenError::shape(
            layer,
            "conv weight",
            &shape.weight_dims(),
            &weight.dims(),
        ));
    }
    if bias.len() != shape.out_channels {
        return Err(GoldenError::shape(
            layer,
            "conv bias",
            &[shape.out_channels],
            &[bias.len()],
        ));
    }

    let mut out = FeatureMap::zeros(shape.out_channels, shape.out_height, shape.out_width);

    for och in 0..shape.out_channels {
        for oy in 0..shape.out_height {
            for ox in 0..shape.out_width {
                let mut acc: Acc = 0;
                for ich in 0..shape.in_channels {
                    for ky in 0..shape.kernel_height {
                        for kx in 0..shape.kernel_width {
                            let x = Acc::from(input.get(ich, oy + ky, ox + kx));
                            let w = Acc::from(weight.get(och, ich, ky, kx));
                            acc += x * w;
                        }
                    }
                }
                out.set(och, oy, ox, rescale.rescale(acc, bias[och], Activation::Relu));
            }
        }
    }

    Ok(out)
}
