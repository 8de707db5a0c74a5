use serde::{Deserialize, Serialize};

use crate::error::{GoldenError, Result};
use crate::quant::{Acc, Activation, RescaleParams};
use crate::tensor::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcShape {
    pub out_features: usize,
    pub in_features: usize,
}

impl FcShape {
    pub fn weight_dims(&self) -> [usize; 2] {
        [self.out_features, self.in_features]
    }

    pub fn validate(&self, layer: &str) -> Result<()> {
        if self.out_features == 0 || self.in_features == 0 {
            return Err(GoldenError::TopologyMismatch {
                layer: layer.to_string(),
                reason: format!("zero-sized dense dimension in {self:?}"),
            });
        }
        Ok(())
    }
}

/// Dense matrix-vector product followed by requantization.
pub fn fully_connected(
    layer: &str,
    shape: &FcShape,
    input: &[i8],
    weight: &Matrix<i8>,
    bias: &[i16],
    rescale: &RescaleParams,
    activation: Activation,
) -> Result<Vec<i8>> {
    shape.validate(layer)?;
    rescale.check_accumulator(layer, shape.in_features)?;
    if input.len() != shape.in_features {
        return Err(GoldenError::shape(
            layer,
            "fc input",
            &[shape.in_features],
            &[input.len()],
        ));
    }
    if weight.dims() != shape.weight_dims() {
        return Err(GoldenError::shape(
            layer,
            "fc weight",
            &shape.weight_dims(),
            &weight.dims(),
        ));
    }
    if bias.len() != shape.out_features {
        return Err(GoldenError::shape(
            layer,
            "fc bias",
            &[shape.out_features],
            &[bias.len()],
        ));
    }

    let out = (0..shape.out_features)
        .map(|och| {
            let acc: Acc = input
                .iter()
                .zip(weight.row(och))
                .map(|(&x, &w)| Acc::from(x) * Acc::from(w))
                .sum();
            rescale.rescale(acc, bias[och], activation)
        })
        .collect();

    Ok(out)
}
