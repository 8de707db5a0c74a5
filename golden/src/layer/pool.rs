use serde::{Deserialize, Serialize};

use crate::error::{GoldenError, Result};
use crate::tensor::FeatureMap;

/// Seed and floor of every pooling window.
///
/// Pooling only ever follows a ReLU convolution here, so its input is
/// non-negative and this floor is invisible. A window of all-negative values
/// reports 0 rather than its true maximum, matching the hardware comparator.
pub const POOL_FLOOR: i8 = 0;

/// Non-overlapping max pooling (stride equals the kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolShape {
    pub channels: usize,
    pub out_height: usize,
    pub out_width: usize,
    #[serde(default = "default_kernel")]
    pub kernel_height: usize,
    #[serde(default = "default_kernel")]
    pub kernel_width: usize,
}

fn default_kernel() -> usize {
    2
}

impl PoolShape {
    pub fn input_dims(&self) -> [usize; 3] {
        [
            self.channels,
            self.out_height * self.kernel_height,
            self.out_width * self.kernel_width,
        ]
    }

    pub fn output_dims(&self) -> [usize; 3] {
        [self.channels, self.out_height, self.out_width]
    }

    pub fn validate(&self, layer: &str) -> Result<()> {
        if self.input_dims().contains(&0) {
            return Err(GoldenError::TopologyMismatch {
                layer: layer.to_string(),
                reason: format!("zero-sized pooling dimension in {self:?}"),
            });
        }
        Ok(())
    }
}

/// Per-channel max over `kernel_height x kernel_width` windows, floored at
/// [`POOL_FLOOR`].
///
/// Input must be non-negative for the result to be a true maximum.
pub fn max_pool(layer: &str, shape: &PoolShape, input: &FeatureMap) -> Result<FeatureMap> {
    if input.dims() != shape.input_dims() {
        return Err(GoldenError::shape(
            layer,
            "pool input",
            &shape.input_dims(),
            &input.dims(),
        ));
    }

    let (kh, kw) = (shape.kernel_height, shape.kernel_width);
    let mut out = FeatureMap::zeros(shape.channels, shape.out_height, shape.out_width);

    for c in 0..shape.channels {
        for oy in 0..shape.out_height {
            for ox in 0..shape.out_width {
                let mut window_max = i8::MIN;
                for ky in 0..kh {
                    for kx in 0..kw {
                        window_max = window_max.max(input.get(c, oy * kh + ky, ox * kw + kx));
                    }
                }
                out.set(c, oy, ox, window_max.max(POOL_FLOOR));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(channels: usize, oy: usize, ox: usize) -> PoolShape {
        PoolShape {
            channels,
            out_height: oy,
            out_width: ox,
            kernel_height: 2,
            kernel_width: 2,
        }
    }

    #[test]
    fn single_window() {
        let input = FeatureMap::from_vec(1, 2, 2, vec![1, 2, 3, 4]).unwrap();
        let out = max_pool("pool", &shape(1, 1, 1), &input).unwrap();
        assert_eq!(out.as_slice(), &[4]);
    }

    #[test]
    fn windows_do_not_overlap() {
        #[rustfmt::skip]
        let data = vec![
            1, 9, 0, 0,
            2, 3, 0, 7,
            5, 0, 1, 1,
            0, 0, 1, 2,
        ];
        let input = FeatureMap::from_vec(1, 4, 4, data).unwrap();
        let out = max_pool("pool", &shape(1, 2, 2), &input).unwrap();
        assert_eq!(out.as_slice(), &[9, 7, 5, 2]);
    }

    #[test]
    fn all_negative_window_reports_floor() {
        let input = FeatureMap::from_vec(1, 2, 2, vec![-5, -3, -9, -1]).unwrap();
        let out = max_pool("pool", &shape(1, 1, 1), &input).unwrap();
        assert_eq!(out.as_slice(), &[POOL_FLOOR]);
    }

    #[test]
    fn channels_are_independent() {
        let input = FeatureMap::from_vec(2, 2, 2, vec![1, 1, 1, 1, 8, 0, 0, 0]).unwrap();
        let out = max_pool("pool", &shape(2, 1, 1), &input).unwrap();
        assert_eq!(out.as_slice(), &[1, 8]);
    }

    #[test]
    fn rejects_wrong_input() {
        let input = FeatureMap::zeros(1, 3, 4);
        let err = max_pool("pool1", &shape(1, 2, 2), &input).unwrap_err();
        assert!(matches!(err, GoldenError::ShapeMismatch { .. }));
    }
}
