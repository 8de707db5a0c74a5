//! Integer-only requantization shared by the convolution and dense layers.

use serde::{Deserialize, Serialize};

use crate::error::{GoldenError, Result};

/// Accumulator width of the hardware MAC array.
pub type Acc = i32;

/// Largest value any layer may emit.
pub const QMAX: Acc = i8::MAX as Acc;

/// Magnitude of the widest 8b x 8b product (`-128 * -128`).
const MAX_PRODUCT: i64 = 128 * 128;

/// Magnitude of the widest 16b bias (`-32768`).
const MAX_BIAS: i64 = 32768;

/// Lower clamp applied after rescaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Floor at zero.
    Relu,
    /// No lower clamp; only the i8 range applies.
    Identity,
}

impl Activation {
    pub fn applies_relu(self) -> bool {
        matches!(self, Activation::Relu)
    }
}

/// Per-layer scale inverses as exported by the quantizer.
///
/// Each value is `1 / scale` for the layer's input, weight, bias and output
/// tensors respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantScales {
    pub input_inv: u32,
    pub weight_inv: u32,
    pub bias_inv: u32,
    pub output_inv: u32,
}

impl QuantScales {
    pub const fn new(input_inv: u32, weight_inv: u32, bias_inv: u32, output_inv: u32) -> Self {
        QuantScales {
            input_inv,
            weight_inv,
            bias_inv,
            output_inv,
        }
    }

    /// Derives `M_INV = (in * w) / out` and `B_SCALE = b / (in * w)`.
    ///
    /// Both quotients must be exact and both results must be powers of two,
    /// since the hardware implements them as shifts.
    pub fn derive(&self, layer: &str) -> Result<RescaleParams> {
        let fields = [
            ("input_inv", self.input_inv),
            ("weight_inv", self.weight_inv),
            ("bias_inv", self.bias_inv),
            ("output_inv", self.output_inv),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
            return Err(GoldenError::scale(layer, format!("{name} must be non-zero")));
        }

        let in_w = u64::from(self.input_inv) * u64::from(self.weight_inv);
        let out = u64::from(self.output_inv);
        let bias = u64::from(self.bias_inv);

        if in_w % out != 0 {
            return Err(GoldenError::scale(
                layer,
                format!("input_inv * weight_inv ({in_w}) is not a multiple of output_inv ({out})"),
            ));
        }
        if bias % in_w != 0 {
            return Err(GoldenError::scale(
                layer,
                format!("bias_inv ({bias}) is not a multiple of input_inv * weight_inv ({in_w})"),
            ));
        }

        RescaleParams::new(layer, in_w / out, bias / in_w)
    }
}

/// Validated `M_INV` / `B_SCALE` pair with their shift amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescaleParams {
    m_inv: Acc,
    b_scale: Acc,
    shift: u32,
    b_shift: u32,
}

impl RescaleParams {
    pub fn new(layer: &str, m_inv: u64, b_scale: u64) -> Result<Self> {
        let shift = pow2_shift(layer, "M_INV", m_inv)?;
        let b_shift = pow2_shift(layer, "B_SCALE", b_scale)?;
        Ok(RescaleParams {
            m_inv: m_inv as Acc,
            b_scale: b_scale as Acc,
            shift,
            b_shift,
        })
    }

    pub fn m_inv(&self) -> Acc {
        self.m_inv
    }

    pub fn b_scale(&self) -> Acc {
        self.b_scale
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn b_shift(&self) -> u32 {
        self.b_shift
    }

    /// Worst-case magnitude reachable before the output shift for a
    /// reduction over `terms` 8b x 8b products.
    pub fn worst_case_bound(&self, terms: usize) -> i64 {
        terms as i64 * MAX_PRODUCT + (MAX_BIAS << self.b_shift) + i64::from(self.m_inv / 2)
    }

    /// Fails with [`GoldenError::AccumulatorOverflow`] when a reduction of
    /// `terms` products could leave the accumulator range.
    pub fn check_accumulator(&self, layer: &str, terms: usize) -> Result<()> {
        let bound = self.worst_case_bound(terms);
        if bound > i64::from(Acc::MAX) {
            return Err(GoldenError::AccumulatorOverflow {
                layer: layer.to_string(),
                bound,
            });
        }
        Ok(())
    }

    /// Turns a finished dot product into one quantized output.
    ///
    /// Adds the pre-scaled bias, rounds with `+M_INV/2` before the arithmetic
    /// shift, applies the optional ReLU floor and saturates at 127. There is
    /// no lower clamp: without ReLU the i8 narrowing keeps the low eight bits,
    /// as the output register does.
    #[inline]
    pub fn rescale(&self, acc: Acc, bias: i16, activation: Activation) -> i8 {
        let acc = acc + (Acc::from(bias) << self.b_shift);
        let mut scaled = (acc + self.m_inv / 2) >> self.shift;

        if activation.applies_relu() && scaled < 0 {
            scaled = 0;
        }
        if scaled > QMAX {
            scaled = QMAX;
        }

        scaled as i8
    }
}

fn pow2_shift(layer: &str, name: &str, value: u64) -> Result<u32> {
    if !value.is_power_of_two() {
        return Err(GoldenError::scale(
            layer,
            format!("{name} = {value} is not a power of two"),
        ));
    }
    let shift = value.trailing_zeros();
    // The shifted operands live in an i32 accumulator.
    if shift > 30 {
        return Err(GoldenError::scale(
            layer,
            format!("{name} = {value} exceeds the accumulator range"),
        ));
    }
    Ok(shift)
}
