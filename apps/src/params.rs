//! Loader for the quantizer's hex-text weight and bias dumps.
//!
//! Each line carries one value; the first `0x` on the line marks it and the
//! following `bits / 4` hex digits hold its two's complement encoding.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use golden::{LayerParams, Matrix, Network, ParamSet, Stage, Tensor4};
use tracing::debug;

pub fn weight_file(dir: &Path, layer: &str) -> std::path::PathBuf {
    dir.join(format!("{layer}_weight_quantized.txt"))
}

pub fn bias_file(dir: &Path, layer: &str) -> std::path::PathBuf {
    dir.join(format!("{layer}_bias_quantized.txt"))
}

/// Decodes the first `count` values of `text`, each `bytes` wide, as
/// big-endian byte groups.
fn parse_hex_lines(text: &str, bytes: usize, count: usize, source: &str) -> Result<Vec<Vec<u8>>> {
    let digits = bytes * 2;
    let mut lines = text.lines();
    let mut values = Vec::with_capacity(count);

    for n in 1..=count {
        let line = lines.next().ok_or_else(|| {
            anyhow!("{source}: expected {count} values but the file ends after {}", n - 1)
        })?;
        let Some(pos) = line.find("0x") else {
            bail!("{source}:{n}: format error, '0x' not found (line={line:?})");
        };
        let hex_str = line[pos + 2..].get(..digits).unwrap_or(&line[pos + 2..]);
        if hex_str.len() != digits {
            bail!("{source}:{n}: hex string length error: {hex_str:?}");
        }
        let decoded = hex::decode(hex_str)
            .with_context(|| format!("{source}:{n}: hex conversion error: {hex_str:?}"))?;
        values.push(decoded);
    }

    Ok(values)
}

pub fn parse_i8_values(text: &str, count: usize, source: &str) -> Result<Vec<i8>> {
    Ok(parse_hex_lines(text, 1, count, source)?
        .into_iter()
        .map(|b| b[0] as i8)
        .collect())
}

pub fn parse_i16_values(text: &str, count: usize, source: &str) -> Result<Vec<i16>> {
    Ok(parse_hex_lines(text, 2, count, source)?
        .into_iter()
        .map(|b| i16::from_be_bytes([b[0], b[1]]))
        .collect())
}

pub fn read_i8_values(path: &Path, count: usize) -> Result<Vec<i8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_i8_values(&text, count, &path.display().to_string())
}

pub fn read_i16_values(path: &Path, count: usize) -> Result<Vec<i16>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_i16_values(&text, count, &path.display().to_string())
}

/// Loads `{layer}_weight_quantized.txt` and `{layer}_bias_quantized.txt` for
/// every parameterised stage of `network`.
pub fn load_params(dir: &Path, network: &Network) -> Result<ParamSet> {
    let mut set = ParamSet::new();

    for stage in network.stages() {
        let (name, params) = match stage {
            Stage::Conv { name, shape, .. } => {
                let dims = shape.weight_dims();
                let weight = read_i8_values(&weight_file(dir, name), dims.iter().product())?;
                let bias = read_i16_values(&bias_file(dir, name), shape.out_channels)?;
                let weight = Tensor4::from_vec(dims, weight)?;
                (name, LayerParams::Conv { weight, bias })
            }
            Stage::Fc { name, shape, .. } => {
                let weight = read_i8_values(
                    &weight_file(dir, name),
                    shape.out_features * shape.in_features,
                )?;
                let bias = read_i16_values(&bias_file(dir, name), shape.out_features)?;
                let weight = Matrix::from_vec(shape.out_features, shape.in_features, weight)?;
                (name, LayerParams::Fc { weight, bias })
            }
            Stage::Pool { .. } | Stage::Flatten { .. } => continue,
        };
        debug!(layer = %name, "loaded parameters");
        set.insert(name.clone(), params);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use golden::layer::{ConvShape, FcShape};
    use golden::{Activation, LayerSpec, QuantScales, Topology};

    use super::*;

    #[test]
    fn parses_twos_complement_values() {
        let text = "0x7f\n0x80\n  3: 0xff // tail\n0x00\n";
        assert_eq!(parse_i8_values(text, 4, "w").unwrap(), vec![127, -128, -1, 0]);

        let text = "0x7fff\n0x8000\n0xFFFE\n";
        assert_eq!(parse_i16_values(text, 3, "b").unwrap(), vec![32767, -32768, -2]);
    }

    #[test]
    fn takes_only_the_declared_width() {
        // Extra digits past the value width are ignored, as are extra lines.
        let text = "0x12ab\n0x34\n0x56\n";
        assert_eq!(parse_i8_values(text, 2, "w").unwrap(), vec![0x12, 0x34]);
    }

    #[test]
    fn reports_malformed_lines() {
        let err = parse_i8_values("0x01\n", 2, "w.txt").unwrap_err();
        assert!(err.to_string().contains("ends after 1"), "{err}");

        let err = parse_i8_values("12\n", 1, "w.txt").unwrap_err();
        assert!(err.to_string().contains("'0x' not found"), "{err}");

        let err = parse_i16_values("0x12\n", 1, "b.txt").unwrap_err();
        assert!(err.to_string().contains("length error"), "{err}");

        let err = parse_i8_values("0xzz\n", 1, "w.txt").unwrap_err();
        assert!(err.to_string().contains("conversion error"), "{err}");
    }

    #[test]
    fn loads_a_network_from_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let topo = Topology {
            input: [1, 2, 2],
            layers: vec![
                LayerSpec::Conv {
                    name: "c".into(),
                    shape: ConvShape {
                        out_channels: 2,
                        out_height: 1,
                        out_width: 1,
                        in_channels: 1,
                        in_height: 2,
                        in_width: 2,
                        kernel_height: 2,
                        kernel_width: 2,
                    },
                    scales: QuantScales::new(1, 1, 1, 1),
                },
                LayerSpec::Flatten { name: "f".into() },
                LayerSpec::Fc {
                    name: "d".into(),
                    shape: FcShape {
                        out_features: 1,
                        in_features: 2,
                    },
                    scales: QuantScales::new(1, 1, 1, 1),
                    activation: Activation::Identity,
                },
            ],
        };
        let net = topo.validate().unwrap();

        fs::write(weight_file(dir, "c"), "0x01\n0x02\n0x03\n0x04\n0xff\n0xfe\n0xfd\n0xfc\n")
            .unwrap();
        fs::write(bias_file(dir, "c"), "0x0010\n0xfff0\n").unwrap();
        fs::write(weight_file(dir, "d"), "0x05\n0xfb\n").unwrap();
        fs::write(bias_file(dir, "d"), "0x0000\n").unwrap();

        let set = load_params(dir, &net).unwrap();
        assert_eq!(set.len(), 2);
        let Some(LayerParams::Conv { weight, bias }) = set.get("c") else {
            panic!("conv params missing");
        };
        assert_eq!(weight.get(1, 0, 1, 1), -4);
        assert_eq!(bias, &vec![16, -16]);
        set.check_against(&net).unwrap();

        fs::remove_file(bias_file(dir, "d")).unwrap();
        assert!(load_params(dir, &net).is_err());
    }
}
