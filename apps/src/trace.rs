//! Text traces of every quantized tensor, for diffing against RTL dumps.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use golden::{Activations, FeatureMap, Inference, LayerParams, Model, ResultSink};

/// Writes one file per stage plus `result.txt` under a trace directory.
///
/// Sample blocks are keyed by the zero-based position within the run.
pub struct TraceWriter {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
}

impl TraceWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
        Ok(TraceWriter {
            dir: dir.to_path_buf(),
            files: HashMap::new(),
        })
    }

    fn file(&mut self, name: &str) -> Result<&mut BufWriter<File>> {
        match self.files.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let path = self.dir.join(format!("{name}.txt"));
                let file = File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                Ok(e.insert(BufWriter::new(file)))
            }
        }
    }

    /// Dumps every layer's weights and biases once, tagged with the
    /// parameter fingerprint.
    pub fn write_params(&mut self, model: &Model) -> Result<()> {
        let fingerprint = model.params().fingerprint();
        writeln!(self.file("result")?, "params sha256: {fingerprint}")?;

        for (name, params) in model.params().iter() {
            let w = self.file(&format!("in_{name}_weight"))?;
            match params {
                LayerParams::Conv { weight, .. } => {
                    let [_, ich, kh, kw] = weight.dims();
                    writeln!(w, "idx: 000 (och,ich,ky): kx ")?;
                    let bytes: &[u8] = bytemuck::cast_slice(weight.as_slice());
                    for (r, row) in bytes.chunks(kw).enumerate() {
                        let (o, i, ky) = (r / (ich * kh), (r / kh) % ich, r % kh);
                        write!(w, "({o:02},{i:02},{ky:02}) ")?;
                        write_bytes(w, row)?;
                    }
                }
                LayerParams::Fc { weight, .. } => {
                    let [_, ich] = weight.dims();
                    writeln!(w, "idx: 000 (och,ich) ")?;
                    let bytes: &[u8] = bytemuck::cast_slice(weight.as_slice());
                    for (n, b) in bytes.iter().enumerate() {
                        writeln!(w, "({:03},{:03}) {b:02x} ", n / ich, n % ich)?;
                    }
                }
            }

            let b = self.file(&format!("in_{name}_bias"))?;
            writeln!(b, "idx: 000 (och) ")?;
            for (o, v) in params.bias().iter().enumerate() {
                writeln!(b, "({o:02}) {:04x} ", *v as u16)?;
            }
        }
        Ok(())
    }

    /// Records the padded input map of one sample.
    pub fn write_input(&mut self, sample: usize, input: &FeatureMap) -> Result<()> {
        write_map(self.file("in_infmap")?, sample, input)
    }

    pub fn flush(&mut self) -> Result<()> {
        for w in self.files.values_mut() {
            w.flush()?;
        }
        Ok(())
    }
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    for b in bytes {
        write!(w, "{b:02x} ")?;
    }
    writeln!(w)?;
    Ok(())
}

fn write_map<W: Write>(w: &mut W, sample: usize, map: &FeatureMap) -> Result<()> {
    writeln!(w, "idx: {sample:03} (c,y): x ")?;
    for c in 0..map.channels() {
        for y in 0..map.rows() {
            write!(w, "({c:02},{y:02}) ")?;
            write_bytes(w, bytemuck::cast_slice(map.row(c, y)))?;
        }
    }
    Ok(())
}

fn write_vector<W: Write>(w: &mut W, sample: usize, v: &[i8]) -> Result<()> {
    writeln!(w, "idx: {sample:03} (och) ")?;
    for (n, b) in bytemuck::cast_slice::<i8, u8>(v).iter().enumerate() {
        writeln!(w, "({n:03}) {b:02x} ")?;
    }
    Ok(())
}

impl ResultSink for TraceWriter {
    type Error = anyhow::Error;

    fn record(&mut self, sample: usize, label: Option<u8>, inference: &Inference) -> Result<()> {
        for stage in &inference.stages {
            let w = self.file(&format!("ot_{}", stage.name))?;
            match &stage.value {
                Activations::Map(map) => write_map(w, sample, map)?,
                Activations::Vector(v) => write_vector(w, sample, v)?,
            }
        }

        let w = self.file("result")?;
        write!(w, "idx: {sample:03}  result: {}", inference.class)?;
        if let Some(label) = label {
            write!(w, "  label: {label}")?;
        }
        writeln!(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use golden::{Tensor4, Topology};

    use super::*;

    #[test]
    fn map_rows_are_hex_bytes() {
        let map = FeatureMap::from_vec(2, 1, 3, vec![0, -1, 127, -128, 16, 1]).unwrap();
        let mut out = Vec::new();
        write_map(&mut out, 4, &map).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "idx: 004 (c,y): x \n(00,00) 00 ff 7f \n(01,00) 80 10 01 \n"
        );
    }

    #[test]
    fn vector_rows_are_indexed() {
        let mut out = Vec::new();
        write_vector(&mut out, 0, &[-2, 5]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "idx: 000 (och) \n(000) fe \n(001) 05 \n");
    }

    #[test]
    fn writes_stage_files_and_results() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let mut writer = TraceWriter::create(dir).unwrap();

        let inference = Inference {
            class: 3,
            logits: vec![0, 1, 2, 9],
            stages: vec![golden::StageOutput {
                name: "fc3".to_string(),
                value: Activations::Vector(vec![0, 1, 2, 9]),
            }],
        };
        writer.record(0, Some(3), &inference).unwrap();
        writer.record(1, None, &inference).unwrap();
        writer.flush().unwrap();

        let result = fs::read_to_string(dir.join("result.txt")).unwrap();
        assert_eq!(
            result,
            "idx: 000  result: 3  label: 3\nidx: 001  result: 3\n"
        );
        let fc3 = fs::read_to_string(dir.join("ot_fc3.txt")).unwrap();
        assert!(fc3.starts_with("idx: 000 (och) \n(000) 00 \n"));
        assert_eq!(fc3.matches("idx:").count(), 2);

    }

    #[test]
    fn dumps_parameters_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let topo = Topology::lenet5();
        let net = topo.validate().unwrap();

        let mut params = golden::ParamSet::new();
        for stage in net.stages() {
            match stage {
                golden::Stage::Conv { name, shape, .. } => {
                    let mut weight = Tensor4::zeros(shape.weight_dims());
                    weight.set(0, 0, 0, 1, -1);
                    params.insert(
                        name.clone(),
                        LayerParams::Conv {
                            weight,
                            bias: vec![-2; shape.out_channels],
                        },
                    );
                }
                golden::Stage::Fc { name, shape, .. } => {
                    params.insert(
                        name.clone(),
                        LayerParams::Fc {
                            weight: golden::Matrix::zeros(shape.out_features, shape.in_features),
                            bias: vec![0; shape.out_features],
                        },
                    );
                }
                _ => {}
            }
        }
        let model = Model::new(net, params).unwrap();

        let mut writer = TraceWriter::create(dir).unwrap();
        writer.write_params(&model).unwrap();
        writer.flush().unwrap();

        let conv1 = fs::read_to_string(dir.join("in_conv1_weight.txt")).unwrap();
        let mut lines = conv1.lines();
        assert_eq!(lines.next(), Some("idx: 000 (och,ich,ky): kx "));
        assert_eq!(lines.next(), Some("(00,00,00) 00 ff 00 00 00 "));
        assert_eq!(conv1.lines().count(), 1 + 6 * 5);

        let bias = fs::read_to_string(dir.join("in_conv1_bias.txt")).unwrap();
        assert!(bias.contains("(00) fffe \n"));

        let fc3 = fs::read_to_string(dir.join("in_fc3_weight.txt")).unwrap();
        assert_eq!(fc3.lines().count(), 1 + 10 * 84);
        assert!(fc3.lines().last().unwrap().starts_with("(009,083) "));

        let result = fs::read_to_string(dir.join("result.txt")).unwrap();
        assert!(result.starts_with(&format!("params sha256: {}", model.params().fingerprint())));

    }
}
