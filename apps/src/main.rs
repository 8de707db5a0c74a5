// Copyright 2024 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use golden::{Model, ResultSink, Topology};

use crate::dataset::{InputQuant, MnistImages, MnistLabels};
use crate::trace::TraceWriter;

mod dataset;
mod params;
mod trace;

/// Arguments for the LeNet-5 golden model runner
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// MNIST IDX3 image file, e.g. t10k-images-idx3-ubyte.
    #[clap(long, env)]
    images: PathBuf,
    /// MNIST IDX1 label file, e.g. t10k-labels-idx1-ubyte.
    #[clap(long, env)]
    labels: PathBuf,
    /// Directory holding `<layer>_weight_quantized.txt` and `<layer>_bias_quantized.txt`.
    #[clap(short, long, env)]
    params_dir: PathBuf,
    /// Number of samples to run.
    #[clap(short = 'n', long, env, default_value_t = 1)]
    count: usize,
    /// First sample to run, counted from 1.
    #[clap(long, env, default_value_t = 1)]
    start: usize,
    /// JSON topology to use instead of the built-in LeNet-5.
    #[clap(long, env)]
    topology: Option<PathBuf>,
    /// Write every intermediate tensor as hex text into this directory.
    #[clap(long, env)]
    trace_dir: Option<PathBuf>,
    /// Hex file of expected last-layer outputs to diff every sample against.
    #[clap(long, env)]
    golden_logits: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }
    let args = Args::parse();

    let topology = match &args.topology {
        Some(path) => load_topology(path)?,
        None => Topology::lenet5(),
    };
    let network = topology.validate().context("invalid topology")?;
    let param_set = params::load_params(&args.params_dir, &network)?;
    let model = Model::new(network, param_set).context("parameters do not fit the topology")?;
    tracing::info!(
        "Loaded {} parameterised layers, sha256 {}",
        model.params().len(),
        model.params().fingerprint()
    );

    let quant = InputQuant::default();
    let mut images = MnistImages::open(&args.images)?;
    let mut labels = MnistLabels::open(&args.labels)?;
    if images.padded_dims(&quant) != model.network().input_dims() {
        bail!(
            "padded images are {:?} but the network expects {:?}",
            images.padded_dims(&quant),
            model.network().input_dims()
        );
    }
    let available = images.len().min(labels.len());
    let last = sample_range(args.start, args.count, available)?;

    let golden_logits = match &args.golden_logits {
        Some(path) => Some(params::read_i8_values(path, model.network().classes())?),
        None => None,
    };

    let mut tracer = match &args.trace_dir {
        Some(dir) => {
            let mut writer = TraceWriter::create(dir)?;
            writer.write_params(&model)?;
            Some(writer)
        }
        None => None,
    };

    let mut correct = 0usize;
    for (run, index) in (args.start..=last).enumerate() {
        let input = images.read(index, &quant)?;
        let label = labels.read(index)?;

        if let Some(writer) = tracer.as_mut() {
            writer.write_input(run, &input)?;
        }
        let inference = if tracer.is_some() {
            model.infer_traced(input)
        } else {
            model.infer(input)
        }
        .with_context(|| format!("inference failed on sample {index}"))?;

        tracing::info!(
            "Sample {}: label {} predicted {}",
            index,
            label,
            inference.class
        );
        tracing::trace!("Logits: {:?}", inference.logits);
        if usize::from(label) == inference.class {
            correct += 1;
        }

        if let Some(expected) = &golden_logits {
            let diff = count_diff(expected, &inference.logits);
            if diff != 0 {
                tracing::warn!("Sample {}: quantization diff num {}", index, diff);
            }
        }
        if let Some(writer) = tracer.as_mut() {
            writer.record(run, Some(label), &inference)?;
        }
    }

    if let Some(mut writer) = tracer {
        writer.flush()?;
    }
    tracing::info!(
        "Accuracy: {}/{} ({:.2}%)",
        correct,
        args.count,
        100.0 * correct as f64 / args.count as f64
    );

    Ok(())
}

fn load_topology(path: &Path) -> Result<Topology> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read topology {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse topology {}", path.display()))
}

/// Last sample index of a run of `count` samples starting at `start`, with
/// both ends inside `1..=available`.
fn sample_range(start: usize, count: usize, available: usize) -> Result<usize> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let Some(last) = start.checked_add(count - 1) else {
        bail!("samples starting at {start} with count {count} overflow the sample index");
    };
    if start < 1 || last > available {
        bail!("samples {start}..={last} out of range (valid range: 1 to {available})");
    }
    Ok(last)
}

/// Number of positions where `actual` differs from `expected`.
fn count_diff(expected: &[i8], actual: &[i8]) -> usize {
    let mismatched = expected.iter().zip(actual).filter(|(a, b)| a != b).count();
    mismatched + expected.len().abs_diff(actual.len())
}
