//! MNIST IDX readers that hand quantized, padded digits to the model.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use golden::FeatureMap;

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;

const IMAGE_HEADER_LEN: u64 = 16;
const LABEL_HEADER_LEN: u64 = 8;

/// Input quantization applied at the dataset boundary.
///
/// `q = round(((p / 255) - mean) / std * scale_inv)` clipped to i8, with the
/// digit centred in a border of `pad` pixels holding the quantized zero pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputQuant {
    pub mean: f32,
    pub std: f32,
    pub scale_inv: f32,
    pub pad: usize,
}

impl Default for InputQuant {
    fn default() -> Self {
        InputQuant {
            mean: 0.1307,
            std: 0.3081,
            scale_inv: 32.0,
            pad: 2,
        }
    }
}

impl InputQuant {
    pub fn quantize(&self, pixel: u8) -> i8 {
        let normalized = (f32::from(pixel) / 255.0 - self.mean) / self.std;
        let q = (normalized * self.scale_inv).round();
        q.clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8
    }

    /// Value of the padding border, i.e. a black pixel after normalization.
    pub fn background(&self) -> i8 {
        let normalized = (0.0 - self.mean) / self.std;
        (normalized * self.scale_inv)
            .round()
            .clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8
    }
}

fn read_u32_be<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn check_index(what: &str, index: usize, count: u32) -> Result<()> {
    if index < 1 || index > count as usize {
        bail!("{what} index out of range: {index} (valid range: 1 to {count})");
    }
    Ok(())
}

/// Opened IDX3 image file with its parsed header.
#[derive(Debug)]
pub struct MnistImages<R> {
    reader: R,
    count: u32,
    rows: usize,
    cols: usize,
}

impl MnistImages<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open image file {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid image file {}", path.display()))
    }
}

impl<R: Read + Seek> MnistImages<R> {
    pub fn from_reader(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let magic = read_u32_be(&mut reader).context("truncated image header")?;
        ensure!(magic == IMAGE_MAGIC, "invalid magic number for images: {magic}");
        let count = read_u32_be(&mut reader).context("truncated image header")?;
        let rows = read_u32_be(&mut reader).context("truncated image header")? as usize;
        let cols = read_u32_be(&mut reader).context("truncated image header")? as usize;
        ensure!(
            rows == IMAGE_ROWS && cols == IMAGE_COLS,
            "unexpected image dimensions: {rows}x{cols} (expected {IMAGE_ROWS}x{IMAGE_COLS})"
        );
        Ok(MnistImages {
            reader,
            count,
            rows,
            cols,
        })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// `[channels, rows, cols]` of the maps produced by [`MnistImages::read`].
    pub fn padded_dims(&self, quant: &InputQuant) -> [usize; 3] {
        [1, self.rows + 2 * quant.pad, self.cols + 2 * quant.pad]
    }

    /// Reads and quantizes image `index`, counted from 1.
    pub fn read(&mut self, index: usize, quant: &InputQuant) -> Result<FeatureMap> {
        check_index("image", index, self.count)?;

        let size = self.rows * self.cols;
        let offset = IMAGE_HEADER_LEN + ((index - 1) * size) as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut pixels = vec![0u8; size];
        self.reader
            .read_exact(&mut pixels)
            .with_context(|| format!("image {index} is truncated"))?;

        let [_, h, w] = self.padded_dims(quant);
        let mut map = FeatureMap::filled(1, h, w, quant.background());
        for (i, &p) in pixels.iter().enumerate() {
            map.set(0, i / self.cols + quant.pad, i % self.cols + quant.pad, quant.quantize(p));
        }
        Ok(map)
    }
}

/// Opened IDX1 label file with its parsed header.
#[derive(Debug)]
pub struct MnistLabels<R> {
    reader: R,
    count: u32,
}

impl MnistLabels<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open label file {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid label file {}", path.display()))
    }
}

impl<R: Read + Seek> MnistLabels<R> {
    pub fn from_reader(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let magic = read_u32_be(&mut reader).context("truncated label header")?;
        ensure!(magic == LABEL_MAGIC, "invalid magic number for labels: {magic}");
        let count = read_u32_be(&mut reader).context("truncated label header")?;
        Ok(MnistLabels { reader, count })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Label of sample `index`, counted from 1.
    pub fn read(&mut self, index: usize) -> Result<u8> {
        check_index("label", index, self.count)?;
        self.reader
            .seek(SeekFrom::Start(LABEL_HEADER_LEN + (index - 1) as u64))?;
        let mut byte = [0u8; 1];
        self.reader
            .read_exact(&mut byte)
            .with_context(|| format!("label {index} is truncated"))?;
        Ok(byte[0])
    }
}
