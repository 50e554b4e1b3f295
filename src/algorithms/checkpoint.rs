//! Binary model and id-mapping files.
//!
//! Model layout, little-endian:
//!
//! ```text
//! i32 num_users | i32 num_items | i32 num_factors
//! f32[num_users * num_factors]  user features, row-major
//! f32[num_items * num_factors]  item features, row-major
//! ```
//!
//! A biased model appends `f32 global_mean | f32[num_users] user_bias |
//! f32[num_items] item_bias`. Readers that stop after the item features see a
//! plain dot-product model.
//!
//! Mapping layout: `i32 count | i32[count]` original item ids, indexed by
//! dense item index.

use super::{FactorModel, DEFAULT_LEARNING_RATE, DEFAULT_REGULARIZATION};
use crate::error::{MfError, Result};
use crate::models::Formulation;
use crate::utils::validation::validate_model_header;
use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{error, info};

const SCALAR_BYTES: usize = 4;

pub fn save_model(model: &FactorModel, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| MfError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_model(model, &mut writer).map_err(|e| MfError::io(path, e))?;
    writer.flush().map_err(|e| MfError::io(path, e))?;
    Ok(())
}

/// Saves the model, logging instead of failing. Returns whether the file was written.
pub fn save_model_logged(model: &FactorModel, path: &Path) -> bool {
    match save_model(model, path) {
        Ok(()) => {
            info!("Model saved to {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to save model: {}", e);
            false
        }
    }
}

fn write_model<W: Write>(model: &FactorModel, writer: &mut W) -> std::io::Result<()> {
    for dim in [model.num_users, model.num_items, model.num_factors] {
        writer.write_all(&dimension(dim)?.to_le_bytes())?;
    }
    write_floats(writer, model.user_features.iter())?;
    write_floats(writer, model.item_features.iter())?;

    if model.formulation == Formulation::Biased {
        writer.write_all(&model.global_mean.to_le_bytes())?;
        write_floats(writer, model.user_bias.iter())?;
        write_floats(writer, model.item_bias.iter())?;
    }
    Ok(())
}

fn write_floats<'a, W: Write>(
    writer: &mut W,
    values: impl Iterator<Item = &'a f32>,
) -> std::io::Result<()> {
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn dimension(value: usize) -> std::io::Result<i32> {
    i32::try_from(value).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("dimension {} does not fit the model header", value),
        )
    })
}

pub fn load_model(path: &Path) -> Result<FactorModel> {
    let bytes = std::fs::read(path).map_err(|e| MfError::io(path, e))?;
    decode_model(&bytes)
}

fn decode_model(bytes: &[u8]) -> Result<FactorModel> {
    let mut reader = SectionReader::new(bytes);
    let num_users = reader.read_i32("header")?;
    let num_items = reader.read_i32("header")?;
    let num_factors = reader.read_i32("header")?;
    let (num_users, num_items, num_factors) = validate_model_header(num_users, num_items, num_factors)?;

    let user_features = reader.read_floats("user features", num_users * num_factors)?;
    let item_features = reader.read_floats("item features", num_items * num_factors)?;

    let mut model = FactorModel::new(
        num_users,
        num_items,
        num_factors,
        DEFAULT_LEARNING_RATE,
        DEFAULT_REGULARIZATION,
    );
    model.user_features = into_matrix(user_features, num_users, num_factors)?;
    model.item_features = into_matrix(item_features, num_items, num_factors)?;

    let trailer_len = (1 + num_users + num_items) * SCALAR_BYTES;
    match reader.remaining() {
        0 => {}
        n if n == trailer_len => {
            model.global_mean = reader.read_f32("global mean")?;
            model.user_bias = Array1::from(reader.read_floats("user bias", num_users)?);
            model.item_bias = Array1::from(reader.read_floats("item bias", num_items)?);
            model.formulation = Formulation::Biased;
        }
        n => {
            return Err(MfError::CorruptModel(format!(
                "{} unexpected bytes after item features (bias trailer is {} bytes)",
                n, trailer_len
            )));
        }
    }

    Ok(model)
}

fn into_matrix(values: Vec<f32>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| MfError::CorruptModel(format!("feature table shape: {}", e)))
}

pub fn save_item_mapping(reverse_item_ids: &[u32], path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| MfError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let write = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
        writer.write_all(&dimension(reverse_item_ids.len())?.to_le_bytes())?;
        for &id in reverse_item_ids {
            let id = i32::try_from(id).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("item id {} does not fit the mapping format", id),
                )
            })?;
            writer.write_all(&id.to_le_bytes())?;
        }
        writer.flush()
    };
    write(&mut writer).map_err(|e| MfError::io(path, e))
}

pub fn save_item_mapping_logged(reverse_item_ids: &[u32], path: &Path) -> bool {
    match save_item_mapping(reverse_item_ids, path) {
        Ok(()) => {
            info!("Item id mapping saved to {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to save item id mapping: {}", e);
            false
        }
    }
}

pub fn load_item_mapping(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| MfError::io(path, e))?;
    let mut reader = SectionReader::new(&bytes);
    let count = reader.read_i32("mapping header")?;
    let count = usize::try_from(count)
        .map_err(|_| MfError::CorruptModel(format!("negative mapping count {}", count)))?;

    let mut ids = Vec::with_capacity(count);
    for chunk in reader.take("item ids", count * SCALAR_BYTES)?.chunks_exact(SCALAR_BYTES) {
        let id = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let id = u32::try_from(id)
            .map_err(|_| MfError::CorruptModel(format!("negative item id {}", id)))?;
        ids.push(id);
    }
    Ok(ids)
}

/// Cursor that reports short reads per named section.
struct SectionReader<'a> {
    bytes: &'a [u8],
}

impl<'a> SectionReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self, section: &'static str, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(MfError::TruncatedModel {
                section,
                expected: len,
                actual: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn read_i32(&mut self, section: &'static str) -> Result<i32> {
        let b = self.take(section, SCALAR_BYTES)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self, section: &'static str) -> Result<f32> {
        let b = self.take(section, SCALAR_BYTES)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_floats(&mut self, section: &'static str, count: usize) -> Result<Vec<f32>> {
        let bytes = self.take(section, count * SCALAR_BYTES)?;
        Ok(bytes
            .chunks_exact(SCALAR_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
