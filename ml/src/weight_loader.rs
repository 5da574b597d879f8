//! Loading of pretrained network weights.
//!
//! Two formats are supported: npz archives (as exported from a pytorch
//! state dict via numpy) and a JSON dict of (name, flattened array) pairs.
//! Both are strict about shapes: a stored parameter that does not match the
//! requested shape is an error, never a silent reinterpretation.

use crate::WeightPrecision;
use ndarray::{Array, ArrayD, Dimension, StrideShape};
use ndarray_npy::{NpzReader, ReadNpzError};
use serde_json::{Map, Value};
use std::io::{Cursor, Read, Seek};
use std::{fs, path::Path};
use thiserror::Error;

pub type WeightResult<T> = Result<T, WeightError>;

#[derive(Error, Debug)]
pub enum WeightError {
    #[error("No weights with name {0} found")]
    MissingParameter(String),
    #[error("Weight {name} has shape {found:?}, the model expects {expected:?}")]
    WrongShape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Weight file didn't have the correct format (required: JSON dict of pairs (key, flattened array of weights))")]
    Format,
    #[error("Weight file not found. Filesystem reported error\n {0}.")]
    FileNotFound(#[from] std::io::Error),
    #[error("Weight file not readable. Filesystem reported error\n {0}.")]
    Npz(#[from] ReadNpzError),
}

pub trait WeightLoader {
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>;
}

fn check_shape<D: Dimension>(
    param_name: &str,
    expected: &[usize],
    arr: ArrayD<WeightPrecision>,
) -> WeightResult<Array<WeightPrecision, D>> {
    if arr.shape() != expected {
        return Err(WeightError::WrongShape {
            name: param_name.to_string(),
            expected: expected.to_vec(),
            found: arr.shape().to_vec(),
        });
    }
    // ndim matches after the shape check, so this cannot fail
    arr.into_dimensionality::<D>()
        .map_err(|_| WeightError::Format)
}

pub struct NpzWeightLoader<R>
where
    R: Seek + Read,
{
    handle: R,
}

impl NpzWeightLoader<std::fs::File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> WeightResult<NpzWeightLoader<std::fs::File>> {
        let handle = std::fs::File::open(path)?;
        Ok(NpzWeightLoader { handle })
    }
}

impl NpzWeightLoader<Cursor<&[u8]>> {
    pub fn from_buffer(bytes: &[u8]) -> NpzWeightLoader<Cursor<&[u8]>> {
        NpzWeightLoader {
            handle: Cursor::new(bytes),
        }
    }
}

impl<R> WeightLoader for NpzWeightLoader<R>
where
    R: Seek + Read,
{
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>,
    {
        // The npz reader consumes a mutable handle, so we recreate it per
        // lookup instead of making every loader user deal with a RefCell.
        let mut reader = NpzReader::new(&mut self.handle)?;
        let arr: ArrayD<WeightPrecision> = reader.by_name(param_name)?;

        let expected: Vec<usize> = shape.into().raw_dim().slice().to_vec();
        check_shape(param_name, &expected, arr)
    }
}

pub struct JsonWeightLoader {
    content: Map<String, Value>,
}

impl JsonWeightLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> WeightResult<JsonWeightLoader> {
        let raw_file = fs::read_to_string(path)?;
        let parsed: Value = serde_json::from_str(&raw_file).map_err(|_| WeightError::Format)?;
        let content = parsed.as_object().ok_or(WeightError::Format)?.clone();
        Ok(JsonWeightLoader { content })
    }
}

impl WeightLoader for JsonWeightLoader {
    /// Weights are stored FLATTENED in the JSON file (all arrays have the
    /// same nesting depth that way) and reshaped here.
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>,
    {
        let raw_values = match self.content.get(param_name) {
            Some(Value::Array(v)) => v,
            Some(_) => return Err(WeightError::Format),
            None => return Err(WeightError::MissingParameter(param_name.to_string())),
        };

        let flat: Result<Vec<WeightPrecision>, WeightError> = raw_values
            .iter()
            .map(|j| j.as_f64().map(|v| v as f32).ok_or(WeightError::Format))
            .collect();
        let flat = flat?;

        let strides = shape.into();
        let expected: Vec<usize> = strides.raw_dim().slice().to_vec();
        if flat.len() != expected.iter().product::<usize>() {
            return Err(WeightError::WrongShape {
                name: param_name.to_string(),
                expected,
                found: vec![flat.len()],
            });
        }

        Array::from_shape_vec(strides, flat).map_err(|_| WeightError::Format)
    }
}
