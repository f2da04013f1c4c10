//! Host-side parameter tensors exchanged with the training backend.

use crate::LoraError;
use std::collections::BTreeMap;

/// Named parameters, ordered by name.
pub type StateDict = BTreeMap<String, ParamTensor>;

/// A dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl ParamTensor {
    /// Create a tensor, checking that `data` matches `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, LoraError> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(LoraError::ShapeMismatch(format!(
                "shape {shape:?} holds {numel} elements but {} were given",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A zero-filled tensor.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; numel],
        }
    }

    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}
