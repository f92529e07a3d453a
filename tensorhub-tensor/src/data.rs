use itertools::Itertools;
use tensorhub_dtype::PType;
use tensorhub_error::{HubResult, hub_bail};

use crate::NdArray;

/// Values read from or written to a tensor.
///
/// A selection spanning several samples is dense when every sample has the same shape and
/// ragged otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorData {
    /// A single dense array
    Dense(NdArray),
    /// One array per sample, in sample order
    Ragged(Vec<NdArray>),
}

impl TensorData {
    /// Element type, or `None` for an empty ragged list
    pub fn ptype(&self) -> Option<PType> {
        match self {
            TensorData::Dense(array) => Some(array.ptype()),
            TensorData::Ragged(arrays) => arrays.first().map(NdArray::ptype),
        }
    }

    /// Whether the samples differ in shape
    pub fn is_ragged(&self) -> bool {
        matches!(self, TensorData::Ragged(_))
    }

    /// The dense array, failing for ragged data.
    pub fn into_dense(self) -> HubResult<NdArray> {
        match self {
            TensorData::Dense(array) => Ok(array),
            TensorData::Ragged(arrays) => hub_bail!(
                ShapeMismatch: "samples of shapes [{}] do not form a dense array",
                arrays.iter().map(|a| format!("({})", a.shape().iter().join(", "))).join(", ")
            ),
        }
    }

    /// Borrow the dense array, if any
    pub fn as_dense(&self) -> Option<&NdArray> {
        match self {
            TensorData::Dense(array) => Some(array),
            TensorData::Ragged(_) => None,
        }
    }

    /// Split into per-sample arrays along the leading axis.
    pub fn into_samples(self) -> HubResult<Vec<NdArray>> {
        match self {
            TensorData::Dense(array) => (0..array.shape().first().copied().unwrap_or(0))
                .map(|i| array.outer(i))
                .collect(),
            TensorData::Ragged(arrays) => Ok(arrays),
        }
    }
}

impl From<NdArray> for TensorData {
    fn from(array: NdArray) -> Self {
        TensorData::Dense(array)
    }
}

impl From<Vec<NdArray>> for TensorData {
    fn from(arrays: Vec<NdArray>) -> Self {
        TensorData::Ragged(arrays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_is_not_dense() {
        let data = TensorData::from(vec![
            NdArray::zeros(PType::U8, vec![2]),
            NdArray::zeros(PType::U8, vec![3]),
        ]);
        assert!(data.is_ragged());
        assert_eq!(data.ptype(), Some(PType::U8));
        assert!(data.as_dense().is_none());
        assert!(data.into_dense().is_err());
    }

    #[test]
    fn dense_splits_into_samples() {
        let data = TensorData::from(NdArray::from_vec(vec![2, 2], vec![1u16, 2, 3, 4]).unwrap());
        let samples = data.into_samples().unwrap();
        assert_eq!(samples[1].to_vec::<u16>().unwrap(), [3, 4]);
    }
}
