use std::fmt::{Display, Formatter};

use itertools::Itertools;
use tensorhub_dtype::{NativePType, PType};
use tensorhub_error::{HubResult, hub_bail};

/// A dense, row-major n-dimensional array of little-endian elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    ptype: PType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl NdArray {
    /// Wrap raw little-endian `bytes`. Fails unless the length matches `shape`.
    pub fn try_new(ptype: PType, shape: Vec<usize>, bytes: Vec<u8>) -> HubResult<Self> {
        let expected = shape.iter().product::<usize>() * ptype.byte_width();
        if bytes.len() != expected {
            hub_bail!(
                "{} bytes cannot hold a {ptype} array of shape ({}), expected {expected}",
                bytes.len(),
                shape.iter().join(", ")
            );
        }
        Ok(Self { ptype, shape, bytes })
    }

    /// An array of zeros.
    pub fn zeros(ptype: PType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product::<usize>() * ptype.byte_width();
        Self {
            ptype,
            shape,
            bytes: vec![0; len],
        }
    }

    /// Build an array from native values in row-major order.
    pub fn from_vec<T: NativePType>(shape: Vec<usize>, values: Vec<T>) -> HubResult<Self> {
        let width = T::PTYPE.byte_width();
        let mut bytes = vec![0u8; values.len() * width];
        for (value, out) in values.into_iter().zip(bytes.chunks_exact_mut(width)) {
            value.write_le(out);
        }
        Self::try_new(T::PTYPE, shape, bytes)
    }

    /// A zero-dimensional array holding one value.
    pub fn scalar<T: NativePType>(value: T) -> Self {
        let mut bytes = vec![0u8; T::PTYPE.byte_width()];
        value.write_le(&mut bytes);
        Self {
            ptype: T::PTYPE,
            shape: Vec::new(),
            bytes,
        }
    }

    /// Element type
    pub fn ptype(&self) -> PType {
        self.ptype
    }

    /// Extent of every axis
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the array, returning its raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Copy the elements out as native values. Fails if `T` is not the element type.
    pub fn to_vec<T: NativePType>(&self) -> HubResult<Vec<T>> {
        if T::PTYPE != self.ptype {
            hub_bail!("cannot read {} elements as {}", self.ptype, T::PTYPE);
        }
        Ok(self
            .bytes
            .chunks_exact(self.ptype.byte_width())
            .map(T::read_le)
            .collect())
    }

    /// The single element of a zero-dimensional (or one element) array.
    pub fn to_scalar<T: NativePType>(&self) -> HubResult<T> {
        let values = self.to_vec::<T>()?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => hub_bail!("array of shape ({}) is not a scalar", self.shape.iter().join(", ")),
        }
    }

    /// Bytes of the `index`th slice along the first axis.
    pub fn outer_bytes(&self, index: usize) -> HubResult<&[u8]> {
        let Some(&outer) = self.shape.first() else {
            hub_bail!("cannot index into a zero-dimensional array");
        };
        if index >= outer {
            hub_bail!(OutOfBounds: index, 0, outer);
        }
        let step = self.bytes.len() / outer;
        Ok(&self.bytes[index * step..(index + 1) * step])
    }

    /// The `index`th slice along the first axis.
    pub fn outer(&self, index: usize) -> HubResult<NdArray> {
        let bytes = self.outer_bytes(index)?.to_vec();
        Ok(Self {
            ptype: self.ptype,
            shape: self.shape[1..].to_vec(),
            bytes,
        })
    }

    /// Stack equally shaped arrays along a new leading axis.
    ///
    /// `item_shape` gives the per-item shape to use when `items` is empty.
    pub fn stack(ptype: PType, item_shape: &[usize], items: Vec<NdArray>) -> HubResult<Self> {
        let mut shape = Vec::with_capacity(item_shape.len() + 1);
        shape.push(items.len());
        match items.first() {
            Some(first) => shape.extend_from_slice(first.shape()),
            None => shape.extend_from_slice(item_shape),
        }
        let mut bytes = Vec::with_capacity(items.iter().map(|a| a.bytes.len()).sum());
        for item in items {
            if item.ptype != ptype || item.shape() != &shape[1..] {
                hub_bail!(
                    ShapeMismatch: "cannot stack {item} with arrays of shape ({})",
                    shape[1..].iter().join(", ")
                );
            }
            bytes.extend_from_slice(&item.bytes);
        }
        Ok(Self { ptype, shape, bytes })
    }
}

impl Display for NdArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.ptype, self.shape.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let array = NdArray::from_vec(vec![2, 3], vec![1i32, -2, 3, -4, 5, -6]).unwrap();
        assert_eq!(array.ptype(), PType::I32);
        assert_eq!(array.len(), 6);
        assert_eq!(array.to_vec::<i32>().unwrap(), [1, -2, 3, -4, 5, -6]);
        assert!(array.to_vec::<u32>().is_err());
        assert_eq!(array.to_string(), "i32(2, 3)");
    }

    #[test]
    fn length_checked() {
        assert!(NdArray::try_new(PType::U16, vec![3], vec![0; 5]).is_err());
        assert!(NdArray::from_vec(vec![4], vec![1u8, 2, 3]).is_err());
    }

    #[test]
    fn outer_and_stack() {
        let array = NdArray::from_vec(vec![3, 2], (0u8..6).collect()).unwrap();
        let rows = (0..3).map(|i| array.outer(i).unwrap()).collect::<Vec<_>>();
        assert_eq!(rows[1].to_vec::<u8>().unwrap(), [2, 3]);
        assert_eq!(NdArray::stack(PType::U8, &[2], rows).unwrap(), array);
        assert!(array.outer(3).is_err());

        let empty = NdArray::stack(PType::U8, &[4, 4], Vec::new()).unwrap();
        assert_eq!(empty.shape(), [0, 4, 4]);
    }

    #[test]
    fn stack_rejects_mixed_shapes() {
        let a = NdArray::zeros(PType::U8, vec![2]);
        let b = NdArray::zeros(PType::U8, vec![3]);
        assert!(NdArray::stack(PType::U8, &[2], vec![a, b]).is_err());
    }

    #[test]
    fn scalars() {
        let label = NdArray::scalar(7i64);
        assert_eq!(label.ndim(), 0);
        assert_eq!(label.to_scalar::<i64>().unwrap(), 7);
    }
}
