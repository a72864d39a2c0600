//! Dense n-dimensional arrays for checkpoint parameters
//!
//! A `DenseArray` is a shape plus contiguous row-major `f32` values. It is the
//! only tensor type the converter works with; libtorch is used at the edges
//! (loading, reference checks) but never inside the conversion itself.
//!
//! JSON encoding follows the nested-list layout of numpy's `tolist()`: a 1-D
//! array is a flat list, a 2-D array a list of rows, and so on.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Errors raised when building or decoding a dense array
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArrayError {
    #[error("shape {shape:?} holds {expected} values, got {actual}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("transpose needs a 2-D array, got shape {0:?}")]
    NotAMatrix(Vec<usize>),

    #[error("ragged nested array at depth {depth}: expected {expected} items, got {actual}")]
    Ragged {
        depth: usize,
        expected: usize,
        actual: usize,
    },

    #[error("unexpected JSON value at depth {depth}: {found}")]
    UnexpectedValue { depth: usize, found: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl DenseArray {
    /// Build an array, checking that `values` fills `shape` exactly
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, ArrayError> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(ArrayError::LengthMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// 1-D array over `values`
    pub fn vector(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }

    /// Row `index` of a 2-D array
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        match self.shape.as_slice() {
            [rows, cols] if index < *rows => Some(&self.values[index * cols..(index + 1) * cols]),
            _ => None,
        }
    }

    /// Swap the two axes of a 2-D array. Values are moved, never recomputed.
    pub fn transpose(&self) -> Result<Self, ArrayError> {
        let (rows, cols) = match self.shape.as_slice() {
            [rows, cols] => (*rows, *cols),
            _ => return Err(ArrayError::NotAMatrix(self.shape.clone())),
        };

        let mut values = Vec::with_capacity(self.values.len());
        for c in 0..cols {
            for r in 0..rows {
                values.push(self.values[r * cols + c]);
            }
        }

        Ok(Self {
            shape: vec![cols, rows],
            values,
        })
    }

    /// Decode a nested JSON list, inferring the shape from the nesting.
    ///
    /// The shape is read off the first element at every depth; every other
    /// element must then agree with it, so ragged input is rejected.
    pub fn from_json_value(value: &Value) -> Result<Self, ArrayError> {
        let mut shape = Vec::new();
        let mut cursor = value;
        while let Value::Array(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }

        let mut values = Vec::with_capacity(shape.iter().product());
        collect_values(value, &shape, 0, &mut values)?;
        Self::new(shape, values)
    }
}

fn collect_values(
    value: &Value,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f32>,
) -> Result<(), ArrayError> {
    match (value, shape.get(depth)) {
        (Value::Array(items), Some(&expected)) => {
            if items.len() != expected {
                return Err(ArrayError::Ragged {
                    depth,
                    expected,
                    actual: items.len(),
                });
            }
            for item in items {
                collect_values(item, shape, depth + 1, out)?;
            }
            Ok(())
        }
        (Value::Number(number), None) => match number.as_f64() {
            Some(v) => {
                out.push(v as f32);
                Ok(())
            }
            None => Err(ArrayError::UnexpectedValue {
                depth,
                found: number.to_string(),
            }),
        },
        (other, _) => Err(ArrayError::UnexpectedValue {
            depth,
            found: other.to_string(),
        }),
    }
}

/// Borrowed view used to emit one nesting level at a time
struct Nested<'a> {
    shape: &'a [usize],
    values: &'a [f32],
}

impl Serialize for Nested<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.shape.split_first() {
            None => self.values.first().copied().unwrap_or_default().serialize(serializer),
            Some((&len, rest)) => {
                let stride: usize = rest.iter().product();
                let mut seq = serializer.serialize_seq(Some(len))?;
                for i in 0..len {
                    seq.serialize_element(&Nested {
                        shape: rest,
                        values: &self.values[i * stride..(i + 1) * stride],
                    })?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for DenseArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Nested {
            shape: &self.shape,
            values: &self.values,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DenseArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = DenseArray::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            ArrayError::LengthMismatch {
                shape: vec![2, 3],
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn test_transpose_swaps_axes() {
        // [[1, 2, 3],
        //  [4, 5, 6]]
        let a = DenseArray::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = a.transpose().unwrap();

        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.values(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.row(1), Some(&[2.0, 5.0][..]));
        assert_eq!(t.transpose().unwrap(), a);
    }

    #[test]
    fn test_transpose_rejects_vectors() {
        let v = DenseArray::vector(vec![1.0, 2.0]);
        assert_eq!(v.transpose().unwrap_err(), ArrayError::NotAMatrix(vec![2]));
    }

    #[test]
    fn test_serializes_as_nested_lists() {
        let a = DenseArray::new(vec![2, 2], vec![0.5, -1.0, 2.0, 0.25]).unwrap();
        assert_eq!(serde_json::to_value(&a).unwrap(), json!([[0.5, -1.0], [2.0, 0.25]]));

        let v = DenseArray::vector(vec![1.5, 2.5]);
        assert_eq!(serde_json::to_value(&v).unwrap(), json!([1.5, 2.5]));
    }

    #[test]
    fn test_decodes_shape_from_nesting() {
        let a = DenseArray::from_json_value(&json!([[[1.0, 2.0]], [[3.0, 4.0]]])).unwrap();
        assert_eq!(a.shape(), &[2, 1, 2]);
        assert_eq!(a.values(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_decode_rejects_ragged_rows() {
        let err = DenseArray::from_json_value(&json!([[1.0, 2.0], [3.0]])).unwrap_err();
        assert_eq!(
            err,
            ArrayError::Ragged {
                depth: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_decode_rejects_non_numbers() {
        let err = DenseArray::from_json_value(&json!([1.0, "x"])).unwrap_err();
        assert!(matches!(err, ArrayError::UnexpectedValue { depth: 1, .. }));
    }

    #[test]
    fn test_json_preserves_f32_bits() {
        let values = vec![0.1f32, -3.4028235e38, 1.0e-30, 0.333_333_34, 7.0];
        let a = DenseArray::new(vec![5], values.clone()).unwrap();
        let text = serde_json::to_string(&a).unwrap();
        let back: DenseArray = serde_json::from_str(&text).unwrap();

        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(back.values()), bits(&values));
    }
}
