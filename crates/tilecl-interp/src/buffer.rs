use bytemuck::Pod;
use tilecl_ir::Elem;

use crate::{error::InterpError, value::Scalar};

/// A tensor living in host memory, handed to or returned by a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    pub elem: Elem,
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

impl HostBuffer {
    /// Wraps the raw content of a tensor, `T` must match the memory representation of `elem`.
    pub fn new<T: Pod>(elem: Elem, shape: Vec<usize>, data: &[T]) -> Result<Self, InterpError> {
        let bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
        let elems = shape.iter().product::<usize>();
        if bytes.len() != elems * elem.size() {
            return Err(InterpError::BufferSize {
                bytes: bytes.len(),
                elems,
                elem,
            });
        }

        Ok(Self { elem, shape, bytes })
    }

    /// A tensor filled with zeros.
    pub fn zeros(elem: Elem, shape: Vec<usize>) -> Self {
        let bytes = vec![0; shape.iter().product::<usize>() * elem.size()];
        Self { elem, shape, bytes }
    }

    /// Converts every element of `values` to `elem`.
    pub fn from_f64(elem: Elem, shape: Vec<usize>, values: &[f64]) -> Result<Self, InterpError> {
        let elems = shape.iter().product::<usize>();
        if values.len() != elems {
            return Err(InterpError::BufferSize {
                bytes: values.len() * elem.size(),
                elems,
                elem,
            });
        }
        let mut buffer = Self::zeros(elem, shape);
        for (value, chunk) in values.iter().zip(buffer.bytes.chunks_mut(elem.size())) {
            Scalar::Float(*value).write_bytes(elem, chunk);
        }

        Ok(buffer)
    }

    pub fn num_elems(&self) -> usize {
        self.shape.iter().product()
    }

    /// Reinterprets the content as `T`.
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.bytes)
    }

    /// Every element converted to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        self.bytes
            .chunks(self.elem.size())
            .map(|chunk| Scalar::read_bytes(self.elem, chunk).as_f64())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;
    use pretty_assertions::assert_eq;
    use tilecl_ir::FloatKind;

    #[test]
    fn typed_round_trip() {
        let data = [1.5f32, -2.0, 3.25, 0.0];
        let buffer = HostBuffer::new(Elem::Float(FloatKind::F32), vec![2, 2], &data).unwrap();

        assert_eq!(buffer.to_vec::<f32>(), data.to_vec());
        assert_eq!(buffer.to_f64(), vec![1.5, -2.0, 3.25, 0.0]);
    }

    #[test]
    fn size_is_checked() {
        let data = [f16::ONE; 3];

        assert_eq!(
            HostBuffer::new(Elem::Float(FloatKind::F16), vec![4], &data),
            Err(InterpError::BufferSize {
                bytes: 6,
                elems: 4,
                elem: Elem::Float(FloatKind::F16)
            })
        );
    }
}
