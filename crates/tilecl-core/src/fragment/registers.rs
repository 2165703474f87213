use tilecl_ir::{Item, Variable};

use crate::error::{ContractViolation, KernelError};

/// A dense row-major array of registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registers {
    shape: Vec<usize>,
    values: Vec<Variable>,
}

impl Registers {
    /// Wraps `values` laid out row-major in `shape`.
    ///
    /// The array must not be empty and every register must have the same type.
    pub fn new(shape: Vec<usize>, values: Vec<Variable>) -> Result<Self, KernelError> {
        if values.len() != shape.iter().product::<usize>() {
            return Err(ContractViolation::ShapeMismatch {
                expected: shape,
                actual: vec![values.len()],
            }
            .into());
        }
        let Some(first) = values.first() else {
            return Err(ContractViolation::EmptyFragment.into());
        };
        if let Some(other) = values.iter().find(|value| value.item != first.item) {
            return Err(ContractViolation::ElemMismatch {
                lhs: first.elem(),
                rhs: other.elem(),
            }
            .into());
        }

        Ok(Self { shape, values })
    }

    /// An array where every register is `value`.
    pub fn full(shape: Vec<usize>, value: Variable) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            values: vec![value; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Type shared by every register, arrays built by fragmented arrays are never empty.
    pub fn item(&self) -> Item {
        self.values
            .first()
            .map(|value| value.item)
            .unwrap_or(Item::new(tilecl_ir::Elem::INDEX))
    }

    pub fn get(&self, index: &[usize]) -> Variable {
        self.values[self.flat_index(index)]
    }

    pub fn set(&mut self, index: &[usize], value: Variable) {
        let flat = self.flat_index(index);
        self.values[flat] = value;
    }

    /// Registers in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.values.iter()
    }

    /// Registers in row-major order along with their multi-dimensional index.
    pub fn indexed(&self) -> impl Iterator<Item = (Vec<usize>, Variable)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(flat, value)| (self.unflatten(flat), *value))
    }

    /// Applies `func` to every register, keeping the shape.
    pub fn try_map(
        &self,
        mut func: impl FnMut(&[usize], Variable) -> Result<Variable, KernelError>,
    ) -> Result<Self, KernelError> {
        let values = self
            .indexed()
            .map(|(index, value)| func(&index, value))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            shape: self.shape.clone(),
            values,
        })
    }

    /// Copies the registers in the boxes `start[d]..start[d] + shape[d]`.
    pub(crate) fn sub_array(&self, start: &[usize], shape: Vec<usize>) -> Self {
        let values = ndindex(&shape)
            .map(|index| {
                let source = index
                    .iter()
                    .zip(start.iter())
                    .map(|(i, s)| i + s)
                    .collect::<Vec<_>>();
                self.get(&source)
            })
            .collect();

        Self { shape, values }
    }

    fn flat_index(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(self.shape.iter())
            .fold(0, |flat, (i, size)| flat * size + i)
    }

    fn unflatten(&self, mut flat: usize) -> Vec<usize> {
        let mut index = vec![0; self.shape.len()];
        for (dim, size) in self.shape.iter().enumerate().rev() {
            index[dim] = flat % size;
            flat /= size;
        }
        index
    }
}

/// Every index of `shape` in row-major order.
pub(crate) fn ndindex(shape: &[usize]) -> impl Iterator<Item = Vec<usize>> + '_ {
    let len = shape.iter().product::<usize>();
    (0..len).map(move |mut flat| {
        let mut index = vec![0; shape.len()];
        for (dim, size) in shape.iter().enumerate().rev() {
            index[dim] = flat % size;
            flat /= size;
        }
        index
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{Elem, FloatKind};

    fn constants(n: usize) -> Vec<Variable> {
        (0..n).map(Variable::index).collect()
    }

    #[test]
    fn indexing_is_row_major() {
        let registers = Registers::new(vec![2, 3], constants(6)).unwrap();

        assert_eq!(registers.get(&[1, 0]).as_usize(), Some(3));
        assert_eq!(registers.get(&[1, 2]).as_usize(), Some(5));
        let indices = registers.indexed().map(|(i, _)| i).collect::<Vec<_>>();
        assert_eq!(indices[4], vec![1, 1]);
    }

    #[test]
    fn sub_array_copies_box() {
        let registers = Registers::new(vec![3, 4], constants(12)).unwrap();

        let sub = registers.sub_array(&[1, 2], vec![2, 2]);

        let values = sub.iter().map(|v| v.as_usize().unwrap()).collect::<Vec<_>>();
        assert_eq!(values, vec![6, 7, 10, 11]);
    }

    #[test]
    fn mixed_types_are_rejected() {
        let mut values = constants(2);
        values.push(Elem::Float(FloatKind::F32).constant_from_f64(1.0));

        assert!(matches!(
            Registers::new(vec![3], values),
            Err(KernelError::Contract(ContractViolation::ElemMismatch { .. }))
        ));
        assert_eq!(
            Registers::new(vec![0], Vec::new()),
            Err(ContractViolation::EmptyFragment.into())
        );
    }
}
