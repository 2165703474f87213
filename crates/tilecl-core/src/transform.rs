//! Reinterpretations of a global memory reference that don't move any data.
//!
//! Transforms are applied to the global side of an async copy so that the tensor descriptor
//! sees the layout the shared memory side expects, e.g. a tiled layout for swizzled matrix
//! operands. The three operations of a [Transform] are consistent with each other: indexing
//! `apply(memref)` with `transform_index(index)` addresses the same element as indexing
//! `memref` with `index`.

use core::fmt::Display;

use serde::{Deserialize, Serialize};
use tilecl_ir::{check_permutation, MemRef, Scope, Variable};

use crate::error::{ContractViolation, KernelError};

/// A composable view transform over memory references.
pub trait Transform {
    /// Reinterprets the reference.
    fn apply(&self, memref: &MemRef) -> Result<MemRef, KernelError>;

    /// Maps the base index of a slice into the index space of the transformed reference.
    fn transform_index(
        &self,
        scope: &mut Scope,
        index: &[Variable],
    ) -> Result<Vec<Variable>, KernelError>;

    /// Maps the shape of a slice into the shape it has in the transformed reference.
    fn transform_shape(&self, shape: &[usize]) -> Result<Vec<usize>, KernelError>;
}

/// Tiles a suffix of the dimensions.
///
/// For a reference of shape `(5, 128, 128)` and a tiling of `(64, 32)`, the transformed shape
/// is `(5, 2, 4, 64, 32)`: the tiled dimensions are divided by the tile size and the tile shape
/// is appended at the end.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileTransform {
    pub tiling: Vec<usize>,
}

impl TileTransform {
    fn split<'a, T>(&self, values: &'a [T]) -> Result<(&'a [T], &'a [T]), KernelError> {
        if values.len() < self.tiling.len() {
            return Err(ContractViolation::RankMismatch {
                expected: self.tiling.len(),
                actual: values.len(),
            }
            .into());
        }

        Ok(values.split_at(values.len() - self.tiling.len()))
    }
}

impl Transform for TileTransform {
    fn apply(&self, memref: &MemRef) -> Result<MemRef, KernelError> {
        let untiled_rank = memref.rank();
        let tiling_rank = self.tiling.len();
        self.transform_shape(memref.shape())?;

        let mut tiled = memref.clone();
        for (tile, dim) in self.tiling.iter().rev().zip((0..untiled_rank).rev()) {
            tiled = tiled.unfold(dim, *tile)?;
        }

        let tiled_rank = untiled_rank + tiling_rank;
        let first_tiled = untiled_rank - tiling_rank;
        let permutation = (0..first_tiled)
            .chain((first_tiled..tiled_rank).step_by(2))
            .chain((first_tiled + 1..tiled_rank).step_by(2))
            .collect::<Vec<_>>();

        Ok(tiled.transpose(&permutation)?)
    }

    fn transform_index(
        &self,
        scope: &mut Scope,
        index: &[Variable],
    ) -> Result<Vec<Variable>, KernelError> {
        let (prefix, tiled) = self.split(index)?;

        let mut output = prefix.to_vec();
        for (idx, tile) in tiled.iter().zip(self.tiling.iter()) {
            output.push(scope.div(*idx, Variable::index(*tile)));
        }
        output.extend(self.tiling.iter().map(|_| Variable::index(0)));

        Ok(output)
    }

    fn transform_shape(&self, shape: &[usize]) -> Result<Vec<usize>, KernelError> {
        let (prefix, tiled) = self.split(shape)?;

        // A squeezed tiled dimension has a size of 1 and is rejected here as well.
        let divisible = tiled
            .iter()
            .zip(self.tiling.iter())
            .all(|(size, tile)| *tile != 0 && size % tile == 0);
        if !divisible {
            return Err(ContractViolation::IndivisibleTiling {
                shape: shape.to_vec(),
                tiling: self.tiling.clone(),
            }
            .into());
        }

        Ok(prefix
            .iter()
            .copied()
            .chain(tiled.iter().zip(self.tiling.iter()).map(|(s, t)| s / t))
            .chain(self.tiling.iter().copied())
            .collect())
    }
}

/// Permutes the dimensions, dimension `i` of the result is dimension `permutation[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransposeTransform {
    permutation: Vec<usize>,
}

impl TransposeTransform {
    pub fn new(permutation: Vec<usize>) -> Result<Self, KernelError> {
        check_permutation(&permutation, permutation.len())?;
        Ok(Self { permutation })
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// The transform undoing this one.
    pub fn inverse(&self) -> Self {
        let mut inverse = vec![0; self.permutation.len()];
        for (i, p) in self.permutation.iter().enumerate() {
            inverse[*p] = i;
        }
        Self {
            permutation: inverse,
        }
    }

    fn permute<T: Copy>(&self, values: &[T]) -> Result<Vec<T>, KernelError> {
        if values.len() != self.permutation.len() {
            return Err(ContractViolation::RankMismatch {
                expected: self.permutation.len(),
                actual: values.len(),
            }
            .into());
        }

        Ok(self.permutation.iter().map(|p| values[*p]).collect())
    }
}

impl Transform for TransposeTransform {
    fn apply(&self, memref: &MemRef) -> Result<MemRef, KernelError> {
        Ok(memref.transpose(&self.permutation)?)
    }

    fn transform_index(
        &self,
        _scope: &mut Scope,
        index: &[Variable],
    ) -> Result<Vec<Variable>, KernelError> {
        self.permute(index)
    }

    fn transform_shape(&self, shape: &[usize]) -> Result<Vec<usize>, KernelError> {
        self.permute(shape)
    }
}

/// Closed set of transforms, usable as part of a tensor descriptor cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemRefTransform {
    Tile(TileTransform),
    Transpose(TransposeTransform),
}

impl Transform for MemRefTransform {
    fn apply(&self, memref: &MemRef) -> Result<MemRef, KernelError> {
        match self {
            MemRefTransform::Tile(transform) => transform.apply(memref),
            MemRefTransform::Transpose(transform) => transform.apply(memref),
        }
    }

    fn transform_index(
        &self,
        scope: &mut Scope,
        index: &[Variable],
    ) -> Result<Vec<Variable>, KernelError> {
        match self {
            MemRefTransform::Tile(transform) => transform.transform_index(scope, index),
            MemRefTransform::Transpose(transform) => transform.transform_index(scope, index),
        }
    }

    fn transform_shape(&self, shape: &[usize]) -> Result<Vec<usize>, KernelError> {
        match self {
            MemRefTransform::Tile(transform) => transform.transform_shape(shape),
            MemRefTransform::Transpose(transform) => transform.transform_shape(shape),
        }
    }
}

impl From<TileTransform> for MemRefTransform {
    fn from(value: TileTransform) -> Self {
        MemRefTransform::Tile(value)
    }
}

impl From<TransposeTransform> for MemRefTransform {
    fn from(value: TransposeTransform) -> Self {
        MemRefTransform::Transpose(value)
    }
}

impl Display for MemRefTransform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MemRefTransform::Tile(transform) => write!(f, "tile{:?}", transform.tiling),
            MemRefTransform::Transpose(transform) => {
                write!(f, "transpose{:?}", transform.permutation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{Elem, FloatKind};

    const F16: Elem = Elem::Float(FloatKind::F16);

    #[test]
    fn tile_shape() {
        let transform = TileTransform::new(vec![64, 32]);

        assert_eq!(
            transform.transform_shape(&[5, 128, 128]).unwrap(),
            vec![5, 2, 4, 64, 32]
        );
        assert_eq!(
            transform.transform_shape(&[5, 130, 130]),
            Err(ContractViolation::IndivisibleTiling {
                shape: vec![5, 130, 130],
                tiling: vec![64, 32],
            }
            .into())
        );
    }

    #[test]
    fn tile_apply_matches_shape() {
        let memref = MemRef::argument(0, F16, vec![5, 128, 128]);
        let transform = TileTransform::new(vec![64, 32]);
        let tiled = transform.apply(&memref).unwrap();

        assert_eq!(tiled.shape(), &[5, 2, 4, 64, 32]);
        assert_eq!(tiled.strides(), &[16384, 8192, 32, 128, 1]);
    }

    #[test]
    fn tile_apply_rejects_indivisible_reference() {
        let memref = MemRef::argument(0, F16, vec![5, 130, 130]);
        let transform = TileTransform::new(vec![64, 32]);

        assert!(matches!(
            transform.apply(&memref),
            Err(KernelError::Contract(ContractViolation::IndivisibleTiling { .. }))
        ));
    }

    #[test]
    fn tile_addresses_same_elements() {
        let memref = MemRef::argument(0, F16, vec![3, 8, 12]);
        let transform = TileTransform::new(vec![4, 6]);
        let tiled = transform.apply(&memref).unwrap();
        let mut scope = Scope::root();

        for a in 0..3 {
            for b in 0..8 {
                for c in 0..12 {
                    let index = [a, b, c].map(Variable::index);
                    let base = transform
                        .transform_index(&mut scope, &index)
                        .unwrap()
                        .iter()
                        .map(|v| v.as_usize().unwrap())
                        .collect::<Vec<_>>();
                    assert_eq!(base, vec![a, b / 4, c / 6, 0, 0]);

                    let within = [a, b / 4, c / 6, b % 4, c % 6];
                    assert_eq!(
                        tiled.element_offset(&within),
                        memref.element_offset(&[a, b, c])
                    );
                }
            }
        }
        // Constant indices are folded.
        assert!(scope.instructions.is_empty());
    }

    #[test]
    fn tile_dynamic_index_emits_division() {
        let mut scope = Scope::root();
        let tid = scope.thread_idx();
        let transform = TileTransform::new(vec![64]);

        let index = transform
            .transform_index(&mut scope, &[Variable::index(2), tid])
            .unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index[0].as_usize(), Some(2));
        assert_eq!(index[2].as_usize(), Some(0));
        assert_eq!(scope.to_string(), "%0: u32 = thread_idx.x / 64u32\n");
    }

    #[test]
    fn transpose_rejects_non_permutation() {
        assert!(matches!(
            TransposeTransform::new(vec![0, 0]),
            Err(KernelError::Contract(ContractViolation::MemRef(_)))
        ));
        assert!(TransposeTransform::new(vec![0, 2]).is_err());
    }

    #[test]
    fn transpose_round_trip() {
        let memref = MemRef::argument(1, F16, vec![2, 3, 4]);
        let transform = TransposeTransform::new(vec![1, 2, 0]).unwrap();

        let transposed = transform.apply(&memref).unwrap();
        assert_eq!(transposed.shape(), &[3, 4, 2]);
        assert_eq!(
            transform.transform_shape(memref.shape()).unwrap(),
            transposed.shape()
        );

        let restored = transform.inverse().apply(&transposed).unwrap();
        assert_eq!(restored.shape(), memref.shape());
        assert_eq!(restored.strides(), memref.strides());
    }

    #[test]
    fn composed_transforms_are_sequential() {
        let memref = MemRef::argument(0, F16, vec![128, 64]);
        let transforms: [MemRefTransform; 2] = [
            TileTransform::new(vec![64, 64]).into(),
            TransposeTransform::new(vec![1, 0, 2, 3]).unwrap().into(),
        ];

        let mut shape = memref.shape().to_vec();
        let mut view = memref.clone();
        for transform in transforms.iter() {
            shape = transform.transform_shape(&shape).unwrap();
            view = transform.apply(&view).unwrap();
        }

        assert_eq!(shape, vec![1, 2, 64, 64]);
        assert_eq!(view.shape(), shape.as_slice());
        assert_eq!(transforms[0].to_string(), "tile[64, 64]");
    }
}
