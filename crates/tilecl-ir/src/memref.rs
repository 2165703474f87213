use core::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Elem, Id};

/// Address space a [memory reference](MemRef) lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    /// Device global memory, visible to every block.
    Global,
    /// Shared memory, private to one block.
    Shared,
}

/// Root storage of a memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Buffer {
    /// Kernel argument at the given position of the buffer pointer array.
    Argument(Id),
    /// The global scratch buffer holding host-initialized data.
    Scratch,
    /// Dynamic shared memory, starting at the given byte offset.
    Shared { offset: usize },
}

impl Buffer {
    pub fn memory_space(&self) -> MemorySpace {
        match self {
            Buffer::Argument(_) | Buffer::Scratch => MemorySpace::Global,
            Buffer::Shared { .. } => MemorySpace::Shared,
        }
    }
}

/// Errors raised by view operations on a [memory reference](MemRef).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemRefError {
    /// A dimension argument doesn't exist in the reference.
    #[error("Dimension {dim} is out of range for a reference of rank {rank}")]
    DimOutOfRange {
        /// The requested dimension.
        dim: usize,
        /// The rank of the reference.
        rank: usize,
    },
    /// A dimension can't be split evenly.
    #[error("Dimension {dim} of size {size} is not divisible by {tile}")]
    IndivisibleDim {
        /// The split dimension.
        dim: usize,
        /// Its extent.
        size: usize,
        /// The requested tile size.
        tile: usize,
    },
    /// The permutation isn't a bijection over the dimensions.
    #[error("Expected a permutation of 0..{rank}, got {permutation:?}")]
    InvalidPermutation {
        /// The rejected permutation.
        permutation: Vec<usize>,
        /// The rank of the reference.
        rank: usize,
    },
    /// The folded dimensions are not contiguous with each other.
    #[error("Dimensions {start}..{end} of shape {shape:?} with strides {strides:?} can't be folded")]
    NonContiguousFold {
        /// First folded dimension.
        start: usize,
        /// One past the last folded dimension.
        end: usize,
        /// Shape of the reference.
        shape: Vec<usize>,
        /// Strides of the reference.
        strides: Vec<usize>,
    },
    /// A static index lands outside of the reference.
    #[error("Index {index:?} is out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        /// The index.
        index: Vec<usize>,
        /// Shape of the reference.
        shape: Vec<usize>,
    },
}

/// A typed, strided view over a [buffer](Buffer).
///
/// The root buffer and its memory space never change. View operations return a new reference
/// over the same storage and mark it as derived, so that callers can tell a kernel argument
/// apart from a view of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRef {
    pub buffer: Buffer,
    pub elem: Elem,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    derived: bool,
}

/// Canonical contiguous row-major strides for a given shape (in elements).
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut s = 1usize;
    for (i, dim) in shape.iter().enumerate().rev() {
        strides[i] = s;
        s = s.saturating_mul(*dim.max(&1));
    }
    strides
}

impl MemRef {
    /// A contiguous reference over a whole kernel argument.
    pub fn argument(id: Id, elem: Elem, shape: Vec<usize>) -> Self {
        Self::contiguous(Buffer::Argument(id), elem, shape)
    }

    /// A contiguous reference over shared memory, starting at `offset` bytes.
    pub fn shared(offset: usize, elem: Elem, shape: Vec<usize>) -> Self {
        Self::contiguous(Buffer::Shared { offset }, elem, shape)
    }

    /// A contiguous reference over the scratch buffer, starting at `offset` bytes.
    pub fn scratch(offset: usize, elem: Elem, shape: Vec<usize>) -> Self {
        let mut memref = Self::contiguous(Buffer::Scratch, elem, shape);
        memref.offset = offset / elem.size();
        memref
    }

    fn contiguous(buffer: Buffer, elem: Elem, shape: Vec<usize>) -> Self {
        Self {
            buffer,
            elem,
            strides: contiguous_strides(&shape),
            shape,
            offset: 0,
            derived: false,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides in elements.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Offset in elements from the start of the view's root storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elems(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elems() * self.elem.size()
    }

    pub fn memory_space(&self) -> MemorySpace {
        self.buffer.memory_space()
    }

    /// Whether this reference is a kernel argument taken as is, without any view applied.
    pub fn is_kernel_argument(&self) -> bool {
        matches!(self.buffer, Buffer::Argument(_)) && !self.derived
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.shape)
    }

    /// Element offset of `index` from the root storage start.
    pub fn element_offset(&self, index: &[usize]) -> Result<usize, MemRefError> {
        let in_bounds = index.len() == self.rank()
            && index.iter().zip(self.shape.iter()).all(|(i, s)| i < s);
        if !in_bounds {
            return Err(MemRefError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape.clone(),
            });
        }

        Ok(self.offset
            + index
                .iter()
                .zip(self.strides.iter())
                .map(|(i, s)| i * s)
                .sum::<usize>())
    }

    /// Splits dimension `dim` into `(size / tile, tile)`.
    pub fn unfold(&self, dim: usize, tile: usize) -> Result<Self, MemRefError> {
        self.check_dim(dim)?;
        let size = self.shape[dim];
        if tile == 0 || size % tile != 0 {
            return Err(MemRefError::IndivisibleDim { dim, size, tile });
        }
        let stride = self.strides[dim];

        let mut view = self.view();
        view.shape.splice(dim..=dim, [size / tile, tile]);
        view.strides.splice(dim..=dim, [stride * tile, stride]);
        Ok(view)
    }

    /// Reorders the dimensions, dimension `i` of the result is dimension `permutation[i]`.
    pub fn transpose(&self, permutation: &[usize]) -> Result<Self, MemRefError> {
        check_permutation(permutation, self.rank())?;

        let mut view = self.view();
        view.shape = permutation.iter().map(|p| self.shape[*p]).collect();
        view.strides = permutation.iter().map(|p| self.strides[*p]).collect();
        Ok(view)
    }

    /// Inserts a unit dimension at `dim`.
    pub fn unsqueeze(&self, dim: usize) -> Result<Self, MemRefError> {
        if dim > self.rank() {
            return Err(MemRefError::DimOutOfRange {
                dim,
                rank: self.rank(),
            });
        }
        let stride = match dim < self.rank() {
            true => self.strides[dim] * self.shape[dim],
            false => 1,
        };

        let mut view = self.view();
        view.shape.insert(dim, 1);
        view.strides.insert(dim, stride);
        Ok(view)
    }

    /// Merges the dimensions `start..end` into a single one.
    pub fn fold(&self, start: usize, end: usize) -> Result<Self, MemRefError> {
        if start >= end || end > self.rank() {
            return Err(MemRefError::DimOutOfRange {
                dim: end,
                rank: self.rank(),
            });
        }
        let contiguous = (start..end - 1)
            .all(|i| self.strides[i] == self.strides[i + 1] * self.shape[i + 1]);
        if !contiguous {
            return Err(MemRefError::NonContiguousFold {
                start,
                end,
                shape: self.shape.clone(),
                strides: self.strides.clone(),
            });
        }
        let size = self.shape[start..end].iter().product();
        let stride = self.strides[end - 1];

        let mut view = self.view();
        view.shape.splice(start..end, [size]);
        view.strides.splice(start..end, [stride]);
        Ok(view)
    }

    fn view(&self) -> Self {
        Self {
            derived: true,
            ..self.clone()
        }
    }

    fn check_dim(&self, dim: usize) -> Result<(), MemRefError> {
        match dim < self.rank() {
            true => Ok(()),
            false => Err(MemRefError::DimOutOfRange {
                dim,
                rank: self.rank(),
            }),
        }
    }
}

/// Checks that `permutation` is a bijection over `0..rank`.
pub fn check_permutation(permutation: &[usize], rank: usize) -> Result<(), MemRefError> {
    let mut seen = vec![false; rank];
    let valid = permutation.len() == rank
        && permutation.iter().all(|p| match seen.get_mut(*p) {
            Some(seen) if !*seen => {
                *seen = true;
                true
            }
            _ => false,
        });

    match valid {
        true => Ok(()),
        false => Err(MemRefError::InvalidPermutation {
            permutation: permutation.to_vec(),
            rank,
        }),
    }
}

impl Display for MemorySpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MemorySpace::Global => f.write_str("gmem"),
            MemorySpace::Shared => f.write_str("smem"),
        }
    }
}

impl Display for Buffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Buffer::Argument(id) => write!(f, "arg({id})"),
            Buffer::Scratch => f.write_str("scratch"),
            Buffer::Shared { offset } => write!(f, "smem({offset})"),
        }
    }
}

impl Display for MemRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "memref<")?;
        for dim in self.shape.iter() {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}, {}", self.elem, self.buffer)?;
        if !self.is_contiguous() || self.offset != 0 {
            write!(f, ", strides: {:?}, offset: {}", self.strides, self.offset)?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FloatKind;
    use pretty_assertions::assert_eq;

    const F32: Elem = Elem::Float(FloatKind::F32);

    #[test]
    fn contiguous_strides_are_row_major() {
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
    }

    #[test]
    fn unfold_splits_dimension() {
        let memref = MemRef::argument(0, F32, vec![128, 64]);
        let view = memref.unfold(0, 32).unwrap();

        assert_eq!(view.shape(), &[4, 32, 64]);
        assert_eq!(view.strides(), &[2048, 64, 1]);
        assert!(view.is_derived());
        assert!(!view.is_kernel_argument());
        assert!(memref.is_kernel_argument());
    }

    #[test]
    fn unfold_rejects_indivisible_dimension() {
        let memref = MemRef::argument(0, F32, vec![130]);

        assert_eq!(
            memref.unfold(0, 64),
            Err(MemRefError::IndivisibleDim {
                dim: 0,
                size: 130,
                tile: 64
            })
        );
    }

    #[test]
    fn transpose_permutes_strides() {
        let memref = MemRef::argument(0, F32, vec![2, 3, 4]);
        let view = memref.transpose(&[2, 0, 1]).unwrap();

        assert_eq!(view.shape(), &[4, 2, 3]);
        assert_eq!(view.strides(), &[1, 12, 4]);
        assert_eq!(
            view.element_offset(&[3, 1, 2]).unwrap(),
            memref.element_offset(&[1, 2, 3]).unwrap()
        );
    }

    #[test]
    fn transpose_rejects_duplicates() {
        let memref = MemRef::argument(0, F32, vec![2, 2]);

        assert!(matches!(
            memref.transpose(&[0, 0]),
            Err(MemRefError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn unsqueeze_then_fold_is_identity() {
        let memref = MemRef::shared(256, F32, vec![8, 16]);
        let view = memref.unsqueeze(1).unwrap();
        assert_eq!(view.shape(), &[8, 1, 16]);

        let folded = view.fold(0, 3).unwrap();
        assert_eq!(folded.shape(), &[128]);
        assert_eq!(folded.strides(), &[1]);
        assert_eq!(folded.memory_space(), MemorySpace::Shared);
    }

    #[test]
    fn fold_rejects_non_contiguous_dims() {
        let memref = MemRef::argument(0, F32, vec![4, 8]);
        let transposed = memref.transpose(&[1, 0]).unwrap();

        assert!(matches!(
            transposed.fold(0, 2),
            Err(MemRefError::NonContiguousFold { .. })
        ));
    }

    #[test]
    fn element_offset_checks_bounds() {
        let memref = MemRef::argument(0, F32, vec![4, 8]);

        assert_eq!(memref.element_offset(&[3, 7]), Ok(31));
        assert!(memref.element_offset(&[4, 0]).is_err());
        assert!(memref.element_offset(&[0]).is_err());
    }
}
