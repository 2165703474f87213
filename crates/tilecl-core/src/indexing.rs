use core::ops::{Range, RangeFull};

use tilecl_ir::Variable;

use crate::error::{ContractViolation, KernelError};

/// Selection along a single dimension of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimSlice {
    /// A single static index, the dimension is squeezed.
    Index(usize),
    /// A single index computed at runtime, the dimension is squeezed.
    DynIndex(Variable),
    /// A static range.
    Range { start: usize, end: usize },
    /// `len` elements starting at an index computed at runtime.
    DynRange { start: Variable, len: usize },
    /// The whole dimension.
    Full,
}

impl DimSlice {
    /// A dynamic slice of `len` elements starting at `start`.
    pub fn dynamic(start: Variable, len: usize) -> Self {
        DimSlice::DynRange { start, len }
    }
}

impl From<usize> for DimSlice {
    fn from(value: usize) -> Self {
        DimSlice::Index(value)
    }
}

impl From<Variable> for DimSlice {
    fn from(value: Variable) -> Self {
        DimSlice::DynIndex(value)
    }
}

impl From<Range<usize>> for DimSlice {
    fn from(value: Range<usize>) -> Self {
        DimSlice::Range {
            start: value.start,
            end: value.end,
        }
    }
}

impl From<RangeFull> for DimSlice {
    fn from(_: RangeFull) -> Self {
        DimSlice::Full
    }
}

/// A slice resolved against the shape of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSlice {
    /// Index of the first element of the slice, one per dimension.
    pub base: Vec<Variable>,
    /// Shape of the slice, squeezed dimensions included with a size of 1.
    pub shape: Vec<usize>,
    pub squeezed: Vec<bool>,
}

impl ParsedSlice {
    /// Whether every base index is known at code generation time.
    pub fn is_static(&self) -> bool {
        self.base.iter().all(|index| index.is_constant())
    }
}

/// Resolves per-dimension selections against `shape`.
///
/// Missing trailing selections select the whole dimension. Static selections are bounds
/// checked, dynamic ones only have their length checked.
pub fn parse_indices(slices: &[DimSlice], shape: &[usize]) -> Result<ParsedSlice, KernelError> {
    if slices.len() > shape.len() {
        return Err(ContractViolation::RankMismatch {
            expected: shape.len(),
            actual: slices.len(),
        }
        .into());
    }

    let mut parsed = ParsedSlice {
        base: Vec::with_capacity(shape.len()),
        shape: Vec::with_capacity(shape.len()),
        squeezed: Vec::with_capacity(shape.len()),
    };
    let full = DimSlice::Full;

    for (dim, size) in shape.iter().copied().enumerate() {
        let slice = slices.get(dim).unwrap_or(&full);
        let out_of_bounds = |start: usize, end: usize| -> KernelError {
            ContractViolation::SliceOutOfBounds {
                dim,
                start,
                end,
                size,
            }
            .into()
        };

        let (base, len, squeezed) = match *slice {
            DimSlice::Index(index) => {
                if index >= size {
                    return Err(out_of_bounds(index, index + 1));
                }
                (Variable::index(index), 1, true)
            }
            DimSlice::DynIndex(index) => (index, 1, true),
            DimSlice::Range { start, end } => {
                if start >= end || end > size {
                    return Err(out_of_bounds(start, end));
                }
                (Variable::index(start), end - start, false)
            }
            DimSlice::DynRange { start, len } => {
                if len == 0 || len > size {
                    return Err(out_of_bounds(0, len));
                }
                (start, len, false)
            }
            DimSlice::Full => (Variable::index(0), size, false),
        };

        parsed.base.push(base);
        parsed.shape.push(len);
        parsed.squeezed.push(squeezed);
    }

    Ok(parsed)
}
