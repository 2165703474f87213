use core::fmt::Display;

use serde::{Deserialize, Serialize};
use tilecl_ir::{Elem, MemRef, Scope, Variable, WARPGROUP_SIZE};

use crate::error::{ContractViolation, KernelError, Unimplemented};

/// Rows covered by one register tile of the accumulator layouts.
pub const WGMMA_ROW_TILE: usize = 64;
/// Columns covered by one register tile of the accumulator layout.
pub const WGMMA_COL_TILE: usize = 8;

/// How the elements of a matrix are distributed over the registers of a warp-group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentedLayout {
    /// The array is flattened and sharded in vectors of `vec_size` elements, thread `t` owning
    /// the vectors `t, t + 128, t + 256, ...`.
    WgStrided(WgStridedLayout),
    /// `[m, n]` accumulator of a warp-group matrix multiply, `m % 64 == 0` and `n % 8 == 0`.
    ///
    /// Registers are `[m / 64, n / 8, 2, 1]` vectors of 2 elements.
    Wgmma,
    /// `[m]` vector holding one value per accumulator row, `m % 64 == 0`.
    ///
    /// Registers are `[m / 64, 2]` scalars.
    WgmmaRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WgStridedLayout {
    shape: Vec<usize>,
    vec_size: usize,
}

impl WgStridedLayout {
    pub fn new(shape: Vec<usize>, vec_size: usize) -> Result<Self, KernelError> {
        let elems = shape.iter().product::<usize>();
        let chunk = vec_size * WARPGROUP_SIZE;
        if vec_size == 0 || elems == 0 || elems % chunk != 0 {
            return Err(ContractViolation::InvalidShape {
                layout: format!("wg_strided(vec_size: {vec_size})"),
                shape,
                reason: "the element count must be a non-zero multiple of 128 * vec_size",
            }
            .into());
        }

        Ok(Self { shape, vec_size })
    }

    /// The layout used to load a whole reference with 8 bytes wide vectors.
    pub fn from_memref(memref: &MemRef) -> Result<Self, KernelError> {
        let vec_size = vec_size_of(memref.elem)?;
        Self::new(memref.shape().to_vec(), vec_size)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn vec_size(&self) -> usize {
        self.vec_size
    }

    /// Number of vector registers held by each thread.
    pub fn num_registers(&self) -> usize {
        self.shape.iter().product::<usize>() / (self.vec_size * WARPGROUP_SIZE)
    }

    /// Flat element offsets of the vectors owned by the current thread.
    pub fn thread_vec_idxs(&self, scope: &mut Scope) -> Vec<Variable> {
        let tid = scope.thread_idx();
        let base = scope.mul(tid, Variable::index(self.vec_size));
        (0..self.num_registers())
            .map(|i| scope.add(base, Variable::index(i * WARPGROUP_SIZE * self.vec_size)))
            .collect()
    }
}

/// Number of `elem` in 8 bytes.
pub(crate) fn vec_size_of(elem: Elem) -> Result<usize, KernelError> {
    let bytes = elem.size();
    match 8 % bytes == 0 {
        true => Ok(8 / bytes),
        false => Err(Unimplemented::StridedElem(elem).into()),
    }
}

impl FragmentedLayout {
    /// The shape of the register array holding a matrix of `shape`.
    pub fn register_shape(&self, shape: &[usize]) -> Result<Vec<usize>, KernelError> {
        let invalid = |reason| -> KernelError {
            ContractViolation::InvalidShape {
                layout: self.to_string(),
                shape: shape.to_vec(),
                reason,
            }
            .into()
        };

        match self {
            FragmentedLayout::WgStrided(layout) => {
                if layout.shape() != shape {
                    return Err(invalid("the shape must be the one of the layout"));
                }
                Ok(vec![layout.num_registers()])
            }
            FragmentedLayout::Wgmma => match shape {
                [m, n] if m % WGMMA_ROW_TILE == 0 && n % WGMMA_COL_TILE == 0 && m * n > 0 => {
                    Ok(vec![m / WGMMA_ROW_TILE, n / WGMMA_COL_TILE, 2, 1])
                }
                [_, _] => Err(invalid("rows must be a multiple of 64 and columns of 8")),
                _ => Err(invalid("expected a matrix")),
            },
            FragmentedLayout::WgmmaRow => match shape {
                [m] if m % WGMMA_ROW_TILE == 0 && *m > 0 => Ok(vec![m / WGMMA_ROW_TILE, 2]),
                [_] => Err(invalid("rows must be a multiple of 64")),
                _ => Err(invalid("expected a vector")),
            },
        }
    }

    /// Number of elements in a single register.
    pub fn register_lanes(&self) -> u8 {
        match self {
            FragmentedLayout::WgStrided(layout) => layout.vec_size as u8,
            FragmentedLayout::Wgmma => 2,
            FragmentedLayout::WgmmaRow => 1,
        }
    }

    /// Checks the shape of a register array against the layout.
    pub(crate) fn validate_registers(&self, shape: &[usize]) -> bool {
        match self {
            FragmentedLayout::WgStrided(layout) => shape == [layout.num_registers()],
            FragmentedLayout::Wgmma => {
                matches!(shape, [m, n, 2, 1] if *m > 0 && *n > 0)
            }
            FragmentedLayout::WgmmaRow => matches!(shape, [m, 2] if *m > 0),
        }
    }
}

impl From<WgStridedLayout> for FragmentedLayout {
    fn from(value: WgStridedLayout) -> Self {
        FragmentedLayout::WgStrided(value)
    }
}

impl Display for FragmentedLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FragmentedLayout::WgStrided(layout) => write!(
                f,
                "wg_strided(shape: {:?}, vec_size: {})",
                layout.shape, layout.vec_size
            ),
            FragmentedLayout::Wgmma => f.write_str("wgmma"),
            FragmentedLayout::WgmmaRow => f.write_str("wgmma_row"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{FloatKind, IntKind};

    #[test]
    fn strided_vec_size_follows_element_width() {
        let f16 = MemRef::shared(0, Elem::Float(FloatKind::F16), vec![4, 256]);
        let f32 = MemRef::shared(0, Elem::Float(FloatKind::F32), vec![4, 256]);

        let f16 = WgStridedLayout::from_memref(&f16).unwrap();
        let f32 = WgStridedLayout::from_memref(&f32).unwrap();

        assert_eq!((f16.vec_size(), f16.num_registers()), (4, 2));
        assert_eq!((f32.vec_size(), f32.num_registers()), (2, 4));
    }

    #[test]
    fn strided_shape_must_cover_warpgroup() {
        assert!(matches!(
            WgStridedLayout::new(vec![64], 2),
            Err(KernelError::Contract(ContractViolation::InvalidShape { .. }))
        ));
    }

    #[test]
    fn thread_offsets_are_cyclic() {
        let layout = WgStridedLayout::new(vec![1024], 4).unwrap();
        let mut scope = Scope::root();

        let offsets = layout.thread_vec_idxs(&mut scope);

        assert_eq!(offsets.len(), 2);
        assert_eq!(
            scope.to_string(),
            "%0: u32 = thread_idx.x * 4u32\n%1: u32 = %0 + 512u32\n"
        );
        assert_eq!(offsets[0].id(), Some(0));
    }

    #[test]
    fn register_shapes() {
        assert_eq!(
            FragmentedLayout::Wgmma.register_shape(&[128, 32]).unwrap(),
            vec![2, 4, 2, 1]
        );
        assert_eq!(
            FragmentedLayout::WgmmaRow.register_shape(&[192]).unwrap(),
            vec![3, 2]
        );
        assert!(FragmentedLayout::Wgmma.register_shape(&[64, 12]).is_err());
        assert!(FragmentedLayout::WgmmaRow.register_shape(&[64, 8]).is_err());
    }

    #[test]
    fn vectors_span_eight_bytes() {
        assert_eq!(vec_size_of(Elem::Int(IntKind::I64)), Ok(1));
        assert_eq!(
            WgStridedLayout::from_memref(&MemRef::shared(0, Elem::Bool, vec![1024]))
                .map(|layout| layout.vec_size()),
            Ok(8)
        );
    }
}
