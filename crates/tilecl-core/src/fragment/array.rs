use tilecl_ir::{CastKind, Elem, FloatKind, MemRef, Scope, Variable, WARP_SIZE};

use super::{
    layout::{FragmentedLayout, WgStridedLayout, WGMMA_COL_TILE, WGMMA_ROW_TILE},
    registers::{ndindex, Registers},
};
use crate::{
    error::{ContractViolation, KernelError, Unimplemented},
    indexing::{parse_indices, DimSlice},
};

const LOG2_E: f64 = 1.4426950408889634;

const FULL_MASK: u32 = 0xFFFF_FFFF;
const SHUFFLE_CLAMP: u32 = WARP_SIZE as u32 - 1;

/// Associative operation used by [FragmentedArray::reduce].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
}

impl ReduceOp {
    pub fn apply(&self, scope: &mut Scope, lhs: Variable, rhs: Variable) -> Variable {
        match self {
            ReduceOp::Add => scope.add(lhs, rhs),
            ReduceOp::Mul => scope.mul(lhs, rhs),
            ReduceOp::Max => scope.max(lhs, rhs),
            ReduceOp::Min => scope.min(lhs, rhs),
        }
    }
}

/// A matrix distributed over the registers of the 128 threads of a warp-group.
///
/// Each thread holds the same register array, the [layout](FragmentedLayout) tells which
/// elements of the matrix a register of a given thread contains. Every operation returns a new
/// array, the instructions computing it are recorded in the scope passed along.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentedArray {
    pub(crate) registers: Registers,
    pub(crate) layout: FragmentedLayout,
}

impl FragmentedArray {
    /// Wraps existing registers, checking their shape and vectorization against the layout.
    pub fn new(registers: Registers, layout: FragmentedLayout) -> Result<Self, KernelError> {
        let item = registers.item();
        let valid = layout.validate_registers(registers.shape())
            && item.lanes() == layout.register_lanes() as usize;
        if !valid {
            return Err(ContractViolation::InvalidRegisters {
                layout: layout.to_string(),
                shape: registers.shape().to_vec(),
                item,
            }
            .into());
        }

        Ok(Self { registers, layout })
    }

    /// An array of `shape` where every element is the scalar `value`.
    pub fn splat(
        scope: &mut Scope,
        value: Variable,
        shape: &[usize],
        layout: FragmentedLayout,
    ) -> Result<Self, KernelError> {
        let register_shape = layout.register_shape(shape)?;
        if value.item.is_vector() {
            return Err(ContractViolation::InvalidRegisters {
                layout: layout.to_string(),
                shape: register_shape,
                item: value.item,
            }
            .into());
        }
        let register = match layout.register_lanes() {
            1 => value,
            lanes => scope.splat(value, lanes),
        };

        Ok(Self {
            registers: Registers::full(register_shape, register),
            layout,
        })
    }

    /// Loads a whole reference with 8 bytes wide vector loads in the strided layout.
    pub fn load_strided(scope: &mut Scope, memref: &MemRef) -> Result<Self, KernelError> {
        let layout = WgStridedLayout::from_memref(memref)?;
        let flat = memref.fold(0, memref.rank())?;
        let lanes = layout.vec_size() as u8;

        let values = layout
            .thread_vec_idxs(scope)
            .into_iter()
            .map(|offset| scope.load(&flat, vec![offset], lanes))
            .collect();
        let registers = Registers::new(vec![layout.num_registers()], values)?;

        Self::new(registers, layout.into())
    }

    /// Logical shape of the matrix.
    pub fn shape(&self) -> Vec<usize> {
        let registers = self.registers.shape();
        match &self.layout {
            FragmentedLayout::WgStrided(layout) => layout.shape().to_vec(),
            FragmentedLayout::Wgmma => vec![
                registers[0] * WGMMA_ROW_TILE,
                registers[1] * WGMMA_COL_TILE,
            ],
            FragmentedLayout::WgmmaRow => vec![registers[0] * WGMMA_ROW_TILE],
        }
    }

    pub fn elem(&self) -> Elem {
        self.registers.item().elem
    }

    pub fn layout(&self) -> &FragmentedLayout {
        &self.layout
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn add(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        self.pointwise(scope, other, Scope::add)
    }

    pub fn sub(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        self.pointwise(scope, other, Scope::sub)
    }

    pub fn mul(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        self.pointwise(scope, other, Scope::mul)
    }

    pub fn div(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        self.pointwise(scope, other, Scope::div)
    }

    pub fn max(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        self.pointwise(scope, other, Scope::max)
    }

    /// Bitwise and, integer elements only.
    pub fn and(&self, scope: &mut Scope, other: &Self) -> Result<Self, KernelError> {
        let elem = self.elem();
        if !elem.is_int() {
            return Err(ContractViolation::ElemKind {
                op: "and",
                expected: "integer",
                elem,
            }
            .into());
        }
        self.pointwise(scope, other, Scope::and)
    }

    /// Elementwise exponential.
    ///
    /// The approximate version computes `ex2.approx(x * log2(e))` lane by lane and is only
    /// available for `f32`.
    pub fn exp(&self, scope: &mut Scope, approx: bool) -> Result<Self, KernelError> {
        let elem = self.elem();
        match approx {
            true if elem != Elem::Float(FloatKind::F32) => {
                Err(Unimplemented::ApproxExp(elem).into())
            }
            true => self.map(|_, register| Ok(fast_exp(scope, register))),
            false if !elem.is_float() => Err(ContractViolation::ElemKind {
                op: "exp",
                expected: "float",
                elem,
            }
            .into()),
            false => self.map(|_, register| Ok(scope.exp(register))),
        }
    }

    /// Converts the elements to `elem`, keeping the layout.
    pub fn astype(&self, scope: &mut Scope, elem: Elem) -> Result<Self, KernelError> {
        let current = self.elem();
        if current == elem {
            return Ok(self.clone());
        }
        let kind = match (current, elem) {
            (Elem::Float(_), Elem::Float(_)) if current.bits() > elem.bits() => CastKind::TruncF,
            (Elem::Float(_), Elem::Float(_)) => CastKind::ExtF,
            (from, to) if from.is_int() && to.is_int() => {
                if from.bits() > to.bits() {
                    CastKind::TruncI
                } else if from.bits() == to.bits() {
                    return self.bitcast(scope, elem);
                } else if from.is_signed() {
                    CastKind::ExtSI
                } else {
                    CastKind::ExtUI
                }
            }
            (from, Elem::Float(_)) if from.is_int() => CastKind::IToFP,
            (Elem::Float(_), to) if to.is_int() => CastKind::FPToI,
            (from, to) => return Err(Unimplemented::Conversion { from, to }.into()),
        };

        self.map(|_, register| Ok(scope.cast(register, elem, kind)))
    }

    /// Reinterprets the bits of every element as `elem`, which must have the same width.
    pub fn bitcast(&self, scope: &mut Scope, elem: Elem) -> Result<Self, KernelError> {
        let item = self.registers.item();
        if item.elem.size() != elem.size() {
            return Err(ContractViolation::BitcastWidth { from: item, to: elem }.into());
        }
        let target = item.with_elem(elem);

        self.map(|_, register| Ok(scope.bitcast(register, target)))
    }

    /// A sub-matrix of an accumulator, aligned on register tiles.
    ///
    /// Only selects registers, no instruction is emitted.
    pub fn slice(&self, slices: &[DimSlice]) -> Result<Self, KernelError> {
        self.expect_layout(FragmentedLayout::Wgmma, "slice")?;
        let parsed = parse_indices(slices, &self.shape())?;
        if parsed.squeezed.iter().any(|squeezed| *squeezed) {
            return Err(Unimplemented::SqueezedSlice.into());
        }
        let base = parsed
            .base
            .iter()
            .map(|index| index.as_usize())
            .collect::<Option<Vec<_>>>()
            .ok_or(Unimplemented::DynamicSlice)?;
        let tiles = [WGMMA_ROW_TILE, WGMMA_COL_TILE];
        let aligned = base
            .iter()
            .chain(parsed.shape.iter())
            .zip(tiles.iter().cycle())
            .all(|(value, tile)| value % tile == 0);
        if !aligned {
            return Err(Unimplemented::UnalignedSlice.into());
        }

        let registers = self.registers.sub_array(
            &[base[0] / WGMMA_ROW_TILE, base[1] / WGMMA_COL_TILE, 0, 0],
            vec![
                parsed.shape[0] / WGMMA_ROW_TILE,
                parsed.shape[1] / WGMMA_COL_TILE,
                2,
                1,
            ],
        );

        Ok(Self {
            registers,
            layout: FragmentedLayout::Wgmma,
        })
    }

    /// Reduces the columns of an accumulator, giving one value per row.
    ///
    /// Each thread first combines the registers it owns in a row, then the four threads sharing
    /// the row exchange their partial results with butterfly shuffles.
    pub fn reduce(&self, scope: &mut Scope, op: ReduceOp, axis: usize) -> Result<Self, KernelError> {
        self.expect_layout(FragmentedLayout::Wgmma, "reduce")?;
        if axis != 1 {
            return Err(Unimplemented::ReductionAxis(axis).into());
        }
        let shape = self.registers.shape();
        let (row_tiles, col_tiles) = (shape[0], shape[1]);

        let mut values = Vec::with_capacity(row_tiles * 2);
        for index in ndindex(&[row_tiles, 2]) {
            let (row_tile, row_subtile) = (index[0], index[1]);
            let mut thread_vec = self.registers.get(&[row_tile, 0, row_subtile, 0]);
            for col_tile in 1..col_tiles {
                let other = self.registers.get(&[row_tile, col_tile, row_subtile, 0]);
                thread_vec = op.apply(scope, thread_vec, other);
            }
            let first = scope.extract(thread_vec, 0);
            let second = scope.extract(thread_vec, 1);
            let mut result = op.apply(scope, first, second);

            for offset in [1, 2] {
                let other = scope.shuffle_xor(result, offset, FULL_MASK, SHUFFLE_CLAMP);
                result = op.apply(scope, result, other);
            }
            values.push(result);
        }

        Self::new(
            Registers::new(vec![row_tiles, 2], values)?,
            FragmentedLayout::WgmmaRow,
        )
    }

    /// Broadcasts a row vector along `n` columns, giving an accumulator.
    pub fn broadcast_minor(&self, scope: &mut Scope, n: usize) -> Result<Self, KernelError> {
        self.expect_layout(FragmentedLayout::WgmmaRow, "broadcast_minor")?;
        let row_tiles = self.registers.shape()[0];
        if n == 0 || n % WGMMA_COL_TILE != 0 {
            return Err(ContractViolation::InvalidShape {
                layout: FragmentedLayout::Wgmma.to_string(),
                shape: vec![row_tiles * WGMMA_ROW_TILE, n],
                reason: "the number of columns must be a multiple of 8",
            }
            .into());
        }

        let splats = self
            .registers
            .iter()
            .map(|register| scope.splat(*register, 2))
            .collect::<Vec<_>>();
        let shape = vec![row_tiles, n / WGMMA_COL_TILE, 2, 1];
        let values = ndindex(&shape)
            .map(|index| splats[index[0] * 2 + index[2]])
            .collect();

        Self::new(Registers::new(shape, values)?, FragmentedLayout::Wgmma)
    }

    pub(crate) fn expect_layout(
        &self,
        layout: FragmentedLayout,
        op: &'static str,
    ) -> Result<(), KernelError> {
        match self.layout == layout {
            true => Ok(()),
            false => Err(Unimplemented::Layout {
                op,
                layout: self.layout.to_string(),
            }
            .into()),
        }
    }

    fn map(
        &self,
        func: impl FnMut(&[usize], Variable) -> Result<Variable, KernelError>,
    ) -> Result<Self, KernelError> {
        Ok(Self {
            registers: self.registers.try_map(func)?,
            layout: self.layout.clone(),
        })
    }

    fn pointwise(
        &self,
        scope: &mut Scope,
        other: &Self,
        op: fn(&mut Scope, Variable, Variable) -> Variable,
    ) -> Result<Self, KernelError> {
        if self.layout != other.layout {
            return Err(ContractViolation::LayoutMismatch {
                lhs: self.layout.to_string(),
                rhs: other.layout.to_string(),
            }
            .into());
        }
        if self.registers.shape() != other.registers.shape() {
            return Err(ContractViolation::RegisterShapeMismatch {
                lhs: self.registers.shape().to_vec(),
                rhs: other.registers.shape().to_vec(),
            }
            .into());
        }
        if self.elem() != other.elem() {
            return Err(ContractViolation::ElemMismatch {
                lhs: self.elem(),
                rhs: other.elem(),
            }
            .into());
        }

        self.map(|index, register| Ok(op(scope, register, other.registers.get(index))))
    }
}

fn fast_exp(scope: &mut Scope, value: Variable) -> Variable {
    if value.item.is_vector() {
        let lanes = (0..value.item.lanes() as u32)
            .map(|lane| {
                let scalar = scope.extract(value, lane);
                fast_exp(scope, scalar)
            })
            .collect();
        return scope.init_vector(lanes);
    }

    let log2_e = Elem::Float(FloatKind::F32).constant_from_f64(LOG2_E);
    let scaled = scope.mul(value, log2_e);
    scope.exp2_approx(scaled)
}
