use tilecl_ir::{Elem, MemRef, Scope, Variable, WARP_SIZE};

use super::{
    array::FragmentedArray,
    layout::{FragmentedLayout, WgStridedLayout, WGMMA_COL_TILE, WGMMA_ROW_TILE},
};
use crate::error::{ContractViolation, KernelError, Unimplemented};

/// Bytes in a row of a 128B swizzled tile.
const SWIZZLE_ROW_BYTES: usize = 128;

impl FragmentedArray {
    /// Stores the array to a reference of the same shape, without any tiling.
    pub fn store_untiled(&self, scope: &mut Scope, memref: &MemRef) -> Result<(), KernelError> {
        self.check_elem(memref)?;
        match &self.layout {
            FragmentedLayout::WgStrided(layout) => self.store_untiled_strided(scope, layout, memref),
            FragmentedLayout::Wgmma => self.store_untiled_wgmma(scope, memref),
            FragmentedLayout::WgmmaRow => Err(Unimplemented::Layout {
                op: "store_untiled",
                layout: self.layout.to_string(),
            }
            .into()),
        }
    }

    fn store_untiled_strided(
        &self,
        scope: &mut Scope,
        layout: &WgStridedLayout,
        memref: &MemRef,
    ) -> Result<(), KernelError> {
        self.check_shape(layout.shape().to_vec(), memref)?;
        let flat = memref.fold(0, memref.rank())?;

        for (offset, register) in layout
            .thread_vec_idxs(scope)
            .into_iter()
            .zip(self.registers.iter())
        {
            scope.store(&flat, vec![offset], *register);
        }

        Ok(())
    }

    /// Element by element, not optimized.
    fn store_untiled_wgmma(&self, scope: &mut Scope, memref: &MemRef) -> Result<(), KernelError> {
        self.check_shape(self.shape(), memref)?;

        let (lane, warp) = lane_and_warp(scope);
        let quad_row = scope.div(lane, Variable::index(4));
        let warp_row = scope.mul(warp, Variable::index(16));
        let row_base = scope.add(quad_row, warp_row);
        let quad_col = scope.rem(lane, Variable::index(4));
        let col_base = scope.mul(quad_col, Variable::index(2));

        for (index, register) in self.registers.indexed() {
            let (row_tile, col_tile, row_idx) = (index[0], index[1], index[2]);
            let row = scope.add(
                row_base,
                Variable::index(row_tile * WGMMA_ROW_TILE + row_idx * 8),
            );
            for col_idx in 0..2 {
                let value = scope.extract(register, col_idx as u32);
                let col = scope.add(
                    col_base,
                    Variable::index(col_tile * WGMMA_COL_TILE + col_idx),
                );
                scope.store(memref, vec![row, col], value);
            }
        }

        Ok(())
    }

    /// Stores an accumulator to a tiled shared memory reference in the layout a 128B swizzled
    /// bulk copy expects.
    ///
    /// The reference has the shape `[m / 64, n / cols, 64, cols]` where a tile row of `cols`
    /// elements spans 128 bytes. The swizzle is applied by XORing the 16 bytes chunk index with
    /// the row index. For elements wider than 2 bytes, odd rows visit the chunks in a different
    /// order so that the bank conflicts of a warp are split between its two halves.
    pub fn store_tiled(
        &self,
        scope: &mut Scope,
        memref: &MemRef,
        swizzle: Option<u32>,
    ) -> Result<(), KernelError> {
        self.expect_layout(FragmentedLayout::Wgmma, "store_tiled")?;
        self.check_elem(memref)?;
        let elem = self.elem();
        let bytes = elem.size();
        if bytes > 4 {
            return Err(Unimplemented::TiledElem(elem).into());
        }
        let shape = self.shape();
        let (m, n) = (shape[0], shape[1]);
        let cols_per_tile = SWIZZLE_ROW_BYTES / bytes;
        if n % 32 != 0 || n % cols_per_tile != 0 {
            return Err(Unimplemented::TiledColumns(n).into());
        }
        self.check_shape(
            vec![
                m / WGMMA_ROW_TILE,
                n / cols_per_tile,
                WGMMA_ROW_TILE,
                cols_per_tile,
            ],
            memref,
        )?;
        if swizzle != Some(SWIZZLE_ROW_BYTES as u32) {
            return Err(Unimplemented::Swizzle(swizzle).into());
        }

        let (lane, warp) = lane_and_warp(scope);
        let sub_row_base = scope.div(lane, Variable::index(4));
        let is_even_row = match bytes > 2 {
            true => {
                let parity = scope.rem(sub_row_base, Variable::index(2));
                scope.cmp_eq(parity, Variable::index(0))
            }
            false => Elem::Bool.constant_from_u64(1),
        };
        let warp_row = scope.mul(warp, Variable::index(16));
        let row_base = scope.add(sub_row_base, warp_row);
        let quad_col = scope.rem(lane, Variable::index(4));
        let col_base = scope.mul(quad_col, Variable::index(2));
        let swizzle_bits = scope.mul(sub_row_base, Variable::index(16 / bytes));

        let col_subtiles = cols_per_tile / WGMMA_COL_TILE;
        for row_group in 0..m / WGMMA_ROW_TILE {
            for col_group in 0..n / cols_per_tile {
                for row_subidx in 0..2 {
                    let row = scope.add(row_base, Variable::index(row_subidx * 8));
                    for col_subidx in 0..col_subtiles {
                        let even = col_subidx;
                        let odd = col_subidx ^ 2;
                        let col_off = scope.select(
                            is_even_row,
                            Variable::index(even * WGMMA_COL_TILE),
                            Variable::index(odd * WGMMA_COL_TILE),
                        );
                        let col = scope.add(col_base, col_off);
                        let col = scope.xor(col, swizzle_bits);

                        let register = |subidx: usize| {
                            self.registers.get(&[
                                row_group,
                                subidx + col_group * col_subtiles,
                                row_subidx,
                                0,
                            ])
                        };
                        let value = scope.select(is_even_row, register(even), register(odd));
                        scope.store(
                            memref,
                            vec![
                                Variable::index(row_group),
                                Variable::index(col_group),
                                row,
                                col,
                            ],
                            value,
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn check_elem(&self, memref: &MemRef) -> Result<(), KernelError> {
        match self.elem() == memref.elem {
            true => Ok(()),
            false => Err(ContractViolation::ElemMismatch {
                lhs: self.elem(),
                rhs: memref.elem,
            }
            .into()),
        }
    }

    fn check_shape(&self, expected: Vec<usize>, memref: &MemRef) -> Result<(), KernelError> {
        match memref.shape() == expected.as_slice() {
            true => Ok(()),
            false => Err(ContractViolation::ShapeMismatch {
                expected,
                actual: memref.shape().to_vec(),
            }
            .into()),
        }
    }
}

fn lane_and_warp(scope: &mut Scope) -> (Variable, Variable) {
    let tid = scope.thread_idx();
    let lane = scope.rem(tid, Variable::index(WARP_SIZE));
    let warp = scope.div(tid, Variable::index(WARP_SIZE));
    (lane, warp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{FloatKind, IntKind, Memory, Operation};

    const F16: Elem = Elem::Float(FloatKind::F16);
    const F32: Elem = Elem::Float(FloatKind::F32);

    fn accumulator(scope: &mut Scope, elem: Elem, shape: &[usize]) -> FragmentedArray {
        FragmentedArray::splat(scope, elem.constant_from_f64(0.0), shape, FragmentedLayout::Wgmma)
            .unwrap()
    }

    fn stores(scope: &Scope) -> usize {
        scope
            .instructions
            .iter()
            .filter(|i| matches!(i.operation, Operation::Memory(Memory::Store { .. })))
            .count()
    }

    #[test]
    fn untiled_accumulator_stores_every_element() {
        let mut scope = Scope::root();
        let array = accumulator(&mut scope, F32, &[64, 16]);
        let memref = MemRef::shared(0, F32, vec![64, 16]);

        array.store_untiled(&mut scope, &memref).unwrap();

        // 64 x 16 elements over 128 threads.
        assert_eq!(stores(&scope), 8);
        assert_eq!(
            array.store_untiled(&mut scope, &MemRef::shared(0, F32, vec![16, 64])),
            Err(ContractViolation::ShapeMismatch {
                expected: vec![64, 16],
                actual: vec![16, 64]
            }
            .into())
        );
    }

    #[test]
    fn strided_round_trip_uses_vectors() {
        let mut scope = Scope::root();
        let src = MemRef::argument(0, F16, vec![8, 128]);
        let dst = MemRef::argument(1, F16, vec![8, 128]);

        let array = FragmentedArray::load_strided(&mut scope, &src).unwrap();
        array.store_untiled(&mut scope, &dst).unwrap();

        assert_eq!(array.registers().len(), 2);
        assert_eq!(stores(&scope), 2);
        assert_eq!(
            scope.instructions[2].to_string(),
            format!("%2: vector4<f16> = load({}[%0])", src.fold(0, 2).unwrap())
        );
    }

    #[test]
    fn row_layout_cannot_be_stored() {
        let mut scope = Scope::root();
        let row = FragmentedArray::splat(
            &mut scope,
            F32.constant_from_f64(0.0),
            &[64],
            FragmentedLayout::WgmmaRow,
        )
        .unwrap();

        assert!(matches!(
            row.store_untiled(&mut scope, &MemRef::shared(0, F32, vec![64])),
            Err(KernelError::Unimplemented(Unimplemented::Layout { .. }))
        ));
    }

    #[test]
    fn tiled_store_covers_tile() {
        let mut scope = Scope::root();
        let array = accumulator(&mut scope, F16, &[64, 64]);
        let memref = MemRef::shared(0, F16, vec![1, 1, 64, 64]);

        array.store_tiled(&mut scope, &memref, Some(128)).unwrap();

        // 64 x 64 elements over 128 threads, 2 per store.
        assert_eq!(stores(&scope), 16);
        let selects = scope
            .instructions
            .iter()
            .filter(|i| matches!(i.operation, Operation::Operator(tilecl_ir::Operator::Select(_))))
            .count();
        assert_eq!(selects, 0);
    }

    #[test]
    fn wide_elements_stagger_rows() {
        let mut scope = Scope::root();
        let array = accumulator(&mut scope, F32, &[64, 32]);
        let memref = MemRef::shared(0, F32, vec![1, 1, 64, 32]);

        array.store_tiled(&mut scope, &memref, Some(128)).unwrap();

        assert_eq!(stores(&scope), 8);
        let selects = scope
            .instructions
            .iter()
            .filter(|i| matches!(i.operation, Operation::Operator(tilecl_ir::Operator::Select(_))))
            .count();
        assert_eq!(selects, 2 * 8);
    }

    #[test]
    fn tiled_store_rejections() {
        let mut scope = Scope::root();
        let array = accumulator(&mut scope, F16, &[64, 64]);
        let memref = MemRef::shared(0, F16, vec![1, 1, 64, 64]);

        assert_eq!(
            array.store_tiled(&mut scope, &memref, Some(64)),
            Err(Unimplemented::Swizzle(Some(64)).into())
        );
        assert!(matches!(
            array.store_tiled(&mut scope, &MemRef::shared(0, F16, vec![64, 64]), Some(128)),
            Err(KernelError::Contract(ContractViolation::ShapeMismatch { .. }))
        ));
        let narrow = accumulator(&mut scope, F16, &[64, 16]);
        assert_eq!(
            narrow.store_tiled(&mut scope, &memref, Some(128)),
            Err(Unimplemented::TiledColumns(16).into())
        );
        let ints = accumulator(&mut scope, Elem::Int(IntKind::I32), &[64, 32]);
        assert!(matches!(
            ints.store_tiled(&mut scope, &memref, Some(128)),
            Err(KernelError::Contract(ContractViolation::ElemMismatch { .. }))
        ));
    }
}
