use tilecl_ir::{BarrierOps, BarrierRef, Elem, MemRef, Scope, UIntKind, Variable};

use crate::error::{ContractViolation, KernelError};

/// Element type of a barrier object in shared memory.
pub const BARRIER_ELEM: Elem = Elem::UInt(UIntKind::U64);

/// An array of transaction-counting barriers living in shared memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarrierArray {
    memref: MemRef,
}

impl BarrierArray {
    /// Wraps a one-dimensional `u64` shared memory reference.
    pub(crate) fn new(memref: MemRef) -> Self {
        Self { memref }
    }

    pub fn len(&self) -> usize {
        self.memref.num_elems()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memref(&self) -> &MemRef {
        &self.memref
    }

    /// The barrier at a static index.
    pub fn get(&self, index: usize) -> Result<Barrier, KernelError> {
        if index >= self.len() {
            return Err(ContractViolation::SliceOutOfBounds {
                dim: 0,
                start: index,
                end: index + 1,
                size: self.len(),
            }
            .into());
        }

        Ok(self.at(Variable::index(index)))
    }

    /// The barrier at an index computed at runtime.
    pub fn at(&self, index: Variable) -> Barrier {
        Barrier {
            array: self.memref.clone(),
            index,
        }
    }

    /// Initializes every barrier of the array. Must run on a single thread.
    pub(crate) fn initialize(&self, scope: &mut Scope, arrival_count: u32) {
        for index in 0..self.len() {
            scope.register(BarrierOps::Init {
                barrier: self.at(Variable::index(index)).reference(),
                arrival_count,
            });
        }
    }
}

/// A single barrier of a [BarrierArray].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Barrier {
    array: MemRef,
    index: Variable,
}

impl Barrier {
    /// Blocks until the phase with the given parity has completed.
    pub fn wait(&self, scope: &mut Scope, parity: Variable) {
        scope.register(BarrierOps::Wait {
            barrier: self.reference(),
            parity,
        });
    }

    pub fn arrive(&self, scope: &mut Scope) {
        scope.register(BarrierOps::Arrive {
            barrier: self.reference(),
        });
    }

    pub(crate) fn arrive_expect_tx(&self, scope: &mut Scope, bytes: usize) {
        scope.register(BarrierOps::ArriveExpectTx {
            barrier: self.reference(),
            bytes: Variable::index(bytes),
        });
    }

    pub(crate) fn reference(&self) -> BarrierRef {
        BarrierRef {
            array: self.array.clone(),
            index: self.index,
        }
    }
}
