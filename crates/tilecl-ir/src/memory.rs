use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{fmt_vararg, MemRef, Variable};

/// Register to memory transfers.
///
/// The number of elements moved is given by the vectorization of the register, read along the
/// innermost dimension of the reference starting at `indices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Memory {
    Load {
        memref: MemRef,
        indices: Vec<Variable>,
    },
    Store {
        memref: MemRef,
        indices: Vec<Variable>,
        value: Variable,
    },
}

/// A single `mbarrier` object inside a barrier array living in shared memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarrierRef {
    /// One-dimensional `u64` array in shared memory.
    pub array: MemRef,
    pub index: Variable,
}

/// Transaction-counting memory barrier operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BarrierOps {
    Init {
        barrier: BarrierRef,
        arrival_count: u32,
    },
    Arrive {
        barrier: BarrierRef,
    },
    /// Arrives on the barrier and expects `bytes` more to land before the phase completes.
    ArriveExpectTx {
        barrier: BarrierRef,
        bytes: Variable,
    },
    /// Blocks until the phase with the given parity has completed.
    Wait {
        barrier: BarrierRef,
        parity: Variable,
    },
}

/// Tensor memory accelerator bulk copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TmaOps {
    /// Global to shared copy of the descriptor box at `coordinates` (innermost dimension first).
    Load {
        destination: MemRef,
        barrier: BarrierRef,
        descriptor: Variable,
        coordinates: Vec<Variable>,
    },
    /// Shared to global copy of the descriptor box at `coordinates` (innermost dimension first).
    Store {
        source: MemRef,
        descriptor: Variable,
        coordinates: Vec<Variable>,
    },
    /// Closes the current bulk async group.
    CommitGroup,
    /// Waits until at most `max_pending` bulk async groups are in flight.
    WaitGroup { max_pending: u32, read: bool },
}

impl Display for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Memory::Load { memref, indices } => {
                write!(f, "load({memref}[{}])", fmt_vararg(indices))
            }
            Memory::Store {
                memref,
                indices,
                value,
            } => write!(f, "store({memref}[{}], {value})", fmt_vararg(indices)),
        }
    }
}

impl Display for BarrierRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.array, self.index)
    }
}

impl Display for BarrierOps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BarrierOps::Init {
                barrier,
                arrival_count,
            } => write!(f, "mbarrier_init({barrier}, count: {arrival_count})"),
            BarrierOps::Arrive { barrier } => write!(f, "mbarrier_arrive({barrier})"),
            BarrierOps::ArriveExpectTx { barrier, bytes } => {
                write!(f, "mbarrier_arrive_expect_tx({barrier}, bytes: {bytes})")
            }
            BarrierOps::Wait { barrier, parity } => {
                write!(f, "mbarrier_wait({barrier}, parity: {parity})")
            }
        }
    }
}

impl Display for TmaOps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TmaOps::Load {
                destination,
                barrier,
                descriptor,
                coordinates,
            } => write!(
                f,
                "tma_load({destination}, {descriptor}[{}], barrier: {barrier})",
                fmt_vararg(coordinates)
            ),
            TmaOps::Store {
                source,
                descriptor,
                coordinates,
            } => write!(
                f,
                "tma_store({descriptor}[{}], {source})",
                fmt_vararg(coordinates)
            ),
            TmaOps::CommitGroup => write!(f, "bulk_commit_group()"),
            TmaOps::WaitGroup { max_pending, read } => {
                write!(f, "bulk_wait_group({max_pending}, read: {read})")
            }
        }
    }
}
