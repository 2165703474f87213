use tilecl_ir::{BarrierOps, BarrierRef};

use super::{memory::element_address, BlockMachine};
use crate::error::InterpError;

/// State of one `mbarrier` object.
///
/// A phase completes once every expected thread has arrived and every expected transaction byte
/// has landed. The counters are then reset for the next phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MbarrierState {
    arrival_count: u32,
    pending: u32,
    tx_bytes: i64,
    phase: u32,
}

impl MbarrierState {
    pub fn new(arrival_count: u32) -> Self {
        Self {
            arrival_count,
            pending: arrival_count,
            tx_bytes: 0,
            phase: 0,
        }
    }

    pub fn arrive(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.try_complete();
    }

    pub fn expect_tx(&mut self, bytes: u32) {
        self.tx_bytes += bytes as i64;
    }

    /// Bytes of a bulk copy landed. Copies may complete before the matching expectation.
    pub fn complete_tx(&mut self, bytes: usize) {
        self.tx_bytes -= bytes as i64;
        self.try_complete();
    }

    fn try_complete(&mut self) {
        if self.pending == 0 && self.tx_bytes == 0 {
            self.phase = self.phase.wrapping_add(1);
            self.pending = self.arrival_count;
        }
    }

    /// Whether the last phase with the given parity has completed.
    pub fn phase_completed(&self, parity: u32) -> bool {
        self.phase % 2 != parity % 2
    }
}

impl BlockMachine<'_> {
    pub(super) fn visit_barrier(&mut self, thread: usize, op: &BarrierOps) -> Result<(), InterpError> {
        match op {
            BarrierOps::Init {
                barrier,
                arrival_count,
            } => {
                let address = self.barrier_address(thread, barrier)?;
                self.barriers
                    .insert(address, MbarrierState::new(*arrival_count));
            }
            BarrierOps::Arrive { barrier } => {
                self.barrier(thread, barrier)?.arrive();
            }
            BarrierOps::ArriveExpectTx { barrier, bytes } => {
                let bytes = self.read(thread, bytes)?.first().as_u64() as u32;
                let state = self.barrier(thread, barrier)?;
                state.expect_tx(bytes);
                state.arrive();
            }
            BarrierOps::Wait { barrier, parity } => {
                let parity = self.read(thread, parity)?.first().as_u64() as u32;
                let block = self.block_idx;
                let state = self.barrier(thread, barrier)?;
                if !state.phase_completed(parity) {
                    return Err(InterpError::BarrierHang {
                        block,
                        barrier: barrier.to_string(),
                        parity,
                        pending: state.pending,
                        tx_bytes: state.tx_bytes,
                    });
                }
            }
        }

        Ok(())
    }

    pub(super) fn barrier(
        &mut self,
        thread: usize,
        barrier: &BarrierRef,
    ) -> Result<&mut MbarrierState, InterpError> {
        let address = self.barrier_address(thread, barrier)?;
        self.barriers
            .get_mut(&address)
            .ok_or_else(|| InterpError::UninitializedBarrier(barrier.to_string()))
    }

    fn barrier_address(&self, thread: usize, barrier: &BarrierRef) -> Result<usize, InterpError> {
        let index = self.read(thread, &barrier.index)?.first().as_u64() as usize;
        element_address(&barrier.array, &[index], 0)
    }
}
