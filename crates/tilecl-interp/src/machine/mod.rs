//! Lock-step execution of one block.
//!
//! Every instruction is executed by all the active threads of the block before moving to the
//! next one. Branches narrow the set of active threads, block-wide synchronization is therefore
//! implicit and only checked for divergence. Bulk copies complete as soon as they are issued.

mod arithmetic;
mod barrier;
mod memory;
mod tma;

use hashbrown::HashMap;
use tilecl_ir::{
    Branch, Builtin, Elem, Id, Instruction, Item, Operation, Plane, Synchronization, Variable,
    VariableKind, WARP_SIZE,
};
use tilecl_runtime::kernel::KernelModule;

use crate::{
    error::InterpError,
    value::{Scalar, Value},
};
use barrier::MbarrierState;

/// Global memory of a launch: the kernel arguments followed by the scratch buffer.
#[derive(new, Debug)]
pub(crate) struct DeviceMemory {
    pub arguments: Vec<Vec<u8>>,
    pub scratch: Vec<u8>,
}

pub(crate) struct BlockMachine<'a> {
    module: &'a KernelModule,
    block_idx: [u32; 3],
    memory: &'a mut DeviceMemory,
    smem: Vec<u8>,
    registers: Vec<HashMap<Id, Value>>,
    /// Barrier objects, keyed by their shared memory address.
    barriers: HashMap<usize, MbarrierState>,
    bulk_groups: usize,
    clock: u32,
}

impl<'a> BlockMachine<'a> {
    pub fn new(module: &'a KernelModule, block_idx: [u32; 3], memory: &'a mut DeviceMemory) -> Self {
        Self {
            module,
            block_idx,
            memory,
            smem: vec![0; module.smem_bytes],
            registers: vec![HashMap::new(); module.num_threads()],
            barriers: HashMap::new(),
            bulk_groups: 0,
            clock: 0,
        }
    }

    pub fn run(mut self) -> Result<(), InterpError> {
        let module = self.module;
        let mask = vec![true; self.registers.len()];
        self.visit_block(&module.body.instructions, &mask)?;
        log::trace!(
            "Block {:?} done after {} instructions, {} bulk groups committed",
            self.block_idx,
            self.clock,
            self.bulk_groups
        );

        Ok(())
    }

    fn visit_block(&mut self, instructions: &'a [Instruction], mask: &[bool]) -> Result<(), InterpError> {
        for instruction in instructions {
            self.clock = self.clock.wrapping_add(1);
            self.visit_instruction(instruction, mask)?;
        }

        Ok(())
    }

    fn visit_instruction(
        &mut self,
        instruction: &'a Instruction,
        mask: &[bool],
    ) -> Result<(), InterpError> {
        match &instruction.operation {
            Operation::Branch(Branch::If { cond, body }) => {
                let mut taken = vec![false; mask.len()];
                for thread in active(mask) {
                    taken[thread] = self.read(thread, cond)?.first().as_bool();
                }
                if taken.contains(&true) {
                    self.visit_block(body, &taken)?;
                }
                Ok(())
            }
            Operation::Synchronization(Synchronization::SyncBlock) => {
                let active = active(mask).count();
                match active == mask.len() {
                    true => Ok(()),
                    false => Err(InterpError::DivergentSync {
                        active,
                        threads: mask.len(),
                    }),
                }
            }
            Operation::Plane(plane) => self.visit_plane(plane, instruction.out, mask),
            operation => {
                let item = instruction
                    .out
                    .map(|out| out.item)
                    .unwrap_or(Item::new(Elem::INDEX));
                for thread in active(mask) {
                    let value = self.execute(thread, operation, item)?;
                    if let (Some(out), Some(value)) = (instruction.out, value) {
                        self.write(thread, out, value);
                    }
                }
                Ok(())
            }
        }
    }

    fn execute(
        &mut self,
        thread: usize,
        operation: &Operation,
        item: Item,
    ) -> Result<Option<Value>, InterpError> {
        let value = match operation {
            Operation::Copy(input) => self.read(thread, input)?,
            Operation::Arithmetic(op) => self.visit_arithmetic(thread, op, item)?,
            Operation::Comparison(op) => self.visit_comparison(thread, op, item)?,
            Operation::Bitwise(op) => self.visit_bitwise(thread, op, item)?,
            Operation::Operator(op) => self.visit_operator(thread, op, item)?,
            Operation::Memory(op) => return self.visit_memory(thread, op, item),
            Operation::Barrier(op) => {
                self.visit_barrier(thread, op)?;
                return Ok(None);
            }
            Operation::Tma(op) => {
                self.visit_tma(thread, op)?;
                return Ok(None);
            }
            Operation::GlobalTimer => Value::scalar(Elem::INDEX, Scalar::UInt(self.clock as u64)),
            // Block level operations are handled before reaching a single thread.
            Operation::Branch(_)
            | Operation::Synchronization(_)
            | Operation::Plane(_)
            | Operation::NonSemantic(_) => return Ok(None),
        };

        Ok(Some(value))
    }

    fn visit_plane(
        &mut self,
        plane: &Plane,
        out: Option<Variable>,
        mask: &[bool],
    ) -> Result<(), InterpError> {
        let Plane::ShuffleXor {
            value,
            offset,
            mask: member_mask,
            clamp,
        } = plane;

        let mut results = Vec::new();
        for thread in active(mask) {
            let lane = thread % WARP_SIZE;
            let source_lane = lane ^ *offset as usize;
            let source = thread - lane + source_lane;
            let readable = source_lane <= *clamp as usize
                && member_mask.checked_shr(source_lane as u32).unwrap_or(0) & 1 == 1
                && mask.get(source).copied().unwrap_or(false);
            let source = match readable {
                true => source,
                false => thread,
            };
            results.push((thread, self.read(source, value)?));
        }

        if let Some(out) = out {
            for (thread, value) in results {
                self.write(thread, out, value);
            }
        }

        Ok(())
    }

    pub(crate) fn read(&self, thread: usize, variable: &Variable) -> Result<Value, InterpError> {
        match variable.kind {
            VariableKind::Local { id } => self.registers[thread]
                .get(&id)
                .cloned()
                .ok_or(InterpError::UndefinedRegister { thread, id }),
            VariableKind::Constant(value) => Ok(Value::scalar(variable.elem(), value.into())),
            VariableKind::Builtin(builtin) => Ok(Value::scalar(
                variable.elem(),
                Scalar::UInt(self.builtin(thread, builtin)),
            )),
            VariableKind::ScratchPointer { offset } => {
                Ok(Value::scalar(variable.elem(), Scalar::UInt(offset as u64)))
            }
        }
    }

    fn write(&mut self, thread: usize, variable: Variable, value: Value) {
        if let Some(id) = variable.id() {
            self.registers[thread].insert(id, value);
        }
    }

    fn builtin(&self, thread: usize, builtin: Builtin) -> u64 {
        let [dim_x, dim_y, dim_z] = self.module.block.map(|dim| dim as usize);
        let value = match builtin {
            Builtin::ThreadIdxX => thread % dim_x,
            Builtin::ThreadIdxY => (thread / dim_x) % dim_y,
            Builtin::ThreadIdxZ => thread / (dim_x * dim_y),
            Builtin::BlockIdxX => self.block_idx[0] as usize,
            Builtin::BlockIdxY => self.block_idx[1] as usize,
            Builtin::BlockIdxZ => self.block_idx[2] as usize,
            Builtin::BlockDimX => dim_x,
            Builtin::BlockDimY => dim_y,
            Builtin::BlockDimZ => dim_z,
        };
        value as u64
    }

    /// Reads index registers as `usize`.
    fn read_indices(&self, thread: usize, indices: &[Variable]) -> Result<Vec<usize>, InterpError> {
        indices
            .iter()
            .map(|index| Ok(self.read(thread, index)?.first().as_u64() as usize))
            .collect()
    }
}

fn active(mask: &[bool]) -> impl Iterator<Item = usize> + '_ {
    mask.iter()
        .enumerate()
        .filter_map(|(thread, active)| active.then_some(thread))
}
