use core::fmt::Display;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tilecl_ir::{
    Arithmetic, BarrierOps, BarrierRef, Bitwise, Branch, Buffer, Comparison, Elem, Id,
    Instruction, MemRef, Memory, NonSemantic, Operation, Operator, Plane, Scope,
    Synchronization, TmaOps, Variable, VariableKind,
};

use crate::{error::VerificationError, runtime_fn::RuntimeFunction, scratch::ScratchLayout};

/// Global buffer passed to the kernel.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelArgument {
    pub shape: Vec<usize>,
    pub elem: Elem,
}

impl KernelArgument {
    pub fn num_elems(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elems() * self.elem.size()
    }
}

/// A fully generated kernel, ready to be handed to a [compiler](crate::compiler::Compiler).
///
/// The calling convention is an array of buffer pointers: every argument (inputs first, then
/// outputs) followed by the scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelModule {
    pub name: String,
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub arguments: Vec<KernelArgument>,
    pub num_inputs: usize,
    /// Dynamic shared memory in bytes.
    pub smem_bytes: usize,
    pub scratch: ScratchLayout,
    pub runtime_functions: Vec<RuntimeFunction>,
    pub body: Scope,
}

impl KernelModule {
    pub fn inputs(&self) -> &[KernelArgument] {
        &self.arguments[..self.num_inputs]
    }

    pub fn outputs(&self) -> &[KernelArgument] {
        &self.arguments[self.num_inputs..]
    }

    pub fn num_blocks(&self) -> usize {
        self.grid.iter().map(|g| *g as usize).product()
    }

    pub fn num_threads(&self) -> usize {
        self.block.iter().map(|b| *b as usize).product()
    }

    /// Checks that every variable is defined before being used and that every memory access
    /// stays within the buffers the module declares.
    pub fn verify(&self) -> Result<(), VerificationError> {
        let mut verifier = Verifier {
            module: self,
            defined: HashSet::new(),
        };
        verifier.visit(&self.body.instructions)
    }
}

struct Verifier<'a> {
    module: &'a KernelModule,
    defined: HashSet<Id>,
}

impl Verifier<'_> {
    fn visit(&mut self, instructions: &[Instruction]) -> Result<(), VerificationError> {
        for instruction in instructions {
            self.visit_operation(&instruction.operation)?;

            if let Some(out) = instruction.out {
                self.define(out)?;
            }
        }

        Ok(())
    }

    fn visit_operation(&mut self, operation: &Operation) -> Result<(), VerificationError> {
        match operation {
            Operation::Copy(input) => self.read(input),
            Operation::Arithmetic(op) => match op {
                Arithmetic::Add(op)
                | Arithmetic::Sub(op)
                | Arithmetic::Mul(op)
                | Arithmetic::Div(op)
                | Arithmetic::Rem(op)
                | Arithmetic::Max(op)
                | Arithmetic::Min(op) => self.read_all(&[op.lhs, op.rhs]),
                Arithmetic::Exp(op) | Arithmetic::Exp2Approx(op) => self.read(&op.input),
            },
            Operation::Comparison(Comparison::Equal(op) | Comparison::Lower(op))
            | Operation::Bitwise(Bitwise::And(op) | Bitwise::Or(op) | Bitwise::Xor(op)) => {
                self.read_all(&[op.lhs, op.rhs])
            }
            Operation::Operator(op) => match op {
                Operator::Cast(op) => self.read(&op.input),
                Operator::Bitcast(op) | Operator::Splat(op) => self.read(&op.input),
                Operator::Select(op) => self.read_all(&[op.cond, op.then, op.or_else]),
                Operator::ExtractElement(op) => self.read(&op.vector),
                Operator::InsertElement(op) => self.read_all(&[op.vector, op.value]),
                Operator::InitVector(op) => self.read_all(&op.inputs),
            },
            Operation::Memory(op) => match op {
                Memory::Load { memref, indices } => {
                    self.access(memref)?;
                    self.read_all(indices)
                }
                Memory::Store {
                    memref,
                    indices,
                    value,
                } => {
                    self.access(memref)?;
                    self.read_all(indices)?;
                    self.read(value)
                }
            },
            Operation::Plane(Plane::ShuffleXor { value, .. }) => self.read(value),
            Operation::Synchronization(Synchronization::SyncBlock) => Ok(()),
            Operation::Barrier(op) => match op {
                BarrierOps::Init {
                    barrier,
                    arrival_count,
                } => {
                    if *arrival_count == 0 {
                        return Err(VerificationError::InvalidArrivalCount {
                            barrier: barrier.to_string(),
                        });
                    }
                    self.barrier(barrier)
                }
                BarrierOps::Arrive { barrier } => self.barrier(barrier),
                BarrierOps::ArriveExpectTx { barrier, bytes } => {
                    self.barrier(barrier)?;
                    self.read(bytes)
                }
                BarrierOps::Wait { barrier, parity } => {
                    self.barrier(barrier)?;
                    self.read(parity)
                }
            },
            Operation::Tma(op) => match op {
                TmaOps::Load {
                    destination,
                    barrier,
                    descriptor,
                    coordinates,
                } => {
                    self.access(destination)?;
                    self.barrier(barrier)?;
                    self.read(descriptor)?;
                    self.read_all(coordinates)
                }
                TmaOps::Store {
                    source,
                    descriptor,
                    coordinates,
                } => {
                    self.access(source)?;
                    self.read(descriptor)?;
                    self.read_all(coordinates)
                }
                TmaOps::CommitGroup | TmaOps::WaitGroup { .. } => Ok(()),
            },
            Operation::Branch(Branch::If { cond, body }) => {
                self.read(cond)?;
                // Values defined in the branch aren't visible after it.
                let outer = self.defined.clone();
                let result = self.visit(body);
                self.defined = outer;
                result
            }
            Operation::NonSemantic(NonSemantic::Comment { .. }) | Operation::GlobalTimer => Ok(()),
        }
    }

    fn define(&mut self, variable: Variable) -> Result<(), VerificationError> {
        match variable.id() {
            Some(id) if !self.defined.insert(id) => Err(VerificationError::Redefinition {
                variable: variable.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn read_all(&self, variables: &[Variable]) -> Result<(), VerificationError> {
        variables.iter().try_for_each(|variable| self.read(variable))
    }

    fn read(&self, variable: &Variable) -> Result<(), VerificationError> {
        match variable.kind {
            VariableKind::Local { id } if !self.defined.contains(&id) => {
                Err(VerificationError::UndefinedVariable {
                    variable: variable.to_string(),
                })
            }
            VariableKind::ScratchPointer { offset } if offset >= self.module.scratch.bytes => {
                Err(VerificationError::ScratchOutOfBounds {
                    offset,
                    bytes: self.module.scratch.bytes,
                })
            }
            _ => Ok(()),
        }
    }

    fn barrier(&self, barrier: &BarrierRef) -> Result<(), VerificationError> {
        self.access(&barrier.array)?;
        self.read(&barrier.index)
    }

    fn access(&self, memref: &MemRef) -> Result<(), VerificationError> {
        if memref.num_elems() == 0 {
            return Ok(());
        }
        let last = memref
            .shape()
            .iter()
            .zip(memref.strides())
            .map(|(size, stride)| (size - 1) * stride)
            .sum::<usize>();
        let end_bytes = (memref.offset() + last + 1) * memref.elem.size();

        match memref.buffer {
            Buffer::Shared { offset } if offset + end_bytes > self.module.smem_bytes => {
                Err(VerificationError::SharedOutOfBounds {
                    memref: memref.to_string(),
                    end: offset + end_bytes,
                    smem_bytes: self.module.smem_bytes,
                })
            }
            Buffer::Argument(id) if id as usize >= self.module.arguments.len() => {
                Err(VerificationError::UnknownArgument {
                    memref: memref.to_string(),
                    id,
                    count: self.module.arguments.len(),
                })
            }
            Buffer::Scratch if end_bytes > self.module.scratch.bytes => {
                Err(VerificationError::ScratchOutOfBounds {
                    offset: end_bytes,
                    bytes: self.module.scratch.bytes,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Display for KernelModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(
            f,
            "kernel {}(grid: {:?}, block: {:?}, smem: {} bytes, scratch: {} bytes)",
            self.name, self.grid, self.block, self.smem_bytes, self.scratch.bytes
        )?;
        for function in self.runtime_functions.iter() {
            writeln!(f, "declare {} {}", function.name(), function.signature())?;
        }
        for (id, argument) in self.arguments.iter().enumerate() {
            let kind = match id < self.num_inputs {
                true => "input",
                false => "output",
            };
            writeln!(
                f,
                "{kind} {}",
                MemRef::argument(id as Id, argument.elem, argument.shape.clone())
            )?;
        }
        writeln!(f, "{{")?;
        for line in self.body.to_string().lines() {
            writeln!(f, "    {line}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tilecl_ir::{FloatKind, UIntKind};

    const F32: Elem = Elem::Float(FloatKind::F32);

    fn module(body: Scope) -> KernelModule {
        KernelModule {
            name: "test".into(),
            grid: [1, 1, 1],
            block: [128, 1, 1],
            arguments: vec![KernelArgument::new(vec![128], F32)],
            num_inputs: 1,
            smem_bytes: 512,
            scratch: ScratchLayout::default(),
            runtime_functions: vec![],
            body,
        }
    }

    #[test]
    fn valid_module_passes() {
        let mut scope = Scope::root();
        let input = MemRef::argument(0, F32, vec![128]);
        let smem = MemRef::shared(0, F32, vec![128]);
        let tid = scope.thread_idx();
        let value = scope.load(&input, vec![tid], 1);
        scope.store(&smem, vec![tid], value);

        assert_eq!(module(scope).verify(), Ok(()));
    }

    #[test]
    fn use_before_definition_fails() {
        let mut scope = Scope::root();
        let undefined = Variable::new(VariableKind::Local { id: 7 }, F32.into());
        scope.exp(undefined);

        assert!(matches!(
            module(scope).verify(),
            Err(VerificationError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn branch_locals_are_scoped() {
        let mut scope = Scope::root();
        let tid = scope.thread_idx();
        let cond = scope.cmp_eq(tid, Variable::index(0));
        let timer = scope.if_then(cond, |scope| scope.global_timer());
        scope.add(timer, Variable::index(1));

        assert!(matches!(
            module(scope).verify(),
            Err(VerificationError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn shared_memory_overflow_fails() {
        let mut scope = Scope::root();
        let smem = MemRef::shared(256, F32, vec![128]);
        scope.store(&smem, vec![Variable::index(0)], F32.constant_from_f64(1.0));

        assert_eq!(
            module(scope).verify(),
            Err(VerificationError::SharedOutOfBounds {
                memref: smem.to_string(),
                end: 768,
                smem_bytes: 512,
            })
        );
    }

    #[test]
    fn zero_arrival_count_fails() {
        let mut scope = Scope::root();
        let barriers = MemRef::shared(0, Elem::UInt(UIntKind::U64), vec![2]);
        scope.register(BarrierOps::Init {
            barrier: BarrierRef {
                array: barriers,
                index: Variable::index(1),
            },
            arrival_count: 0,
        });

        assert!(matches!(
            module(scope).verify(),
            Err(VerificationError::InvalidArrivalCount { .. })
        ));
    }

    #[test]
    fn display_lists_arguments() {
        let text = module(Scope::root()).to_string();

        assert_eq!(
            text,
            "kernel test(grid: [1, 1, 1], block: [128, 1, 1], smem: 512 bytes, scratch: 0 bytes)\ninput memref<128xf32, arg(0)>\n{\n}"
        );
    }
}
