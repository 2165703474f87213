use serde::{Deserialize, Serialize};
use tilecl_ir::{Elem, Id, MemRef, Scope, UIntKind, WARPGROUP_SIZE};
use tilecl_runtime::{
    config::{compilation::CompilationLogLevel, Logger},
    kernel::{KernelArgument, KernelModule},
    runtime_fn::RuntimeFunction,
    Compiler,
};

use crate::{
    error::{ContractViolation, KernelError},
    launch::{single_thread, BarrierArray, LaunchContext, BARRIER_ELEM},
    profiler::{BlockProfile, OnDeviceProfiler, ProfilerSpec},
};

/// Maximum number of threads in a block.
pub const MAX_BLOCK_THREADS: usize = 1024;

/// Shape and element type of a kernel input or output.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub elem: Elem,
}

/// Description of the dynamic shared memory of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmemSpec {
    Array(TensorSpec),
    /// An array of transaction-counting barriers.
    Barriers(usize),
    Tuple(Vec<SmemSpec>),
}

/// Shared memory handed to the kernel body, mirroring its [SmemSpec].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmemRef {
    Array(MemRef),
    Barriers(BarrierArray),
    Tuple(Vec<SmemRef>),
}

impl SmemRef {
    pub fn array(&self) -> Result<&MemRef, KernelError> {
        match self {
            SmemRef::Array(memref) => Ok(memref),
            other => Err(ContractViolation::SmemKind(other.kind()).into()),
        }
    }

    pub fn barriers(&self) -> Result<&BarrierArray, KernelError> {
        match self {
            SmemRef::Barriers(barriers) => Ok(barriers),
            other => Err(ContractViolation::SmemKind(other.kind()).into()),
        }
    }

    /// Entry `index` of a tuple.
    pub fn get(&self, index: usize) -> Result<&SmemRef, KernelError> {
        match self {
            SmemRef::Tuple(entries) => entries.get(index).ok_or_else(|| {
                ContractViolation::SmemIndex {
                    index,
                    len: entries.len(),
                }
                .into()
            }),
            other => Err(ContractViolation::SmemKind(other.kind()).into()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SmemRef::Array(_) => "array",
            SmemRef::Barriers(_) => "barrier array",
            SmemRef::Tuple(_) => "tuple",
        }
    }
}

/// Assigns byte offsets to the shared memory tree, one entry after the other.
#[derive(Default)]
struct SmemAllocator {
    offset: usize,
    barriers: Vec<BarrierArray>,
}

impl SmemAllocator {
    fn alloc(&mut self, spec: &SmemSpec) -> SmemRef {
        match spec {
            SmemSpec::Array(tensor) => {
                SmemRef::Array(self.array(tensor.elem, tensor.shape.clone()))
            }
            SmemSpec::Barriers(len) => {
                let barriers = BarrierArray::new(self.array(BARRIER_ELEM, vec![*len]));
                self.barriers.push(barriers.clone());
                SmemRef::Barriers(barriers)
            }
            SmemSpec::Tuple(entries) => {
                SmemRef::Tuple(entries.iter().map(|entry| self.alloc(entry)).collect())
            }
        }
    }

    fn array(&mut self, elem: Elem, shape: Vec<usize>) -> MemRef {
        self.offset = self.offset.next_multiple_of(elem.size());
        let memref = MemRef::shared(self.offset, elem, shape);
        self.offset += memref.size_bytes();
        memref
    }
}

/// A generated kernel and the names of the regions its profiler records.
#[derive(Debug, Clone)]
pub struct BuiltKernel {
    pub module: KernelModule,
    pub profiler: Option<ProfilerSpec>,
    pub profile_regions: Vec<String>,
}

/// A kernel compiled by a [Compiler], along with what's needed to launch it.
#[derive(Debug)]
pub struct CompiledKernel<E> {
    pub executable: E,
    pub grid: [u32; 3],
    pub scratch_bytes: usize,
    pub num_inputs: usize,
    /// Number of outputs, the profile buffer included.
    pub num_outputs: usize,
    pub profiler: Option<ProfilerSpec>,
    pub profile_regions: Vec<String>,
}

impl<E> CompiledKernel<E> {
    /// Decodes the profile buffer, the last output of a profiled launch.
    pub fn decode_profile(&self, buffer: &[u32]) -> Result<Option<Vec<BlockProfile>>, KernelError> {
        self.profiler
            .map(|spec| spec.decode(buffer, self.grid, &self.profile_regions))
            .transpose()
    }
}

/// Builds a kernel module out of a body callback.
///
/// ```ignore
/// let kernel = KernelBuilder::new("copy", [1, 1, 1], [128, 1, 1])
///     .input(TensorSpec::new(vec![64, 64], f16))
///     .output(TensorSpec::new(vec![64, 64], f16))
///     .smem(SmemSpec::Tuple(vec![
///         SmemSpec::Array(TensorSpec::new(vec![64, 64], f16)),
///         SmemSpec::Barriers(1),
///     ]))
///     .build(|ctx, inputs, outputs, smem| { ... })?;
/// ```
#[derive(Debug, Clone)]
pub struct KernelBuilder {
    name: String,
    grid: [u32; 3],
    block: [u32; 3],
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    smem: Option<SmemSpec>,
    profiler: Option<ProfilerSpec>,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>, grid: [u32; 3], block: [u32; 3]) -> Self {
        Self {
            name: name.into(),
            grid,
            block,
            inputs: Vec::new(),
            outputs: Vec::new(),
            smem: None,
            profiler: None,
        }
    }

    pub fn input(mut self, spec: TensorSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: TensorSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn smem(mut self, spec: SmemSpec) -> Self {
        self.smem = Some(spec);
        self
    }

    /// Records named regions into an extra `u32` output.
    pub fn profiler(mut self, spec: ProfilerSpec) -> Self {
        self.profiler = Some(spec);
        self
    }

    /// Generates the kernel: lays out shared memory, initializes the barriers, runs `body` once
    /// and assembles the module.
    pub fn build<F>(self, body: F) -> Result<BuiltKernel, KernelError>
    where
        F: FnOnce(&mut LaunchContext, &[MemRef], &[MemRef], &SmemRef) -> Result<(), KernelError>,
    {
        self.check_dims()?;

        let mut allocator = SmemAllocator::default();
        let smem = match &self.smem {
            Some(spec) => allocator.alloc(spec),
            None => SmemRef::Tuple(Vec::new()),
        };
        let profiler_smem = self
            .profiler
            .map(|spec| allocator.array(Elem::UInt(UIntKind::U32), vec![spec.entries_per_block]));
        let smem_bytes = allocator.offset;

        let mut arguments = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|spec| KernelArgument::new(spec.shape.clone(), spec.elem))
            .collect::<Vec<_>>();
        let memrefs = arguments
            .iter()
            .enumerate()
            .map(|(id, arg)| MemRef::argument(id as Id, arg.elem, arg.shape.clone()))
            .collect::<Vec<_>>();
        let (inputs, outputs) = memrefs.split_at(self.inputs.len());

        let profiler = match (self.profiler, profiler_smem) {
            (Some(spec), Some(smem)) => {
                let buffer = spec.buffer_spec(self.grid);
                let output = MemRef::argument(arguments.len() as Id, buffer.elem, buffer.shape);
                arguments.push(KernelArgument::new(output.shape().to_vec(), output.elem));
                Some(OnDeviceProfiler::new(spec, smem, output))
            }
            _ => None,
        };

        let mut scope = Scope::root();
        if !allocator.barriers.is_empty() {
            single_thread(&mut scope, |scope| {
                for barriers in allocator.barriers.iter() {
                    barriers.initialize(scope, 1);
                }
            });
            scope.sync_block();
        }

        let mut context = LaunchContext::new(scope, profiler);
        body(&mut context, inputs, outputs, &smem)?;
        let (scope, scratch, profile_regions) = context.finish(self.grid);

        let module = KernelModule {
            name: self.name,
            grid: self.grid,
            block: self.block,
            arguments,
            num_inputs: self.inputs.len(),
            smem_bytes,
            scratch,
            runtime_functions: RuntimeFunction::ALL.to_vec(),
            body: scope,
        };

        let mut logger = Logger::new();
        if logger.config.compilation.verify {
            module.verify()?;
        }
        if logger.log_level_compilation() == CompilationLogLevel::Full {
            logger.log_compilation(&module);
        }
        log::debug!(
            "Built kernel {} with {} instructions, {} bytes of shared memory and {} bytes of scratch",
            module.name,
            module.body.instructions.len(),
            module.smem_bytes,
            module.scratch.bytes
        );

        Ok(BuiltKernel {
            module,
            profiler: self.profiler,
            profile_regions,
        })
    }

    /// Builds the kernel and hands the module to `compiler`.
    pub fn compile<C, F>(self, compiler: &mut C, body: F) -> Result<CompiledKernel<C::Executable>, KernelError>
    where
        C: Compiler,
        F: FnOnce(&mut LaunchContext, &[MemRef], &[MemRef], &SmemRef) -> Result<(), KernelError>,
    {
        let BuiltKernel {
            module,
            profiler,
            profile_regions,
        } = self.build(body)?;
        let grid = module.grid;
        let scratch_bytes = module.scratch.bytes;
        let num_inputs = module.num_inputs;
        let num_outputs = module.arguments.len() - num_inputs;

        log::debug!("Compiling kernel {} with {}", module.name, compiler.name());
        let executable = compiler.compile(module)?;

        Ok(CompiledKernel {
            executable,
            grid,
            scratch_bytes,
            num_inputs,
            num_outputs,
            profiler,
            profile_regions,
        })
    }

    fn check_dims(&self) -> Result<(), KernelError> {
        if self.grid.contains(&0) {
            return Err(ContractViolation::LaunchDims("grid dimensions must be non-zero").into());
        }
        if self.block.contains(&0) {
            return Err(ContractViolation::LaunchDims("block dimensions must be non-zero").into());
        }
        let threads = self.block.iter().map(|b| *b as usize).product::<usize>();
        if threads > MAX_BLOCK_THREADS {
            return Err(ContractViolation::LaunchDims("blocks have at most 1024 threads").into());
        }
        if threads % WARPGROUP_SIZE != 0 {
            return Err(ContractViolation::LaunchDims(
                "blocks must be made of whole warp-groups",
            )
            .into());
        }

        Ok(())
    }
}
