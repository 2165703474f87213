use thiserror::Error;
use tilecl_ir::{Elem, Item, MemRefError, MemorySpace};
use tilecl_runtime::{scratch::ScratchError, tma::TmaError, CompilationError};

/// Errors raised while generating a kernel.
///
/// Every error is raised at the call that violates a precondition and none of them can be
/// retried: they signal a mistake in the kernel body, not a transient condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Shapes, layouts or element types don't satisfy the operation's contract.
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),
    /// The request is valid, but this configuration isn't supported yet.
    #[error("Not implemented: {0}")]
    Unimplemented(#[from] Unimplemented),
    /// Barrier, copy direction or argument usage violates the async copy protocol.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// The finished module was rejected.
    #[error("Compilation failed: {0}")]
    Compilation(#[from] CompilationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("{0}")]
    MemRef(MemRefError),
    #[error("{0}")]
    Scratch(ScratchError),
    #[error("{0}")]
    Tma(TmaError),
    #[error("Expected the same element type, got {lhs} and {rhs}")]
    ElemMismatch { lhs: Elem, rhs: Elem },
    #[error("Expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Incompatible fragmented array layouts {lhs} and {rhs}")]
    LayoutMismatch { lhs: String, rhs: String },
    #[error("Incompatible fragmented array register shapes {lhs:?} and {rhs:?}")]
    RegisterShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("Invalid register array of shape {shape:?} with {item} registers for layout {layout}")]
    InvalidRegisters {
        layout: String,
        shape: Vec<usize>,
        item: Item,
    },
    #[error("Fragmented arrays need at least one register")]
    EmptyFragment,
    #[error("Shape {shape:?} doesn't fit layout {layout}: {reason}")]
    InvalidShape {
        layout: String,
        shape: Vec<usize>,
        reason: &'static str,
    },
    #[error("Operation `{op}` is only defined for {expected} elements, got {elem}")]
    ElemKind {
        op: &'static str,
        expected: &'static str,
        elem: Elem,
    },
    #[error("Can't bitcast {from} registers to {to}, the bit width differs")]
    BitcastWidth { from: Item, to: Elem },
    #[error("Shape {shape:?} suffix isn't a multiple of the tiling {tiling:?}")]
    IndivisibleTiling {
        shape: Vec<usize>,
        tiling: Vec<usize>,
    },
    #[error("Expected {expected} dimensions, got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("Slice {start}..{end} is out of bounds for dimension {dim} of size {size}")]
    SliceOutOfBounds {
        dim: usize,
        start: usize,
        end: usize,
        size: usize,
    },
    #[error("Shared memory reference {0} must be contiguous to be the target of a bulk copy")]
    NonContiguousSmem(String),
    #[error("Expected a shared memory array, got {0}")]
    SmemKind(&'static str),
    #[error("Shared memory entry {index} doesn't exist, the tuple has {len} entries")]
    SmemIndex { index: usize, len: usize },
    #[error("The profiler can record {capacity} regions per block, region `{region}` doesn't fit")]
    ProfilerCapacity { capacity: usize, region: String },
    #[error("Invalid launch dimensions: {0}")]
    LaunchDims(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Unimplemented {
    #[error("{0}")]
    Scratch(ScratchError),
    #[error("{0}")]
    Tma(TmaError),
    #[error("Operation `{op}` isn't supported for layout {layout}")]
    Layout { op: &'static str, layout: String },
    #[error("Only 128B swizzle is supported, got {0:?}")]
    Swizzle(Option<u32>),
    #[error("Only reductions along axis 1 are supported, got axis {0}")]
    ReductionAxis(usize),
    #[error("Only tile aligned slicing of fragmented arrays is supported")]
    UnalignedSlice,
    #[error("Fragmented arrays can only be sliced with static indices")]
    DynamicSlice,
    #[error("Fragmented arrays can only be sliced, not indexed")]
    SqueezedSlice,
    #[error("Approximate exp is only implemented for f32, got {0}")]
    ApproxExp(Elem),
    #[error("Conversion from {from} to {to} isn't supported")]
    Conversion { from: Elem, to: Elem },
    #[error("Tiled stores need a number of columns divisible by 32 and by the tile width, got {0}")]
    TiledColumns(usize),
    #[error("Tiled stores support elements of at most 4 bytes, got {0}")]
    TiledElem(Elem),
    #[error("Strided layouts need elements dividing 8 bytes, got {0}")]
    StridedElem(Elem),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    #[error("Only SMEM <-> GMEM copies are supported, got {src} -> {dst}")]
    CopyDirection { src: MemorySpace, dst: MemorySpace },
    #[error("Barriers are required for GMEM -> SMEM copies")]
    MissingBarrier,
    #[error("Barriers are unsupported for SMEM -> GMEM copies")]
    UnexpectedBarrier,
    #[error("`arrive` is unsupported for SMEM -> GMEM copies")]
    UnexpectedArrive,
    #[error("GMEM reference {0} in async copy must be a kernel argument")]
    NotKernelArgument(String),
}

impl From<MemRefError> for KernelError {
    fn from(value: MemRefError) -> Self {
        KernelError::Contract(ContractViolation::MemRef(value))
    }
}

impl From<ScratchError> for KernelError {
    fn from(value: ScratchError) -> Self {
        match value {
            ScratchError::Misaligned { .. } => {
                KernelError::Unimplemented(Unimplemented::Scratch(value))
            }
            ScratchError::InvalidAlignment(_) | ScratchError::InitTooLarge { .. } => {
                KernelError::Contract(ContractViolation::Scratch(value))
            }
        }
    }
}

impl From<TmaError> for KernelError {
    fn from(value: TmaError) -> Self {
        match value {
            TmaError::UnsupportedSwizzle(_) | TmaError::RankTooLarge(_) => {
                KernelError::Unimplemented(Unimplemented::Tma(value))
            }
            TmaError::BoxRankMismatch { .. } | TmaError::InvalidEncoding(_) => {
                KernelError::Contract(ContractViolation::Tma(value))
            }
        }
    }
}

impl From<tilecl_runtime::VerificationError> for KernelError {
    fn from(value: tilecl_runtime::VerificationError) -> Self {
        KernelError::Compilation(CompilationError::Verification(value))
    }
}
